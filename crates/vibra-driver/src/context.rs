//! 线程间共享的运行时上下文

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::active::ActiveFeatureSet;
use crate::events::{EventHub, PipelineEvent};
use crate::metrics::IngestMetrics;
use crate::saving::SavingState;

/// 应用线程、总线线程、批处理线程和写入线程共享的状态
///
/// 帧和聚合缓冲不在这里：它们只属于批处理线程。
#[derive(Default)]
pub struct IngestContext {
    pub saving: SavingState,
    pub active: ActiveFeatureSet,
    pub metrics: Arc<IngestMetrics>,
    pub hub: RwLock<EventHub>,
}

impl IngestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在锁外通知接收者，接收者可以重入注册
    pub fn emit(&self, event: &PipelineEvent) {
        let sinks = self.hub.read().snapshot();
        for sink in &sinks {
            sink.on_event(event);
        }
    }

    pub fn connection_status(&self, text: impl Into<String>) {
        let text = text.into();
        trace!("connection_status: {}", text);
        self.emit(&PipelineEvent::ConnectionStatus(text));
    }

    pub fn save_status(&self, text: impl Into<String>) {
        let text = text.into();
        trace!("save_status: {}", text);
        self.emit(&PipelineEvent::SaveStatus(text));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::events::{ChannelSink, EventSink};

    #[test]
    fn test_sink_can_register_from_on_event() {
        let ctx = Arc::new(IngestContext::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (late, late_rx) = ChannelSink::new(8);
        let late: Arc<dyn EventSink> = Arc::new(late);

        let weak: Weak<IngestContext> = Arc::downgrade(&ctx);
        let counter = calls.clone();
        ctx.hub.write().add_sink(Arc::new(move |_: &PipelineEvent| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0
                && let Some(ctx) = weak.upgrade()
            {
                ctx.hub.write().add_sink(late.clone());
            }
        }));

        ctx.connection_status("Connected to broker");
        ctx.save_status("Saved data to data1, frame 0");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.hub.read().len(), 2);
        // 新接收者只收到注册之后的事件
        assert!(matches!(late_rx.try_recv(), Ok(PipelineEvent::SaveStatus(_))));
        assert!(late_rx.try_recv().is_err());
    }
}

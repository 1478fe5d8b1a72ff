//! replay 命令
//!
//! 把载荷文件依次发布到内存总线，走完整管线（订阅 → 入口队列 → 批处理 → 持久化 / 分发），
//! 并输出每个事件。

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use crossbeam_channel::Receiver;
use tracing::info;
use vibra_sdk::bus::MockBus;
use vibra_sdk::driver::ChannelSink;
use vibra_sdk::{IngestorBuilder, PipelineEvent};
use vibra_sdk::tools::{JsonLinesHistoryStore, ProjectCatalog};

use super::PipelineArgs;
use crate::utils::format_event;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
/// 事件缓冲；回放期间持续消费，只在输出跟不上时丢弃
const EVENT_BUFFER: usize = 4096;
const EVENT_POLL: Duration = Duration::from_millis(5);

/// 回放命令参数
#[derive(Args, Debug)]
pub struct ReplayCommand {
    /// 项目配置文件（TOML）
    #[arg(long)]
    pub project_file: String,

    /// 项目名
    #[arg(long)]
    pub project: String,

    /// 发布主题（必须是项目中某个型号的 tag）
    #[arg(long)]
    pub topic: String,

    /// 载荷文件，按顺序发布
    #[arg(required = true)]
    pub files: Vec<String>,

    /// 保存到历史库时使用的文件名（如 data7）
    #[arg(long)]
    pub save: Option<String>,

    /// 历史库根目录
    #[arg(long, default_value = "history")]
    pub history_dir: String,

    /// 只输出统计，不逐条输出事件
    #[arg(short, long)]
    pub quiet: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl ReplayCommand {
    pub fn execute(&self) -> Result<()> {
        let catalog = ProjectCatalog::load(&self.project_file)?;
        catalog.validate().context("项目配置校验失败")?;

        let Some(project) = catalog.project(&self.project) else {
            bail!("❌ 项目不存在: {}", self.project);
        };
        let Some(model) = project.model_for_tag(&self.topic) else {
            bail!("❌ 项目 {} 中没有型号使用 tag: {}", self.project, self.topic);
        };
        let model = model.name.clone();

        let payloads = self
            .files
            .iter()
            .map(|file| std::fs::read(file).with_context(|| format!("读取载荷文件失败: {file}")))
            .collect::<Result<Vec<_>>>()?;

        let store = self.save.as_ref().map(|_| {
            Arc::new(JsonLinesHistoryStore::new(&self.history_dir).with_catalog(catalog.clone()))
        });

        let (bus, handle) = MockBus::new();
        let (sink, events) = ChannelSink::new(EVENT_BUFFER);
        let dropped = sink.dropped_counter();
        let mut builder = IngestorBuilder::new(Arc::new(catalog), self.project.clone())
            .config(self.pipeline.to_config())
            .inline_persistence(true)
            .sink(Arc::new(sink))
            .bus(bus);
        if let Some(store) = &store {
            builder = builder.history_store(store.clone());
        }
        let ingestor = builder.build()?;

        if !handle.wait_for_subscription(&self.topic, SETTLE_TIMEOUT) {
            bail!("❌ 等待订阅超时: {}", self.topic);
        }
        if let Some(filename) = &self.save {
            ingestor.start_saving(&model, filename);
        }

        for (file, payload) in self.files.iter().zip(payloads) {
            info!("Publishing {} to {}", file, self.topic);
            if !handle.publish(&self.topic, payload) {
                bail!("❌ 发布失败: {}", file);
            }
        }

        // 消息先经过总线线程才进入入口队列，按已发布数等待
        let published = handle.published() as u64;
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        let drained = loop {
            self.show_events(&events);
            if ingestor.received() >= published && ingestor.is_drained() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            if let Ok(event) = events.recv_timeout(EVENT_POLL) {
                self.show(&event);
            }
        };

        let metrics = ingestor.metrics();
        ingestor.shutdown();
        self.show_events(&events);

        println!();
        println!(
            "✅ {} message(s): {} frame(s), {} decode error(s), {} event(s), {} record(s) saved",
            metrics.messages_received,
            metrics.frames_decoded,
            metrics.decode_errors,
            metrics.events_emitted,
            metrics.records_saved
        );
        let dropped = dropped.load(Ordering::Relaxed);
        println!("📊 {} event(s) dropped by the output buffer", dropped);
        if dropped > 0 {
            eprintln!("⚠️  输出跟不上，{} 个事件未显示", dropped);
        }
        if !drained {
            bail!("❌ 回放未在 {:?} 内完成", SETTLE_TIMEOUT);
        }
        if let (Some(store), Some(filename)) = (&store, &self.save) {
            let path = store.record_path(&self.project, &model, filename);
            println!("📁 {}", path.display());
        }
        Ok(())
    }

    fn show_events(&self, events: &Receiver<PipelineEvent>) {
        for event in events.try_iter() {
            self.show(&event);
        }
    }

    fn show(&self, event: &PipelineEvent) {
        if !self.quiet {
            println!("{}", format_event(event));
        }
    }
}

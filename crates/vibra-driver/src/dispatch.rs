//! 分发路由
//!
//! 一帧解码完成后，按每个功能的形态规则生成零个或多个 [`DispatchEvent`]：
//!
//! | 形态 | 每帧事件数 | `channel_name` | `values` |
//! |------|-----------|----------------|----------|
//! | `WholeFrame` | 1 | `None` | 全部主通道（可附带 tacho） |
//! | `PerChannel` | 主通道数 | `Some(name)` | 单个主通道 |
//! | `AggregateAcrossFrames` | 0 或 1 | `None` | 跨帧累积后的全部通道 |
//!
//! 各功能相互独立：某个功能的通道映射缺失或布局变化不会影响其他功能。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};
use vibra_protocol::Frame;

use crate::active::ActiveFeatureSet;
use crate::topology::Topology;

/// 功能的数据形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapePolicy {
    WholeFrame,
    PerChannel,
    AggregateAcrossFrames,
}

/// 功能绑定：逻辑功能名 → 线上 tag 集合 + 形态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureBinding {
    pub feature: String,
    pub tags: Vec<String>,
    pub shape: ShapePolicy,
    /// 是否在主通道后附带 tacho 通道（`PerChannel` 忽略此项）
    pub include_tacho: bool,
}

impl FeatureBinding {
    /// 整帧与聚合形态默认附带 tacho
    pub fn new(feature: &str, tags: &[&str], shape: ShapePolicy) -> Self {
        Self {
            feature: feature.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            shape,
            include_tacho: shape != ShapePolicy::PerChannel,
        }
    }

    pub fn with_tacho(mut self, include_tacho: bool) -> Self {
        self.include_tacho = include_tacho;
        self
    }

    /// `name` 是逻辑名或任一线上 tag
    pub fn matches_name(&self, name: &str) -> bool {
        self.feature == name || self.tags.iter().any(|t| t == name)
    }

    /// 仪表盘的默认功能表
    pub fn defaults() -> Vec<Self> {
        use ShapePolicy::*;
        vec![
            Self::new("Tabular View", &["TabularView"], WholeFrame),
            Self::new("Time View", &["TimeWave", "TimeReport"], WholeFrame),
            Self::new("Time Report", &["TimeReport"], WholeFrame),
            Self::new("FFT", &["FFT"], PerChannel),
            Self::new("Waterfall", &["WaterFall"], PerChannel),
            Self::new("Centerline", &["CenterLinePlot"], PerChannel),
            Self::new("Orbit", &["OrbitView"], PerChannel),
            Self::new("Trend View", &["TrendView"], PerChannel),
            Self::new("Multiple Trend View", &["MultiTrendView"], AggregateAcrossFrames),
            Self::new("Bode Plot", &["BodePlot"], PerChannel),
            Self::new("History Plot", &["HistoryPlot"], PerChannel),
            Self::new("Polar Plot", &["PolarPlot"], PerChannel),
            Self::new("Report", &["Report"], PerChannel),
        ]
    }
}

/// 事件携带的数据
///
/// 整帧与单通道视图共享同一个 `Arc<Frame>`，消费者只能读。
#[derive(Debug, Clone)]
pub enum EventValues {
    WholeFrame { frame: Arc<Frame>, include_tacho: bool },
    Channel { frame: Arc<Frame>, index: usize },
    Aggregated(Arc<[Vec<f64>]>),
}

impl EventValues {
    /// 按通道列出数据
    pub fn channels(&self) -> Vec<&[f64]> {
        match self {
            Self::WholeFrame {
                frame,
                include_tacho: true,
            } => frame.all_channels().collect(),
            Self::WholeFrame { frame, .. } => frame.main_channels().iter().map(Vec::as_slice).collect(),
            Self::Channel { frame, index } => frame.channel(*index).into_iter().collect(),
            Self::Aggregated(channels) => channels.iter().map(Vec::as_slice).collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    /// 单通道事件的采样
    pub fn samples(&self) -> Option<&[f64]> {
        match self {
            Self::Channel { frame, index } => frame.channel(*index),
            _ => None,
        }
    }
}

/// 分发事件
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub feature: String,
    pub tag_name: String,
    pub model: String,
    pub channel_name: Option<String>,
    pub values: EventValues,
    pub sample_rate: f64,
    pub frame_index: u32,
}

/// 一次分发的结果
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub events: Vec<DispatchEvent>,
    /// 因无人订阅而未生成的事件数
    pub suppressed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    tag_name: String,
    model: String,
    feature: String,
}

/// 跨帧聚合缓冲
#[derive(Debug)]
struct AggregationBuffer {
    main_channels: usize,
    channels: Vec<Vec<f64>>,
}

impl AggregationBuffer {
    fn new(main_channels: usize, total_channels: usize) -> Self {
        Self {
            main_channels,
            channels: vec![Vec::new(); total_channels],
        }
    }

    fn is_empty(&self) -> bool {
        self.channels.iter().all(Vec::is_empty)
    }

    fn is_complete(&self) -> bool {
        self.channels[..self.main_channels]
            .iter()
            .all(|ch| !ch.is_empty())
    }

    fn take(&mut self) -> Vec<Vec<f64>> {
        let total = self.channels.len();
        std::mem::replace(&mut self.channels, vec![Vec::new(); total])
    }
}

/// 分发路由器（批处理线程独占，持有聚合缓冲）
pub struct DispatchRouter {
    bindings: Vec<FeatureBinding>,
    buffers: HashMap<BufferKey, AggregationBuffer>,
}

impl DispatchRouter {
    pub fn new(bindings: Vec<FeatureBinding>) -> Self {
        Self {
            bindings,
            buffers: HashMap::new(),
        }
    }

    pub fn bindings(&self) -> &[FeatureBinding] {
        &self.bindings
    }

    /// 尚未凑齐、仍在累积的聚合缓冲数
    pub fn pending_aggregations(&self) -> usize {
        self.buffers.values().filter(|b| !b.is_empty()).count()
    }

    /// 分发一帧
    ///
    /// `active` 为 `None` 时不过滤，所有功能都会收到事件。
    pub fn dispatch(
        &mut self,
        frame: &Arc<Frame>,
        topology: &Topology,
        active: Option<&ActiveFeatureSet>,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let wants = |binding: &FeatureBinding, channel: Option<&str>| {
            active.is_none_or(|set| set.wants(binding, &topology.model, channel))
        };

        for binding in &self.bindings {
            match binding.shape {
                ShapePolicy::WholeFrame => {
                    if !wants(binding, None) {
                        outcome.suppressed += 1;
                        continue;
                    }
                    outcome.events.push(event(
                        binding,
                        topology,
                        frame,
                        None,
                        EventValues::WholeFrame {
                            frame: frame.clone(),
                            include_tacho: binding.include_tacho,
                        },
                    ));
                },
                ShapePolicy::PerChannel => {
                    for index in 0..frame.main_channel_count() as usize {
                        let name = topology.channel_name(index);
                        if !wants(binding, Some(&name)) {
                            outcome.suppressed += 1;
                            continue;
                        }
                        outcome.events.push(event(
                            binding,
                            topology,
                            frame,
                            Some(name),
                            EventValues::Channel {
                                frame: frame.clone(),
                                index,
                            },
                        ));
                    }
                },
                ShapePolicy::AggregateAcrossFrames => {
                    if !wants(binding, None) {
                        outcome.suppressed += 1;
                        continue;
                    }
                    if let Some(channels) = accumulate(&mut self.buffers, binding, topology, frame) {
                        outcome.events.push(event(
                            binding,
                            topology,
                            frame,
                            None,
                            EventValues::Aggregated(channels.into()),
                        ));
                    }
                },
            }
        }

        trace!(
            "Dispatched frame {} of {}/{}: {} events, {} suppressed",
            frame.frame_index(),
            topology.tag_name,
            topology.model,
            outcome.events.len(),
            outcome.suppressed
        );
        outcome
    }
}

fn event(
    binding: &FeatureBinding,
    topology: &Topology,
    frame: &Frame,
    channel_name: Option<String>,
    values: EventValues,
) -> DispatchEvent {
    DispatchEvent {
        feature: binding.feature.clone(),
        tag_name: topology.tag_name.clone(),
        model: topology.model.clone(),
        channel_name,
        values,
        sample_rate: frame.sample_rate(),
        frame_index: frame.frame_index(),
    }
}

/// 累积一帧，凑齐全部主通道后返回聚合数据并清空缓冲
fn accumulate(
    buffers: &mut HashMap<BufferKey, AggregationBuffer>,
    binding: &FeatureBinding,
    topology: &Topology,
    frame: &Frame,
) -> Option<Vec<Vec<f64>>> {
    let main = frame.main_channel_count() as usize;
    let tacho = if binding.include_tacho {
        frame.tacho_channel_count() as usize
    } else {
        0
    };

    let key = BufferKey {
        tag_name: topology.tag_name.clone(),
        model: topology.model.clone(),
        feature: binding.feature.clone(),
    };
    let buffer = buffers
        .entry(key)
        .or_insert_with(|| AggregationBuffer::new(main, main + tacho));

    // 通道布局变化：丢弃旧数据，从当前帧重新累积
    if buffer.main_channels != main || buffer.channels.len() != main + tacho {
        if !buffer.is_empty() {
            warn!(
                "Channel layout of {}/{} changed ({} -> {} channels), resetting {} buffer",
                topology.tag_name,
                topology.model,
                buffer.channels.len(),
                main + tacho,
                binding.feature
            );
        }
        *buffer = AggregationBuffer::new(main, main + tacho);
    }

    let sources = frame.main_channels().iter().map(Vec::as_slice).chain(
        frame
            .tacho_channels()
            .take(tacho),
    );
    for (dst, src) in buffer.channels.iter_mut().zip(sources) {
        dst.extend_from_slice(src);
    }

    buffer.is_complete().then(|| buffer.take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibra_protocol::ChannelCount;

    fn frame(index: u32, main: usize, tacho: usize) -> Arc<Frame> {
        let main_channels = (0..main).map(|c| vec![c as f64; 2]).collect();
        let tacho_channels = (0..tacho).map(|t| vec![100.0 + t as f64; 2]).collect();
        Arc::new(Frame::new(index, 1000.0, main_channels, tacho_channels).unwrap())
    }

    fn topology() -> Topology {
        Topology {
            project: "Plant-1".to_string(),
            model: "ModelA".to_string(),
            tag_name: "sensors/a".to_string(),
            channel_count: ChannelCount::Four,
            channel_names: vec!["Bearing 1X".to_string(), "Bearing 1Y".to_string()],
        }
    }

    #[test]
    fn test_whole_frame_and_per_channel_counts() {
        let mut router = DispatchRouter::new(vec![
            FeatureBinding::new("Tabular View", &["TabularView"], ShapePolicy::WholeFrame),
            FeatureBinding::new("FFT", &["FFT"], ShapePolicy::PerChannel),
        ]);
        let outcome = router.dispatch(&frame(1, 4, 2), &topology(), None);

        let whole: Vec<_> = outcome.events.iter().filter(|e| e.feature == "Tabular View").collect();
        let per_channel: Vec<_> = outcome.events.iter().filter(|e| e.feature == "FFT").collect();
        assert_eq!(whole.len(), 1);
        assert_eq!(per_channel.len(), 4);
        assert_eq!(outcome.suppressed, 0);

        assert!(whole[0].channel_name.is_none());
        assert_eq!(whole[0].values.channel_count(), 6); // 4 主通道 + 2 tacho
        assert_eq!(whole[0].sample_rate, 1000.0);
        assert_eq!(whole[0].frame_index, 1);
    }

    #[test]
    fn test_per_channel_names_fall_back() {
        let mut router =
            DispatchRouter::new(vec![FeatureBinding::new("FFT", &["FFT"], ShapePolicy::PerChannel)]);
        let outcome = router.dispatch(&frame(1, 4, 0), &topology(), None);
        let names: Vec<_> = outcome
            .events
            .iter()
            .map(|e| e.channel_name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["Bearing 1X", "Bearing 1Y", "Channel 3", "Channel 4"]);
        assert_eq!(outcome.events[2].values.samples(), Some(&[2.0, 2.0][..]));
    }

    #[test]
    fn test_events_share_the_frame() {
        let mut router = DispatchRouter::new(FeatureBinding::defaults());
        let f = frame(1, 4, 2);
        let outcome = router.dispatch(&f, &topology(), None);
        assert!(!outcome.events.is_empty());
        for event in &outcome.events {
            match &event.values {
                EventValues::WholeFrame { frame, .. } | EventValues::Channel { frame, .. } => {
                    assert!(Arc::ptr_eq(frame, &f));
                },
                EventValues::Aggregated(_) => {},
            }
        }
    }

    #[test]
    fn test_aggregate_emits_once_channels_complete() {
        let binding = FeatureBinding::new(
            "Multiple Trend View",
            &["MultiTrendView"],
            ShapePolicy::AggregateAcrossFrames,
        );
        let mut router = DispatchRouter::new(vec![binding]);

        let outcome = router.dispatch(&frame(1, 4, 1), &topology(), None);
        assert_eq!(outcome.events.len(), 1);
        let channels = outcome.events[0].values.channels();
        assert_eq!(channels.len(), 5);
        assert_eq!(channels[4], &[100.0, 100.0][..]);
        assert_eq!(router.pending_aggregations(), 0);
    }

    #[test]
    fn test_aggregate_layout_change_resets_buffer() {
        let mut buffers = HashMap::new();
        let binding = FeatureBinding::new("M", &[], ShapePolicy::AggregateAcrossFrames);

        // 手动留下一个未完成的缓冲
        buffers.insert(
            BufferKey {
                tag_name: "sensors/a".to_string(),
                model: "ModelA".to_string(),
                feature: "M".to_string(),
            },
            AggregationBuffer {
                main_channels: 8,
                channels: vec![vec![9.0]; 8],
            },
        );
        let out = accumulate(&mut buffers, &binding, &topology(), &frame(1, 4, 0)).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_active_set_suppresses_unwanted_events() {
        let mut router = DispatchRouter::new(vec![
            FeatureBinding::new("Tabular View", &["TabularView"], ShapePolicy::WholeFrame),
            FeatureBinding::new("FFT", &["FFT"], ShapePolicy::PerChannel),
        ]);
        let active = ActiveFeatureSet::new();
        active.add("FFT", "ModelA", Some("Bearing 1Y"));

        let outcome = router.dispatch(&frame(1, 4, 0), &topology(), Some(&active));
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].channel_name.as_deref(), Some("Bearing 1Y"));
        assert_eq!(outcome.suppressed, 1 + 3);
    }

    #[test]
    fn test_per_channel_ignores_tacho() {
        let binding = FeatureBinding::new("FFT", &["FFT"], ShapePolicy::PerChannel).with_tacho(true);
        let mut router = DispatchRouter::new(vec![binding]);
        let outcome = router.dispatch(&frame(1, 4, 2), &topology(), None);
        assert_eq!(outcome.events.len(), 4);
    }

    #[test]
    fn test_default_table() {
        let defaults = FeatureBinding::defaults();
        assert_eq!(defaults.len(), 13);
        let time_view = defaults.iter().find(|b| b.feature == "Time View").unwrap();
        assert!(time_view.matches_name("TimeReport"));
        assert_eq!(time_view.shape, ShapePolicy::WholeFrame);
        assert!(time_view.include_tacho);
        let multi = defaults.iter().find(|b| b.feature == "Multiple Trend View").unwrap();
        assert_eq!(multi.shape, ShapePolicy::AggregateAcrossFrames);
    }
}

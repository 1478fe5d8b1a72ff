//! 活跃订阅集合
//!
//! 消费者按 (feature, model, channel) 登记兴趣，批处理线程据此抑制无人订阅的事件。
//! `feature` 既可以是逻辑名（如 `"FFT"`），也可以是对应的线上 tag（如 `"WaterFall"`）。

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::dispatch::FeatureBinding;

/// 一条订阅
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveFeature {
    pub feature: String,
    pub model: String,
    /// `None` 表示该型号的全部通道
    pub channel: Option<String>,
}

impl ActiveFeature {
    pub fn new(feature: &str, model: &str, channel: Option<&str>) -> Self {
        Self {
            feature: feature.to_string(),
            model: model.to_string(),
            channel: channel.map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
pub struct ActiveFeatureSet {
    entries: RwLock<HashSet<ActiveFeature>>,
}

impl ActiveFeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记，返回是否为新增
    pub fn add(&self, feature: &str, model: &str, channel: Option<&str>) -> bool {
        self.entries
            .write()
            .insert(ActiveFeature::new(feature, model, channel))
    }

    /// 注销，返回是否存在
    pub fn remove(&self, feature: &str, model: &str, channel: Option<&str>) -> bool {
        self.entries
            .write()
            .remove(&ActiveFeature::new(feature, model, channel))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 是否有消费者需要该事件
    ///
    /// - `channel = Some(name)`（按通道事件）：登记的通道为 `None` 或等于 `name`
    /// - `channel = None`（整帧 / 聚合事件）：该型号的任意登记都算
    pub fn wants(&self, binding: &FeatureBinding, model: &str, channel: Option<&str>) -> bool {
        self.entries.read().iter().any(|entry| {
            entry.model == model
                && binding.matches_name(&entry.feature)
                && match (channel, entry.channel.as_deref()) {
                    (None, _) | (_, None) => true,
                    (Some(wanted), Some(registered)) => wanted == registered,
                }
        })
    }
}

//! 通道数与交织方案
//!
//! 采集卡按 ADC 分组输出采样。组内按通道轮询交织，组与组之间在时间上依次拼接：
//!
//! ```text
//! 4 通道 : [c0 c1 c2 c3 | c0 c1 c2 c3 | ...]
//! 10 通道: [c0..c4 | c0..c4 | ...]  (spc*5 个)  ++  [c5..c9 | c5..c9 | ...]  (spc*5 个)
//! 其他   : [c0 .. cN-1 | c0 .. cN-1 | ...]
//! ```

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 采集卡支持的主通道数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ChannelCount {
    Four = 4,
    Eight = 8,
    Ten = 10,
}

impl ChannelCount {
    /// 配置缺失或无效时使用的通道数
    pub const DEFAULT: Self = Self::Four;

    pub fn get(self) -> u32 {
        self.into()
    }
}

impl Default for ChannelCount {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 主通道区域的分组方式
///
/// `groups` 个 ADC 分组，每组 `width` 个通道；组内轮询交织，组间按时间拼接。
/// 纯轮询交织即 `groups == 1` 的特例。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGrouping {
    pub groups: usize,
    pub width: usize,
}

impl ChannelGrouping {
    /// 根据主通道数选择分组方式
    ///
    /// - 10 通道：两个 5 通道 ADC 分组
    /// - 其他（4 / 8 / ...）：单组轮询
    pub fn for_main_channels(main_channels: usize) -> Self {
        match main_channels {
            10 => Self {
                groups: 2,
                width: 5,
            },
            n => Self {
                groups: 1,
                width: n,
            },
        }
    }

    pub fn channel_count(&self) -> usize {
        self.groups * self.width
    }

    /// 将主通道区域还原为按通道连续的数组
    ///
    /// `data` 长度必须为 `samples_per_channel * channel_count()`（调用方已校验）。
    pub fn deinterleave(&self, data: &[u16], samples_per_channel: usize) -> Vec<Vec<f64>> {
        let mut channels: Vec<Vec<f64>> = (0..self.channel_count())
            .map(|_| Vec::with_capacity(samples_per_channel))
            .collect();
        if self.width == 0 || samples_per_channel == 0 {
            return channels;
        }

        let group_len = samples_per_channel * self.width;
        for (group, block) in data.chunks(group_len).take(self.groups).enumerate() {
            let base = group * self.width;
            for row in block.chunks_exact(self.width) {
                for (offset, &sample) in row.iter().enumerate() {
                    channels[base + offset].push(f64::from(sample));
                }
            }
        }
        channels
    }

    /// [`deinterleave`](Self::deinterleave) 的逆操作（编码端使用）
    pub fn interleave(&self, channels: &[Vec<u16>]) -> Vec<u16> {
        let samples = channels.first().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(samples * channels.len());
        for group in channels.chunks(self.width.max(1)).take(self.groups) {
            for i in 0..samples {
                out.extend(group.iter().map(|ch| ch[i]));
            }
        }
        out
    }
}

//! # Vibra Protocol
//!
//! 振动采集帧的线协议定义（无 I/O 依赖）
//!
//! ## 模块
//!
//! - `binary`: 二进制编码（u16 小端序列 + 100 字头部）
//! - `structured`: 结构化编码（JSON 对象）
//! - `layout`: 通道数与交织方案（4 / 8 / 10 通道）
//!
//! ## 编码识别
//!
//! 先尝试结构化编码，语法层面无法解析时回退到二进制编码：
//!
//! ```text
//! payload ──► structured::try_decode ──► Some(result)  → Encoding::Structured
//!                     │
//!                     └─► None（不是 JSON）──► binary::decode → Encoding::Binary
//! ```
//!
//! 解码器只做 de-interleave，不做任何标定/缩放（见 `vibra-tools::calibration`）。

pub mod binary;
pub mod layout;
pub mod structured;

pub use binary::{BinaryHeader, HEADER_WORDS, MIN_PAYLOAD_BYTES, encode_binary};
pub use layout::{ChannelCount, ChannelGrouping};

use serde::Serialize;
use thiserror::Error;

/// 单帧最多携带的转速（tacho）通道数
pub const MAX_TACHO_CHANNELS: u32 = 2;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload too short: {len} ({detail})")]
    TooShort { len: usize, detail: &'static str },

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Unexpected data length: got {actual}, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid payload shape: {0}")]
    InvalidShape(String),
}

/// 载荷的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Encoding {
    /// JSON 对象（`values` / `sample_rate` / `frame_index` / ...）
    Structured,
    /// u16 小端序列
    Binary,
}

/// 解码后的一帧数据
///
/// 构造后不可变：字段私有，只能通过 [`Frame::new`] 校验后创建。
/// 在一次分发周期内以 `Arc<Frame>` 的形式被所有消费者只读共享。
///
/// # 不变量
///
/// - `main_channels.len() == main_channel_count`
/// - 每个通道恰好 `samples_per_channel` 个采样
/// - `tacho_frequency` 存在 ⇔ `tacho_channel_count >= 1`
/// - `tacho_trigger` 存在 ⇔ `tacho_channel_count >= 2`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    frame_index: u32,
    main_channel_count: u32,
    tacho_channel_count: u32,
    sample_rate: f64,
    samples_per_channel: u32,
    main_channels: Vec<Vec<f64>>,
    tacho_frequency: Option<Vec<f64>>,
    tacho_trigger: Option<Vec<f64>>,
}

impl Frame {
    /// 创建帧并校验全部不变量
    ///
    /// `tacho` 按顺序为频率通道、触发通道；其长度即 `tacho_channel_count`。
    pub fn new(
        frame_index: u32,
        sample_rate: f64,
        main_channels: Vec<Vec<f64>>,
        tacho: Vec<Vec<f64>>,
    ) -> Result<Self, DecodeError> {
        if main_channels.is_empty() {
            return Err(DecodeError::InvalidHeader(
                "main_channel_count must be positive".to_string(),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DecodeError::InvalidHeader(format!(
                "sample_rate must be positive, got {sample_rate}"
            )));
        }
        if tacho.len() > MAX_TACHO_CHANNELS as usize {
            return Err(DecodeError::InvalidHeader(format!(
                "tacho_channel_count must be at most {MAX_TACHO_CHANNELS}, got {}",
                tacho.len()
            )));
        }

        let samples = main_channels[0].len();
        if samples == 0 {
            return Err(DecodeError::InvalidShape(
                "samples_per_channel must be positive".to_string(),
            ));
        }
        if let Some((idx, ch)) = main_channels
            .iter()
            .chain(tacho.iter())
            .enumerate()
            .find(|(_, ch)| ch.len() != samples)
        {
            return Err(DecodeError::InvalidShape(format!(
                "channel {idx} has {} samples, expected {samples}",
                ch.len()
            )));
        }

        let main_channel_count = main_channels.len() as u32;
        let tacho_channel_count = tacho.len() as u32;
        let mut tacho = tacho.into_iter();

        Ok(Self {
            frame_index,
            main_channel_count,
            tacho_channel_count,
            sample_rate,
            samples_per_channel: samples as u32,
            main_channels,
            tacho_frequency: tacho.next(),
            tacho_trigger: tacho.next(),
        })
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn main_channel_count(&self) -> u32 {
        self.main_channel_count
    }

    pub fn tacho_channel_count(&self) -> u32 {
        self.tacho_channel_count
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn samples_per_channel(&self) -> u32 {
        self.samples_per_channel
    }

    /// 全部主通道（按通道序号）
    pub fn main_channels(&self) -> &[Vec<f64>] {
        &self.main_channels
    }

    /// 单个主通道的采样
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.main_channels.get(index).map(Vec::as_slice)
    }

    /// 转速频率通道（第一个 tacho 通道）
    pub fn tacho_frequency(&self) -> Option<&[f64]> {
        self.tacho_frequency.as_deref()
    }

    /// 键相触发通道（第二个 tacho 通道）
    pub fn tacho_trigger(&self) -> Option<&[f64]> {
        self.tacho_trigger.as_deref()
    }

    /// tacho 通道，顺序为频率、触发
    pub fn tacho_channels(&self) -> impl Iterator<Item = &[f64]> {
        self.tacho_frequency().into_iter().chain(self.tacho_trigger())
    }

    /// 主通道在前、tacho 通道在后的全部通道
    pub fn all_channels(&self) -> impl Iterator<Item = &[f64]> {
        self.main_channels.iter().map(Vec::as_slice).chain(self.tacho_channels())
    }

    /// 全部通道的采样总数
    pub fn total_samples(&self) -> usize {
        (self.main_channel_count + self.tacho_channel_count) as usize
            * self.samples_per_channel as usize
    }

    /// 展平为历史记录格式：主通道依次拼接，然后是频率通道、触发通道
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total_samples());
        for ch in self.all_channels() {
            out.extend_from_slice(ch);
        }
        out
    }
}

/// 解码一条载荷
///
/// `fallback_channel_count` 在载荷未声明主通道数时使用（通常来自项目配置）。
///
/// # 示例
///
/// ```rust
/// use vibra_protocol::decode;
///
/// let json = br#"{"values": [[1, 2], [3, 4]], "main_channels": 2, "tacho_channels": 0}"#;
/// let frame = decode(json, 4).unwrap();
/// assert_eq!(frame.main_channel_count(), 2);
/// assert_eq!(frame.channel(1), Some(&[3.0, 4.0][..]));
/// ```
pub fn decode(payload: &[u8], fallback_channel_count: u32) -> Result<Frame, DecodeError> {
    decode_with_encoding(payload, fallback_channel_count).map(|(_, frame)| frame)
}

/// 解码一条载荷，同时返回识别出的编码方式
pub fn decode_with_encoding(
    payload: &[u8],
    fallback_channel_count: u32,
) -> Result<(Encoding, Frame), DecodeError> {
    match structured::try_decode(payload, fallback_channel_count) {
        Some(result) => result.map(|frame| (Encoding::Structured, frame)),
        None => binary::decode(payload, fallback_channel_count)
            .map(|frame| (Encoding::Binary, frame)),
    }
}

//! 二进制帧编码
//!
//! 整个载荷是 u16 小端序列：
//!
//! ```text
//! [Header: 100 × u16]
//!   [0] frame_index 低 16 位
//!   [1] frame_index 高 16 位
//!   [2] 主通道数
//!   [3] 采样率（Hz）
//!   [6] tacho 通道数
//! [主通道区域: spc × main，按 ChannelGrouping 交织]
//! [tacho 区域: spc × tacho，每个通道连续存放（频率通道在前，触发通道在后）]
//! ```

use crate::layout::ChannelGrouping;
use crate::{DecodeError, Frame, MAX_TACHO_CHANNELS};

/// 头部长度（u16 个数）
pub const HEADER_WORDS: usize = 100;

/// 最短载荷长度（字节）
pub const MIN_PAYLOAD_BYTES: usize = 20;

/// 头部字段下标
pub mod field {
    pub const FRAME_INDEX_LO: usize = 0;
    pub const FRAME_INDEX_HI: usize = 1;
    pub const MAIN_CHANNELS: usize = 2;
    pub const SAMPLE_RATE: usize = 3;
    pub const TACHO_CHANNELS: usize = 6;
}

/// 头部缺少采样率字段时的默认值（Hz）
const DEFAULT_SAMPLE_RATE: u32 = 1000;
/// 头部缺少 tacho 字段时的默认值
const DEFAULT_TACHO_CHANNELS: u32 = 2;

/// 解析后的二进制头部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub frame_index: u32,
    pub main_channels: u32,
    pub sample_rate: u32,
    pub tacho_channels: u32,
}

impl BinaryHeader {
    /// 从头部字中读取字段
    ///
    /// 字段缺失（头部比预期短）时，主通道数取 `fallback_channel_count`，
    /// 采样率取 1000 Hz，tacho 通道数取 2。字段存在时一律原样使用（包括 0）。
    pub fn parse(header: &[u16], fallback_channel_count: u32) -> Self {
        let word = |idx: usize| header.get(idx).copied().map(u32::from);

        let lo = word(field::FRAME_INDEX_LO).unwrap_or(0);
        let hi = word(field::FRAME_INDEX_HI).unwrap_or(0);

        Self {
            frame_index: (hi << 16) | lo,
            main_channels: word(field::MAIN_CHANNELS).unwrap_or(fallback_channel_count),
            sample_rate: word(field::SAMPLE_RATE).unwrap_or(DEFAULT_SAMPLE_RATE),
            tacho_channels: word(field::TACHO_CHANNELS).unwrap_or(DEFAULT_TACHO_CHANNELS),
        }
    }

    pub fn total_channels(&self) -> u32 {
        self.main_channels + self.tacho_channels
    }

    /// 写回头部（其余字保持为 0）
    pub fn to_words(&self) -> [u16; HEADER_WORDS] {
        let mut header = [0u16; HEADER_WORDS];
        header[field::FRAME_INDEX_LO] = (self.frame_index & 0xFFFF) as u16;
        header[field::FRAME_INDEX_HI] = (self.frame_index >> 16) as u16;
        header[field::MAIN_CHANNELS] = self.main_channels as u16;
        header[field::SAMPLE_RATE] = self.sample_rate as u16;
        header[field::TACHO_CHANNELS] = self.tacho_channels as u16;
        header
    }
}

/// 解码二进制载荷
///
/// # 错误
///
/// - `TooShort`: 少于 20 字节、字节数为奇数、或不足 100 个 u16
/// - `InvalidHeader`: 主通道数 / 采样率 / 每通道采样数不为正，或 tacho 通道数超过 2
/// - `LengthMismatch`: 头部之后的数据不能恰好分成 `spc × (main + tacho)`
pub fn decode(payload: &[u8], fallback_channel_count: u32) -> Result<Frame, DecodeError> {
    if payload.len() < MIN_PAYLOAD_BYTES {
        return Err(DecodeError::TooShort {
            len: payload.len(),
            detail: "fewer than 20 bytes",
        });
    }
    if payload.len() % 2 != 0 {
        return Err(DecodeError::TooShort {
            len: payload.len(),
            detail: "odd byte count",
        });
    }

    let words: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if words.len() < HEADER_WORDS {
        return Err(DecodeError::TooShort {
            len: words.len(),
            detail: "fewer than 100 header words",
        });
    }

    let (header_words, body) = words.split_at(HEADER_WORDS);
    let header = BinaryHeader::parse(header_words, fallback_channel_count);

    let main = header.main_channels as usize;
    let tacho = header.tacho_channels as usize;
    let total = header.total_channels() as usize;
    let samples_per_channel = if total > 0 { body.len() / total } else { 0 };

    if main == 0 || header.sample_rate == 0 || samples_per_channel == 0 {
        return Err(DecodeError::InvalidHeader(format!(
            "main_channels={}, sample_rate={}, tacho_channels={}, samples_per_channel={}",
            header.main_channels, header.sample_rate, header.tacho_channels, samples_per_channel
        )));
    }
    if header.tacho_channels > MAX_TACHO_CHANNELS {
        return Err(DecodeError::InvalidHeader(format!(
            "tacho_channels={} exceeds {MAX_TACHO_CHANNELS}",
            header.tacho_channels
        )));
    }

    let expected = samples_per_channel * total;
    if body.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: body.len(),
        });
    }

    let (main_region, tacho_region) = body.split_at(samples_per_channel * main);
    let main_channels =
        ChannelGrouping::for_main_channels(main).deinterleave(main_region, samples_per_channel);
    let tacho_channels = tacho_region
        .chunks_exact(samples_per_channel)
        .take(tacho)
        .map(|block| block.iter().copied().map(f64::from).collect())
        .collect();

    Frame::new(
        header.frame_index,
        f64::from(header.sample_rate),
        main_channels,
        tacho_channels,
    )
}

/// 编码二进制载荷（采集端 / 测试夹具使用）
///
/// `main` 与 `tacho` 为原始 ADC 计数，所有通道长度必须一致。
pub fn encode_binary(
    frame_index: u32,
    sample_rate: u16,
    main: &[Vec<u16>],
    tacho: &[Vec<u16>],
) -> Result<Vec<u8>, DecodeError> {
    let samples = main.first().map_or(0, Vec::len);
    if main.is_empty() || samples == 0 {
        return Err(DecodeError::InvalidShape(
            "at least one non-empty main channel is required".to_string(),
        ));
    }
    if tacho.len() > MAX_TACHO_CHANNELS as usize {
        return Err(DecodeError::InvalidHeader(format!(
            "tacho_channels={} exceeds {MAX_TACHO_CHANNELS}",
            tacho.len()
        )));
    }
    if main.iter().chain(tacho.iter()).any(|ch| ch.len() != samples) {
        return Err(DecodeError::InvalidShape(
            "all channels must have the same length".to_string(),
        ));
    }

    let header = BinaryHeader {
        frame_index,
        main_channels: main.len() as u32,
        sample_rate: u32::from(sample_rate),
        tacho_channels: tacho.len() as u32,
    };

    let mut words = Vec::with_capacity(HEADER_WORDS + samples * (main.len() + tacho.len()));
    words.extend_from_slice(&header.to_words());
    words.extend(ChannelGrouping::for_main_channels(main.len()).interleave(main));
    for ch in tacho {
        words.extend_from_slice(ch);
    }

    Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
}

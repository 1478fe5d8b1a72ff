//! 结构化（JSON）编码
//!
//! ```json
//! {
//!   "values": [[...], [...], ...],
//!   "sample_rate": 1000,
//!   "frame_index": 0,
//!   "main_channels": 4,
//!   "tacho_channels": 2
//! }
//! ```
//!
//! 除 `values` 外的字段均可省略。`values` 按通道排列：前 `main_channels` 个为主通道，
//! 其后依次为频率通道、触发通道。

use serde::Deserialize;
use serde_json::error::Category;

use crate::{DecodeError, Frame, MAX_TACHO_CHANNELS};

const DEFAULT_SAMPLE_RATE: f64 = 1000.0;
const DEFAULT_TACHO_CHANNELS: i64 = 2;

#[derive(Debug, Deserialize)]
struct StructuredPayload {
    #[serde(default)]
    values: Vec<Vec<f64>>,
    sample_rate: Option<f64>,
    frame_index: Option<u32>,
    main_channels: Option<i64>,
    tacho_channels: Option<i64>,
}

/// 尝试按结构化编码解码
///
/// - `None`: 载荷不是合法 JSON（语法错误 / 提前结束 / 非 UTF-8），调用方应改用二进制解码
/// - `Some(Err(..))`: 是 JSON 但内容不符合约定，不再回退
pub fn try_decode(payload: &[u8], fallback_channel_count: u32) -> Option<Result<Frame, DecodeError>> {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => match e.classify() {
            Category::Syntax | Category::Eof | Category::Io => return None,
            Category::Data => {
                return Some(Err(DecodeError::InvalidShape(e.to_string())));
            },
        },
    };

    Some(
        serde_json::from_value::<StructuredPayload>(value)
            .map_err(|e| DecodeError::InvalidShape(e.to_string()))
            .and_then(|parsed| build_frame(parsed, fallback_channel_count)),
    )
}

fn build_frame(payload: StructuredPayload, fallback_channel_count: u32) -> Result<Frame, DecodeError> {
    let StructuredPayload {
        mut values,
        sample_rate,
        frame_index,
        main_channels,
        tacho_channels,
    } = payload;

    let main = main_channels.unwrap_or(i64::from(fallback_channel_count));
    if main <= 0 {
        return Err(DecodeError::InvalidHeader(format!(
            "main_channels must be positive, got {main}"
        )));
    }
    let requested_tacho = tacho_channels.unwrap_or(DEFAULT_TACHO_CHANNELS);
    if !(0..=i64::from(MAX_TACHO_CHANNELS)).contains(&requested_tacho) {
        return Err(DecodeError::InvalidHeader(format!(
            "tacho_channels must be within 0..={MAX_TACHO_CHANNELS}, got {requested_tacho}"
        )));
    }

    let main = main as usize;
    if values.len() < main {
        return Err(DecodeError::InvalidShape(format!(
            "insufficient channels: {}/{main}",
            values.len()
        )));
    }

    // 声明的 tacho 通道数以实际存在的数组为上限
    let tacho = (requested_tacho as usize).min(values.len() - main);
    values.truncate(main + tacho);
    let tacho_channels = values.split_off(main);

    Frame::new(
        frame_index.unwrap_or(0),
        sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
        values,
        tacho_channels,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_payload() {
        let json = br#"{
            "values": [[1, 2, 3], [4, 5, 6], [7, 8, 9], [10, 11, 12], [30, 30, 30], [0, 1, 0]],
            "sample_rate": 2560,
            "frame_index": 42,
            "main_channels": 4,
            "tacho_channels": 2
        }"#;
        let frame = try_decode(json, 4).unwrap().unwrap();
        assert_eq!(frame.frame_index(), 42);
        assert_eq!(frame.sample_rate(), 2560.0);
        assert_eq!(frame.main_channel_count(), 4);
        assert_eq!(frame.samples_per_channel(), 3);
        assert_eq!(frame.tacho_frequency(), Some(&[30.0, 30.0, 30.0][..]));
        assert_eq!(frame.tacho_trigger(), Some(&[0.0, 1.0, 0.0][..]));
    }

    #[test]
    fn test_defaults_and_tacho_clamp() {
        // 未声明字段：采样率 1000、帧号 0、主通道数取 fallback，tacho 按实际数组截断
        let json = br#"{"values": [[1], [2], [3], [4], [9]]}"#;
        let frame = try_decode(json, 4).unwrap().unwrap();
        assert_eq!(frame.frame_index(), 0);
        assert_eq!(frame.sample_rate(), 1000.0);
        assert_eq!(frame.main_channel_count(), 4);
        assert_eq!(frame.tacho_channel_count(), 1);
        assert_eq!(frame.tacho_frequency(), Some(&[9.0][..]));
        assert!(frame.tacho_trigger().is_none());
    }

    #[test]
    fn test_insufficient_channels_is_invalid_shape() {
        let json = br#"{"values": [[1], [2]], "main_channels": 4}"#;
        let err = try_decode(json, 4).unwrap().unwrap_err();
        assert_eq!(err, DecodeError::InvalidShape("insufficient channels: 2/4".to_string()));
    }

    #[test]
    fn test_non_object_json_does_not_fall_back() {
        let result = try_decode(b"[1, 2, 3]", 4);
        assert!(matches!(result, Some(Err(DecodeError::InvalidShape(_)))));
    }

    #[test]
    fn test_non_json_returns_none() {
        assert!(try_decode(&[0xFF, 0x00, 0x12, 0x34], 4).is_none());
        assert!(try_decode(b"{\"values\": [[1, 2]", 4).is_none());
        assert!(try_decode(b"", 4).is_none());
    }

    #[test]
    fn test_bad_header_values() {
        let json = br#"{"values": [[1]], "main_channels": 0}"#;
        assert!(matches!(
            try_decode(json, 4),
            Some(Err(DecodeError::InvalidHeader(_)))
        ));

        let json = br#"{"values": [[1]], "main_channels": 1, "tacho_channels": 3}"#;
        assert!(matches!(
            try_decode(json, 4),
            Some(Err(DecodeError::InvalidHeader(_)))
        ));

        let json = br#"{"values": [[1]], "main_channels": 1, "sample_rate": -5}"#;
        assert!(matches!(
            try_decode(json, 4),
            Some(Err(DecodeError::InvalidHeader(_)))
        ));
    }

    #[test]
    fn test_ragged_values_are_invalid_shape() {
        let json = br#"{"values": [[1, 2], [3]], "main_channels": 2, "tacho_channels": 0}"#;
        assert!(matches!(
            try_decode(json, 4),
            Some(Err(DecodeError::InvalidShape(_)))
        ));
    }
}

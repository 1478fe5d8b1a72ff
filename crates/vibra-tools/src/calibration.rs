//! # 信号标定
//!
//! 解码器输出的是原始 ADC 计数（`f64`），标定只在下游消费者中进行：
//!
//! ```text
//! counts ──counts_to_volts──► volts ──calibrate──► base ──convert_unit──► 显示单位
//!                               │
//!                               └──tacho_scale──► tacho 物理量
//! ```

use crate::project::ChannelConfig;

/// ADC 满量程 3.3 V / 16 bit
pub const DEFAULT_SCALING: f64 = 3.3 / 65535.0;

/// ADC 中点偏置
pub const DEFAULT_OFFSET: f64 = 32768.0;

/// 灵敏度下限（避免除零）
const MIN_SENSITIVITY: f64 = 1e-12;

/// ADC 计数 → 电压（先减中点偏置）
pub fn counts_to_volts(counts: &[f64], scaling: f64, offset: f64) -> Vec<f64> {
    counts.iter().map(|&c| (c - offset) * scaling).collect()
}

/// 电压 → 物理量：`volts * (correction * gain) / sensitivity`
pub fn calibrate(volts: &[f64], correction: f64, gain: f64, sensitivity: f64) -> Vec<f64> {
    let sensitivity = if sensitivity.abs() < MIN_SENSITIVITY {
        MIN_SENSITIVITY
    } else {
        sensitivity
    };
    let factor = correction * gain / sensitivity;
    volts.iter().map(|&v| v * factor).collect()
}

/// 位移通道的显示单位换算；其他通道类型原样返回
///
/// | unit | 换算 |
/// |------|------|
/// | mil  | / 25.4 |
/// | um   | × 1 |
/// | mm   | / 1000 |
pub fn convert_unit(base: &[f64], unit: &str, channel_type: &str) -> Vec<f64> {
    if !channel_type.eq_ignore_ascii_case("displacement") {
        return base.to_vec();
    }
    let divisor = match unit.trim().to_ascii_lowercase().as_str() {
        "mil" => 25.4,
        "mm" => 1000.0,
        _ => 1.0,
    };
    base.iter().map(|&v| v / divisor).collect()
}

/// tacho 通道缩放：第一个（频率）通道除以 100，其余不变
pub fn tacho_scale(volts: &[f64], tacho_index: usize) -> Vec<f64> {
    if tacho_index == 0 {
        volts.iter().map(|&v| v / 100.0).collect()
    } else {
        volts.to_vec()
    }
}

/// 坐标轴标签
pub fn label_for_unit(unit: &str) -> String {
    let unit = if unit.trim().is_empty() {
        "mil".to_string()
    } else {
        unit.to_ascii_lowercase()
    };
    format!("Amplitude ({unit})")
}

/// 按通道配置完成整条标定链
pub fn calibrate_channel(counts: &[f64], channel: &ChannelConfig) -> Vec<f64> {
    let volts = counts_to_volts(counts, DEFAULT_SCALING, DEFAULT_OFFSET);
    let base = calibrate(
        &volts,
        channel.correction_value,
        channel.gain,
        channel.sensitivity,
    );
    convert_unit(&base, &channel.unit, &channel.channel_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_counts_to_volts_midscale_is_zero() {
        let volts = counts_to_volts(&[32768.0, 65535.0], DEFAULT_SCALING, DEFAULT_OFFSET);
        assert_eq!(volts[0], 0.0);
        assert!((volts[1] - 32767.0 * DEFAULT_SCALING).abs() < 1e-12);
    }

    #[test]
    fn test_calibrate_clamps_zero_sensitivity() {
        let out = calibrate(&[1.0], 1.0, 1.0, 0.0);
        assert!((out[0] - 1e12).abs() < 1.0);

        let out = calibrate(&[2.0], 0.5, 4.0, 2.0);
        assert!(approx(&out, &[2.0]));
    }

    #[test]
    fn test_convert_unit() {
        assert!(approx(&convert_unit(&[25.4], "mil", "Displacement"), &[1.0]));
        assert!(approx(&convert_unit(&[7.0], "um", "Displacement"), &[7.0]));
        assert!(approx(&convert_unit(&[1000.0], "MM", "displacement"), &[1.0]));
        // 非位移通道不换算
        assert!(approx(&convert_unit(&[25.4], "mil", "Velocity"), &[25.4]));
    }

    #[test]
    fn test_tacho_scale_only_first_channel() {
        assert!(approx(&tacho_scale(&[100.0, 250.0], 0), &[1.0, 2.5]));
        assert!(approx(&tacho_scale(&[1.0, 0.0], 1), &[1.0, 0.0]));
    }

    #[test]
    fn test_label_for_unit() {
        assert_eq!(label_for_unit("UM"), "Amplitude (um)");
        assert_eq!(label_for_unit(""), "Amplitude (mil)");
    }

    #[test]
    fn test_calibrate_channel_defaults() {
        let channel = ChannelConfig::new("Bearing 1X");
        let out = calibrate_channel(&[32768.0], &channel);
        assert_eq!(out, vec![0.0]);
    }
}

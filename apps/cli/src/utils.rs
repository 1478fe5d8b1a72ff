//! 输出与校验辅助函数

use anyhow::{Result, bail};
use vibra_sdk::PipelineEvent;
use vibra_sdk::protocol::{ChannelCount, Frame};

/// 通道数必须是 4 / 8 / 10
pub fn validate_channel_count(channels: u32) -> Result<()> {
    if ChannelCount::try_from(channels).is_err() {
        bail!("❌ 不支持的通道数: {} (可选 4 / 8 / 10)", channels);
    }
    Ok(())
}

/// 输出帧摘要，每个通道一行
pub fn print_frame_summary(frame: &Frame) {
    println!(
        "frame {}: {} main + {} tacho channels, {} samples/channel @ {} Hz",
        frame.frame_index(),
        frame.main_channel_count(),
        frame.tacho_channel_count(),
        frame.samples_per_channel(),
        frame.sample_rate()
    );
    for (index, samples) in frame.main_channels().iter().enumerate() {
        println!("  ch{:<2} {}", index + 1, stats(samples));
    }
    if let Some(samples) = frame.tacho_frequency() {
        println!("  freq {}", stats(samples));
    }
    if let Some(samples) = frame.tacho_trigger() {
        println!("  trig {}", stats(samples));
    }
}

fn stats(samples: &[f64]) -> String {
    if samples.is_empty() {
        return "(empty)".to_string();
    }
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    format!("min={min:.1} max={max:.1} mean={mean:.2}")
}

/// 单行事件描述
pub fn format_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::ConnectionStatus(text) => format!("[connection] {text}"),
        PipelineEvent::SaveStatus(text) => format!("[save] {text}"),
        PipelineEvent::Data(event) => format!(
            "[data] {} {} {} {} frame={} rate={} channels={}",
            event.feature,
            event.tag_name,
            event.model,
            event.channel_name.as_deref().unwrap_or("all"),
            event.frame_index,
            event.sample_rate,
            event.values.channel_count()
        ),
    }
}

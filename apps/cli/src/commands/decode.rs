//! decode 命令
//!
//! 解码单个载荷文件（二进制或 JSON），输出帧摘要

use anyhow::{Context, Result};
use clap::Args;
use vibra_sdk::protocol::{ChannelCount, decode_with_encoding};

use crate::utils::{print_frame_summary, validate_channel_count};

/// 解码命令参数
#[derive(Args, Debug)]
pub struct DecodeCommand {
    /// 载荷文件路径
    pub file: String,

    /// 头部未声明通道数时使用的通道数（4 / 8 / 10）
    #[arg(short, long, default_value_t = ChannelCount::DEFAULT.get())]
    pub channels: u32,
}

impl DecodeCommand {
    pub fn execute(&self) -> Result<()> {
        validate_channel_count(self.channels)?;

        let payload = std::fs::read(&self.file)
            .with_context(|| format!("读取载荷文件失败: {}", self.file))?;
        let (encoding, frame) = decode_with_encoding(&payload, self.channels)
            .with_context(|| format!("解码失败: {}", self.file))?;

        println!("📁 {} ({} bytes, {:?})", self.file, payload.len(), encoding);
        print_frame_summary(&frame);
        Ok(())
    }
}

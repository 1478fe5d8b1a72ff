//! # Vibra CLI
//!
//! 振动数据采集命令行工具。
//!
//! ```bash
//! # 解码单个载荷文件
//! vibra-cli decode frame.bin --channels 10
//!
//! # 用内存总线回放载荷文件，并保存到历史库
//! vibra-cli replay --project-file plant.toml --project Plant-1 \
//!     --topic sensors/a frame1.bin frame2.bin --save data7
//!
//! # 连接 MQTT broker 实时接收（需要 `mqtt` feature）
//! vibra-cli listen --project-file plant.toml --project Plant-1 --broker 10.0.0.5
//!
//! # 校验项目配置
//! vibra-cli project check plant.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::{DecodeCommand, ListenCommand, ProjectCommand, ReplayCommand};

/// Vibra CLI - 振动数据采集命令行工具
#[derive(Parser, Debug)]
#[command(name = "vibra-cli")]
#[command(about = "Command-line interface for vibration telemetry ingestion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 解码单个载荷文件并输出帧摘要
    Decode {
        #[command(flatten)]
        args: DecodeCommand,
    },

    /// 通过内存总线回放载荷文件
    Replay {
        #[command(flatten)]
        args: ReplayCommand,
    },

    /// 连接 broker 实时接收，Ctrl-C 退出
    Listen {
        #[command(flatten)]
        args: ListenCommand,
    },

    /// 项目配置管理
    #[command(subcommand)]
    Project(ProjectCommand),
}

fn main() -> Result<()> {
    vibra_sdk::init_logger_with("vibra_cli=info,vibra_driver=warn,vibra_bus=warn");

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { args } => args.execute(),
        Commands::Replay { args } => args.execute(),
        Commands::Listen { args } => args.execute(),
        Commands::Project(cmd) => cmd.execute(),
    }
}

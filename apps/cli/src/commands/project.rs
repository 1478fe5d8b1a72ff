//! project 命令
//!
//! 校验项目配置文件并输出解析后的通道数与订阅主题

use anyhow::{Context, Result};
use clap::Subcommand;
use vibra_sdk::protocol::ChannelCount;
use vibra_sdk::tools::ProjectCatalog;

/// 项目配置子命令
#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// 校验项目配置文件
    Check {
        /// 项目配置文件（TOML）
        file: String,
    },
}

impl ProjectCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            ProjectCommand::Check { file } => check(file),
        }
    }
}

fn check(file: &str) -> Result<()> {
    let catalog = ProjectCatalog::load(file)?;
    catalog
        .validate()
        .with_context(|| format!("❌ 项目配置校验失败: {file}"))?;

    for project in &catalog.projects {
        let channels = match project.resolve_channel_count() {
            Ok(count) => format!("{} channels", count.get()),
            Err(token) => format!(
                "⚠️  invalid channel count '{}', defaults to {}",
                token,
                ChannelCount::DEFAULT.get()
            ),
        };
        println!("📦 {} ({})", project.name, channels);
        for model in &project.models {
            let tag = if model.tag_name.is_empty() {
                "(no tag)"
            } else {
                model.tag_name.as_str()
            };
            println!(
                "   {} → {} [{} configured channel(s)]",
                model.name,
                tag,
                model.channels.len()
            );
        }
        println!("   subscriptions: {}", project.tag_names().join(", "));
    }

    println!("✅ {} project(s) OK", catalog.projects.len());
    Ok(())
}

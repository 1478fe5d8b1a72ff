//! listen 命令
//!
//! 连接 MQTT broker，订阅项目的全部 tag，实时输出事件直到 Ctrl-C。

use anyhow::Result;
use clap::Args;

use super::PipelineArgs;

/// 监听命令参数
#[derive(Args, Debug)]
pub struct ListenCommand {
    /// 项目配置文件（TOML）
    #[arg(long)]
    pub project_file: String,

    /// 项目名
    #[arg(long)]
    pub project: String,

    /// Broker 地址
    #[arg(long, default_value = "localhost")]
    pub broker: String,

    /// Broker 端口
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// 开始时即保存某个型号，格式 `MODEL=FILENAME`（可重复）
    #[arg(long, value_name = "MODEL=FILENAME")]
    pub save: Vec<String>,

    /// 历史库根目录
    #[arg(long, default_value = "history")]
    pub history_dir: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl ListenCommand {
    #[cfg(not(feature = "mqtt"))]
    pub fn execute(&self) -> Result<()> {
        anyhow::bail!("❌ listen 需要 MQTT 后端，请使用 `--features mqtt` 重新编译")
    }

    #[cfg(feature = "mqtt")]
    pub fn execute(&self) -> Result<()> {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        use anyhow::{Context, bail};
        use crossbeam_channel::RecvTimeoutError;
        use vibra_sdk::IngestorBuilder;
        use vibra_sdk::bus::{BusEndpoint, MqttBus};
        use vibra_sdk::tools::{JsonLinesHistoryStore, ProjectCatalog};

        use crate::utils::format_event;

        let catalog = ProjectCatalog::load(&self.project_file)?;
        catalog.validate().context("项目配置校验失败")?;
        if catalog.project(&self.project).is_none() {
            bail!("❌ 项目不存在: {}", self.project);
        }
        let saves = self
            .save
            .iter()
            .map(|entry| parse_save(entry))
            .collect::<Result<Vec<_>>>()?;

        let endpoint = BusEndpoint::new(self.broker.clone(), self.port);
        println!("📡 Connecting to {}:{} as {}", endpoint.host, endpoint.port, endpoint.client_id);

        let store = JsonLinesHistoryStore::new(&self.history_dir).with_catalog(catalog.clone());
        let ingestor = IngestorBuilder::new(Arc::new(catalog), self.project.clone())
            .config(self.pipeline.to_config())
            .history_store(Arc::new(store))
            .bus(MqttBus::new(endpoint))
            .build()?;
        let events = ingestor.subscribe(4096);
        for (model, filename) in &saves {
            ingestor.start_saving(model, filename);
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        ctrlc::set_handler(move || {
            running_clone.store(false, Ordering::SeqCst);
        })
        .context("注册 Ctrl-C 处理器失败")?;

        println!("💡 提示: 按 Ctrl-C 停止");
        while running.load(Ordering::SeqCst) {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        println!();
        println!("🛑 Stopping...");
        let metrics = ingestor.metrics();
        ingestor.shutdown();
        println!(
            "✅ {} message(s), {} frame(s), {} dropped, {} record(s) saved",
            metrics.messages_received,
            metrics.frames_decoded,
            metrics.messages_dropped,
            metrics.records_saved
        );
        Ok(())
    }
}

/// 解析 `MODEL=FILENAME`
#[cfg_attr(not(feature = "mqtt"), allow(dead_code))]
fn parse_save(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((model, filename)) if !model.trim().is_empty() && !filename.trim().is_empty() => {
            Ok((model.trim().to_string(), filename.trim().to_string()))
        },
        _ => anyhow::bail!("❌ 无效的 --save 参数: {} (格式 MODEL=FILENAME)", entry),
    }
}

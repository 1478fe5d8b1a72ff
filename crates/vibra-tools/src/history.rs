//! # 历史记录
//!
//! 保存中的帧以 [`HistoryRecord`] 的形式写入历史库。记录字段使用 camelCase，
//! 与下游历史查看工具读取的格式一致。
//!
//! [`JsonLinesHistoryStore`] 是文件实现：每条记录一行 JSON，
//! 路径为 `<root>/<project>/<model>/<filename>.jsonl`。

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use vibra_protocol::Frame;

use crate::project::ProjectCatalog;

/// 一条历史记录（一帧）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub topic: String,
    pub filename: String,
    pub frame_index: u32,
    /// 主通道依次拼接，然后是频率通道、触发通道
    pub message: Vec<f64>,
    pub number_of_channels: u32,
    pub sampling_rate: f64,
    pub sampling_size: u32,
    pub message_frequency: Option<f64>,
    pub taco_channel_count: u32,
    pub created_at_us: u64,
    pub updated_at_us: u64,
}

impl HistoryRecord {
    /// 由解码后的帧构造记录
    pub fn from_frame(frame: &Frame, topic: &str, filename: &str) -> Self {
        let now = now_us();
        Self {
            topic: topic.to_string(),
            filename: filename.to_string(),
            frame_index: frame.frame_index(),
            message: frame.flatten(),
            number_of_channels: frame.main_channel_count(),
            sampling_rate: frame.sample_rate(),
            sampling_size: frame.samples_per_channel(),
            message_frequency: None,
            taco_channel_count: frame.tacho_channel_count(),
            created_at_us: now,
            updated_at_us: now,
        }
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// JSON-lines 文件历史库
#[derive(Debug, Clone)]
pub struct JsonLinesHistoryStore {
    root: PathBuf,
    catalog: Option<ProjectCatalog>,
}

impl JsonLinesHistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog: None,
        }
    }

    /// 写入前按项目配置校验项目、型号和 tag
    pub fn with_catalog(mut self, catalog: ProjectCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 记录文件路径
    pub fn record_path(&self, project: &str, model: &str, filename: &str) -> PathBuf {
        self.root
            .join(path_component(project))
            .join(path_component(model))
            .join(format!("{}.jsonl", path_component(filename)))
    }

    /// 追加一条记录
    pub fn append(&self, project: &str, model: &str, record: &HistoryRecord) -> Result<()> {
        if record.topic.is_empty() {
            bail!("Missing or invalid required field: topic");
        }
        if record.filename.is_empty() {
            bail!("Missing or invalid required field: filename");
        }
        if let Some(catalog) = &self.catalog {
            let Some(project_data) = catalog.project(project) else {
                bail!("Project not found!");
            };
            let Some(model_config) = project_data.model(model) else {
                bail!("Model '{model}' not found in project!");
            };
            if model_config.tag_name != record.topic {
                bail!("Tag not found!");
            }
        }

        let path = self.record_path(project, model, &record.filename);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("创建目录失败: {}", dir.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("打开历史文件失败: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record).context("序列化历史记录失败")?;
        writer.write_all(b"\n").context("写入历史记录失败")?;
        writer.flush().context("刷新缓冲区失败")?;
        Ok(())
    }

    /// 读取某个文件名下的全部记录（按写入顺序）
    pub fn read_records(&self, project: &str, model: &str, filename: &str) -> Result<Vec<HistoryRecord>> {
        let path = self.record_path(project, model, filename);
        let file = File::open(&path).with_context(|| format!("打开历史文件失败: {}", path.display()))?;

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("读取历史文件失败")?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .with_context(|| format!("解析第 {} 行失败: {}", line_no + 1, path.display()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// 某个型号下已保存的文件名
    ///
    /// `dataN` 形式的文件名按 N 排序，其余排在前面（按名称）。
    pub fn filenames(&self, project: &str, model: &str) -> Result<Vec<String>> {
        let dir = self.root.join(path_component(project)).join(path_component(model));
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("读取目录失败: {}", dir.display()))? {
            let path = entry.context("读取目录项失败")?.path();
            if !path.extension().is_some_and(|ext| ext == "jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort_by(|a, b| (data_number(a), a).cmp(&(data_number(b), b)));
        Ok(names)
    }
}

/// `data7` → 7，其他 → 0
fn data_number(name: &str) -> u64 {
    name.strip_prefix("data")
        .map(|rest| rest.chars().take_while(char::is_ascii_digit).collect::<String>())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// 将名称转为安全的路径片段
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    }
}

//! # 项目配置
//!
//! 项目配置由外部应用维护，采集管线只读。文件格式为 TOML：
//!
//! ```toml
//! [[projects]]
//! name = "Plant-1"
//! channel_count = "DAQ4CH"        # 或整数 4 / 8 / 10
//!
//! [[projects.models]]
//! name = "ModelA"
//! tag_name = "sensors/model-a"
//!
//! [[projects.models.channels]]
//! channel_name = "Bearing 1X"
//! unit = "mil"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use vibra_protocol::ChannelCount;

/// 合法的位移单位
pub const VALID_UNITS: [&str; 3] = ["mil", "mm", "um"];

/// 项目集合（一个配置文件）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCatalog {
    #[serde(default)]
    pub projects: Vec<ProjectData>,
}

impl ProjectCatalog {
    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取项目配置失败: {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("解析项目配置失败: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化项目配置失败")?;
        std::fs::write(path.as_ref(), content).context("写入项目配置失败")?;
        Ok(())
    }

    pub fn project(&self, name: &str) -> Option<&ProjectData> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// 结构校验
    ///
    /// 无法识别的通道数不算错误（运行时回退到 4 通道），只有以下情况会失败：
    /// 项目名为空或重复、型号名重复、同一项目内 tag 重复、通道名为空、单位不合法。
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for project in &self.projects {
            if project.name.trim().is_empty() {
                bail!("Project name cannot be empty");
            }
            if !names.insert(project.name.as_str()) {
                bail!("Project '{}' is defined more than once", project.name);
            }
            project.validate()?;
        }
        Ok(())
    }
}

/// 单个项目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<ChannelCountToken>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl ProjectData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_count: None,
            models: Vec::new(),
        }
    }

    pub fn with_channel_count(mut self, token: ChannelCountToken) -> Self {
        self.channel_count = Some(token);
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.models.push(model);
        self
    }

    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    /// 声明了 `tag_name == topic` 的型号
    pub fn model_for_tag(&self, topic: &str) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| !m.tag_name.is_empty() && m.tag_name == topic)
    }

    /// 去重后的全部非空 tag（保持声明顺序）
    pub fn tag_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.models
            .iter()
            .filter(|m| !m.tag_name.is_empty())
            .filter(|m| seen.insert(m.tag_name.as_str()))
            .map(|m| m.tag_name.clone())
            .collect()
    }

    /// 解析通道数
    ///
    /// 未配置时为 4；配置了但无法识别时返回 `Err(原始写法)`，由调用方记录告警并回退。
    pub fn resolve_channel_count(&self) -> std::result::Result<ChannelCount, String> {
        match &self.channel_count {
            None => Ok(ChannelCount::DEFAULT),
            Some(token) => token.resolve().ok_or_else(|| token.to_string()),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut model_names = HashSet::new();
        let mut tags = HashSet::new();
        for model in &self.models {
            if !model_names.insert(model.name.as_str()) {
                bail!("Model '{}' is defined more than once in project '{}'", model.name, self.name);
            }
            if !model.tag_name.is_empty() && !tags.insert(model.tag_name.as_str()) {
                bail!(
                    "Tag '{}' is used by more than one model in project '{}'",
                    model.tag_name,
                    self.name
                );
            }
            for channel in &model.channels {
                if channel.channel_name.trim().is_empty() {
                    bail!("Model '{}' has a channel without a name", model.name);
                }
                let unit = channel.unit.trim().to_ascii_lowercase();
                if !VALID_UNITS.contains(&unit.as_str()) {
                    bail!(
                        "Invalid unit '{}' for channel {}. Must be one of {:?}",
                        channel.unit,
                        channel.channel_name,
                        VALID_UNITS
                    );
                }
            }
        }
        Ok(())
    }
}

/// 通道数写法：整数或 `DAQ4CH` / `DAQ8CH` / `DAQ10CH` 之类的标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelCountToken {
    Number(i64),
    Text(String),
}

impl ChannelCountToken {
    /// 解析为受支持的通道数，无法识别时返回 `None`
    pub fn resolve(&self) -> Option<ChannelCount> {
        let n = match self {
            Self::Number(n) => *n,
            Self::Text(text) => {
                let text = text.trim();
                match text {
                    "DAQ4CH" => 4,
                    "DAQ8CH" => 8,
                    "DAQ10CH" => 10,
                    other => other.parse().ok()?,
                }
            },
        };
        u32::try_from(n).ok().and_then(|n| ChannelCount::try_from(n).ok())
    }
}

impl fmt::Display for ChannelCountToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

/// 型号（一台被测设备），通过 `tag_name` 与总线主题绑定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag_name: tag_name.into(),
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.channel_name.clone()).collect()
    }
}

fn default_unit() -> String {
    "mil".to_string()
}

fn default_channel_type() -> String {
    "Displacement".to_string()
}

fn default_coefficient() -> f64 {
    1.0
}

/// 通道描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(rename = "type", default = "default_channel_type")]
    pub channel_type: String,
    #[serde(default = "default_coefficient")]
    pub correction_value: f64,
    #[serde(default = "default_coefficient")]
    pub gain: f64,
    #[serde(default = "default_coefficient")]
    pub sensitivity: f64,
}

impl ChannelConfig {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            unit: default_unit(),
            channel_type: default_channel_type(),
            correction_value: 1.0,
            gain: 1.0,
            sensitivity: 1.0,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

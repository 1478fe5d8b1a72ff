//! 通道拓扑解析
//!
//! 主题 → (项目, 型号, tag, 通道数, 通道名)。项目配置由外部维护，可能在会话中途被修改，
//! 因此解析结果不做长期缓存：通道数只在一个批次内缓存，每个批次开始时清空。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;
use vibra_protocol::ChannelCount;
use vibra_tools::{ProjectCatalog, ProjectData};

use crate::error::ResolutionError;

/// 项目配置来源
pub trait ProjectSource: Send + Sync {
    /// 读取项目的当前配置（返回副本）
    fn project(&self, name: &str) -> Option<ProjectData>;
}

impl ProjectSource for ProjectCatalog {
    fn project(&self, name: &str) -> Option<ProjectData> {
        ProjectCatalog::project(self, name).cloned()
    }
}

impl<T: ProjectSource + ?Sized> ProjectSource for Arc<T> {
    fn project(&self, name: &str) -> Option<ProjectData> {
        (**self).project(name)
    }
}

/// 可在运行中修改的内存项目库
#[derive(Default)]
pub struct InMemoryProjects {
    projects: RwLock<HashMap<String, ProjectData>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: ProjectCatalog) -> Self {
        let projects = catalog
            .projects
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self {
            projects: RwLock::new(projects),
        }
    }

    /// 新增或替换项目
    pub fn upsert(&self, project: ProjectData) {
        self.projects.write().insert(project.name.clone(), project);
    }

    pub fn remove(&self, name: &str) -> Option<ProjectData> {
        self.projects.write().remove(name)
    }
}

impl ProjectSource for InMemoryProjects {
    fn project(&self, name: &str) -> Option<ProjectData> {
        self.projects.read().get(name).cloned()
    }
}

/// 主题解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub project: String,
    pub model: String,
    pub tag_name: String,
    pub channel_count: ChannelCount,
    pub channel_names: Vec<String>,
}

impl Topology {
    /// 第 `index` 个主通道的显示名，未配置时为 `Channel N`（从 1 开始）
    pub fn channel_name(&self, index: usize) -> String {
        self.channel_names
            .get(index)
            .filter(|name| !name.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Channel {}", index + 1))
    }
}

/// 解析项目的通道数
///
/// 未配置时为 4 通道；无法识别时返回 `InvalidChannelCount`，调用方回退到 4 通道。
pub fn channel_count_for(project: &ProjectData) -> Result<ChannelCount, ResolutionError> {
    project
        .resolve_channel_count()
        .map_err(|token| ResolutionError::InvalidChannelCount {
            project: project.name.clone(),
            token,
        })
}

/// 主题解析器（批处理线程独占）
pub struct Resolver {
    projects: Arc<dyn ProjectSource>,
    project: String,
    channel_counts: HashMap<String, ChannelCount>,
}

impl Resolver {
    pub fn new(projects: Arc<dyn ProjectSource>, project: impl Into<String>) -> Self {
        Self {
            projects,
            project: project.into(),
            channel_counts: HashMap::new(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project
    }

    /// 开始新的批次：丢弃上一批次缓存的通道数
    pub fn begin_cycle(&mut self) {
        self.channel_counts.clear();
    }

    /// 解析主题
    pub fn resolve(&mut self, topic: &str) -> Result<Topology, ResolutionError> {
        let project = self
            .projects
            .project(&self.project)
            .ok_or_else(|| ResolutionError::ProjectUnavailable(self.project.clone()))?;

        let model = project
            .model_for_tag(topic)
            .ok_or_else(|| ResolutionError::UnknownTopic(topic.to_string()))?;

        let channel_count = self.channel_count(&project);

        Ok(Topology {
            project: project.name.clone(),
            model: model.name.clone(),
            tag_name: model.tag_name.clone(),
            channel_count,
            channel_names: model.channel_names(),
        })
    }

    /// 本批次内的通道数（首次解析时记录告警）
    fn channel_count(&mut self, project: &ProjectData) -> ChannelCount {
        if let Some(count) = self.channel_counts.get(&project.name) {
            return *count;
        }
        let count = channel_count_for(project).unwrap_or_else(|e| {
            warn!("{}, defaulting to {}", e, ChannelCount::DEFAULT.get());
            ChannelCount::DEFAULT
        });
        self.channel_counts.insert(project.name.clone(), count);
        count
    }
}

/// 当前项目需要订阅的主题（去重，保持声明顺序）
pub fn subscription_topics(projects: &dyn ProjectSource, project: &str) -> Vec<String> {
    projects
        .project(project)
        .map(|p| p.tag_names())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibra_tools::{ChannelConfig, ChannelCountToken, ModelConfig};

    fn projects() -> Arc<InMemoryProjects> {
        let source = InMemoryProjects::new();
        source.upsert(
            ProjectData::new("Plant-1")
                .with_channel_count(ChannelCountToken::Text("DAQ4CH".into()))
                .with_model(
                    ModelConfig::new("ModelA", "sensors/a")
                        .with_channel(ChannelConfig::new("Bearing 1X"))
                        .with_channel(ChannelConfig::new("Bearing 1Y")),
                )
                .with_model(ModelConfig::new("ModelB", "sensors/b")),
        );
        Arc::new(source)
    }

    #[test]
    fn test_resolve_known_topic() {
        let mut resolver = Resolver::new(projects(), "Plant-1");
        let topology = resolver.resolve("sensors/a").unwrap();
        assert_eq!(topology.project, "Plant-1");
        assert_eq!(topology.model, "ModelA");
        assert_eq!(topology.tag_name, "sensors/a");
        assert_eq!(topology.channel_count, ChannelCount::Four);
        assert_eq!(topology.channel_name(1), "Bearing 1Y");
        assert_eq!(topology.channel_name(3), "Channel 4");
    }

    #[test]
    fn test_unknown_topic_and_missing_project() {
        let source = projects();
        let mut resolver = Resolver::new(source.clone(), "Plant-1");
        assert_eq!(
            resolver.resolve("sensors/zzz"),
            Err(ResolutionError::UnknownTopic("sensors/zzz".to_string()))
        );

        let mut resolver = Resolver::new(source, "Nope");
        assert_eq!(
            resolver.resolve("sensors/a"),
            Err(ResolutionError::ProjectUnavailable("Nope".to_string()))
        );
    }

    #[test]
    fn test_invalid_channel_count_defaults_to_four() {
        let source = InMemoryProjects::new();
        source.upsert(
            ProjectData::new("P")
                .with_channel_count(ChannelCountToken::Number(6))
                .with_model(ModelConfig::new("M", "t")),
        );
        let mut resolver = Resolver::new(Arc::new(source), "P");
        assert_eq!(resolver.resolve("t").unwrap().channel_count, ChannelCount::Four);
    }

    #[test]
    fn test_channel_count_cached_only_within_cycle() {
        let source = projects();
        let mut resolver = Resolver::new(source.clone(), "Plant-1");
        assert_eq!(resolver.resolve("sensors/a").unwrap().channel_count, ChannelCount::Four);

        // 项目在会话中途被修改
        let mut edited = source.project("Plant-1").unwrap();
        edited.channel_count = Some(ChannelCountToken::Text("DAQ10CH".into()));
        source.upsert(edited);

        assert_eq!(resolver.resolve("sensors/a").unwrap().channel_count, ChannelCount::Four);
        resolver.begin_cycle();
        assert_eq!(resolver.resolve("sensors/a").unwrap().channel_count, ChannelCount::Ten);
    }

    #[test]
    fn test_model_edits_visible_immediately() {
        let source = projects();
        let mut resolver = Resolver::new(source.clone(), "Plant-1");
        assert!(resolver.resolve("sensors/c").is_err());

        let edited = source
            .project("Plant-1")
            .unwrap()
            .with_model(ModelConfig::new("ModelC", "sensors/c"));
        source.upsert(edited);
        assert_eq!(resolver.resolve("sensors/c").unwrap().model, "ModelC");
    }

    #[test]
    fn test_subscription_topics() {
        let source = projects();
        assert_eq!(
            subscription_topics(source.as_ref(), "Plant-1"),
            vec!["sensors/a", "sensors/b"]
        );
        assert!(subscription_topics(source.as_ref(), "Nope").is_empty());
    }
}

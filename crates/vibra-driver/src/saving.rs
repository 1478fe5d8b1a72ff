//! 保存状态：型号 → 输出文件名
//!
//! 由应用线程通过 `start_saving` / `stop_saving` 修改，批处理线程每帧读取一次。

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct SavingState {
    filenames: RwLock<HashMap<String, String>>,
}

impl SavingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始保存；已在保存的型号会切换到新文件名，返回旧文件名
    pub fn start(&self, model: &str, filename: &str) -> Option<String> {
        self.filenames
            .write()
            .insert(model.to_string(), filename.to_string())
    }

    /// 停止保存，返回之前使用的文件名
    pub fn stop(&self, model: &str) -> Option<String> {
        self.filenames.write().remove(model)
    }

    pub fn filename_for(&self, model: &str) -> Option<String> {
        self.filenames.read().get(model).cloned()
    }

    pub fn is_saving(&self, model: &str) -> bool {
        self.filenames.read().contains_key(model)
    }

    /// 全部正在保存的 (型号, 文件名)，按型号排序
    pub fn active(&self) -> Vec<(String, String)> {
        let mut active: Vec<_> = self
            .filenames
            .read()
            .iter()
            .map(|(m, f)| (m.clone(), f.clone()))
            .collect();
        active.sort();
        active
    }
}

//! 运行记录持久化
//!
//! 每次运行写两个文件：`<run_id>.json`（机器可读）与 `<run_id>_summary.txt`（人类可读）。

use std::path::{Path, PathBuf};

use crate::core::AgentError;
use crate::outcome::{render_summary, ProcessingOutcome};

/// 写入后的文件位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedOutcome {
    pub record: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileOutcomeStore {
    dir: PathBuf,
}

impl FileOutcomeStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 写入记录与摘要；目录不存在时自动创建
    pub fn save(&self, outcome: &ProcessingOutcome) -> Result<PersistedOutcome, AgentError> {
        std::fs::create_dir_all(&self.dir)?;
        let record = self.dir.join(format!("{}.json", outcome.run_id));
        let summary = self.dir.join(format!("{}_summary.txt", outcome.run_id));
        std::fs::write(&record, serde_json::to_string_pretty(outcome)?)?;
        std::fs::write(&summary, render_summary(outcome))?;
        tracing::info!(record = %record.display(), "Outcome saved");
        Ok(PersistedOutcome { record, summary })
    }

    /// 按运行 id 读取记录；不存在时返回 None
    pub fn load(&self, run_id: &str) -> Result<Option<ProcessingOutcome>, AgentError> {
        let path = self.dir.join(format!("{run_id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

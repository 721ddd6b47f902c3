//! 载荷上下文：一次运行内待注入的二进制产物
//!
//! 产物 id 由引擎分配（`doc_<时间戳>_<8 位随机>`），调用方不自带 id。登记后纯内存访问。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// 产物标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 分配一个新 id
    pub fn generate() -> Self {
        let ts = chrono::Local::now().format("%Y%m%d%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("doc_{}_{}", ts, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一份已登记的产物
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub size: usize,
    pub path: Option<PathBuf>,
}

/// 登记回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReceipt {
    pub id: ArtifactId,
    pub filename: String,
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct PayloadContext {
    artifacts: HashMap<ArtifactId, Artifact>,
}

impl PayloadContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记产物；同 id 已存在时覆盖
    pub fn register(&mut self, id: ArtifactId, bytes: Vec<u8>, display_name: impl Into<String>) -> ArtifactReceipt {
        let filename = display_name.into();
        let size = bytes.len();
        let receipt = ArtifactReceipt {
            id: id.clone(),
            filename: filename.clone(),
            size,
        };
        self.artifacts.insert(
            id,
            Artifact {
                bytes,
                filename,
                size,
                path: None,
            },
        );
        receipt
    }

    /// 异步读取文件并以新分配的 id 登记，文件名取自路径
    pub async fn register_file(&mut self, path: &Path) -> std::io::Result<ArtifactReceipt> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let receipt = self.register(ArtifactId::generate(), bytes, filename);
        if let Some(a) = self.artifacts.get_mut(&receipt.id) {
            a.path = Some(path.to_path_buf());
        }
        Ok(receipt)
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn bytes_of(&self, id: &ArtifactId) -> Option<&[u8]> {
        self.artifacts.get(id).map(|a| a.bytes.as_slice())
    }

    pub fn filename_of(&self, id: &ArtifactId) -> Option<&str> {
        self.artifacts.get(id).map(|a| a.filename.as_str())
    }

    /// 产物字节的标准 base64 编码
    pub fn base64_of(&self, id: &ArtifactId) -> Option<String> {
        self.bytes_of(id).map(|b| STANDARD.encode(b))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut ctx = PayloadContext::new();
        let id = ArtifactId::new("doc_1");
        let receipt = ctx.register(id.clone(), b"%PDF-1.4".to_vec(), "claim.pdf");
        assert_eq!(receipt.size, 8);
        assert_eq!(ctx.bytes_of(&id), Some(&b"%PDF-1.4"[..]));
        assert_eq!(ctx.filename_of(&id), Some("claim.pdf"));
        assert_eq!(ctx.base64_of(&id).as_deref(), Some("JVBERi0xLjQ="));
    }

    #[test]
    fn test_unregistered_id_is_none() {
        let ctx = PayloadContext::new();
        let id = ArtifactId::new("missing");
        assert!(ctx.bytes_of(&id).is_none());
        assert!(ctx.filename_of(&id).is_none());
    }

    #[test]
    fn test_register_overwrites_same_id() {
        let mut ctx = PayloadContext::new();
        let id = ArtifactId::new("doc_1");
        ctx.register(id.clone(), vec![1, 2, 3], "a.pdf");
        ctx.register(id.clone(), vec![9], "b.pdf");
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.bytes_of(&id), Some(&[9u8][..]));
        assert_eq!(ctx.filename_of(&id), Some("b.pdf"));
    }

    #[tokio::test]
    async fn test_register_file_assigns_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motor_claim.txt");
        std::fs::write(&path, "Policy: P-1").unwrap();
        let mut ctx = PayloadContext::new();
        let receipt = ctx.register_file(&path).await.unwrap();
        assert_eq!(receipt.size, 11);
        assert!(receipt.id.as_str().starts_with("doc_"));
        assert_eq!(receipt.filename, "motor_claim.txt");
        assert_eq!(ctx.get(&receipt.id).unwrap().path.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_register_missing_file_is_io_error() {
        let mut ctx = PayloadContext::new();
        let err = ctx
            .register_file(Path::new("/nonexistent/claim.pdf"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ArtifactId::generate(), ArtifactId::generate());
    }
}

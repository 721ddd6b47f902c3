//! 文档转文本
//!
//! 真正的版面抽取服务是外部协作者，这里只定义接口与纯文本实现。

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No extractable text in {0}")]
    Empty(String),

    #[error("Unsupported document type: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// 返回文档的纯文本；空白文本视为失败
    async fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// UTF-8 文本文件抽取器（非法字节按替换字符处理）
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor {
    /// 允许的扩展名；为空时接受任何文件
    extensions: Vec<String>,
}

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = exts.into_iter().map(|e| e.into().to_lowercase()).collect();
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x == &e.to_lowercase()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let name = path.display().to_string();
        if !self.accepts(path) {
            return Err(ExtractError::Unsupported(name));
        }
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ExtractError::Empty(name));
        }
        tracing::debug!(path = %name, chars = text.chars().count(), "Extracted text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extracts_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claim.txt");
        std::fs::write(&path, "Policy number: P-1").unwrap();
        let text = PlainTextExtractor::new().extract(&path).await.unwrap();
        assert_eq!(text, "Policy number: P-1");
    }

    #[tokio::test]
    async fn test_blank_file_is_empty_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "  \n ").unwrap();
        let err = PlainTextExtractor::new().extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Empty(_)));
    }

    #[tokio::test]
    async fn test_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, "%PDF").unwrap();
        let err = PlainTextExtractor::new()
            .with_extensions(["txt", "md"])
            .extract(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = PlainTextExtractor::new()
            .extract(Path::new("/nonexistent/claim.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}

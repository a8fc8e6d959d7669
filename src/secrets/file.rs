//! `file://` secret source — reads a mounted secret file (e.g. a
//! Kubernetes secret volume or Docker secret).

use super::SecretSource;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;

pub struct FileSource;

#[async_trait]
impl SecretSource for FileSource {
    async fn resolve_file(&self, path: &str) -> Result<String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::secret(format!("reading secret file {path}: {e}")))?;
        let trimmed = contents.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            return Err(GatewayError::secret(format!("secret file is empty: {path}")));
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_and_trims_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "s3cr3t\n").unwrap();
        let source = FileSource;
        let value = source.resolve_file(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(value, "s3cr3t");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let source = FileSource;
        assert!(source.resolve_file("/nonexistent/path/to/secret").await.is_err());
    }
}

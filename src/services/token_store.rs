use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// OAuth token set as returned by the vendor's token endpoint. Overwritten
/// wholesale on every refresh, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Persists the last-known token set as JSON on disk. A missing or corrupt
/// file reads as "unauthenticated", never as a startup failure.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Option<TokenSet> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read token file; treating as unauthenticated"
                );
                return None;
            }
        };
        let token: TokenSet = match serde_json::from_str(&contents) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to parse token file; treating as unauthenticated"
                );
                return None;
            }
        };
        if token.access_token.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                "token file has empty access_token; treating as unauthenticated"
            );
            return None;
        }
        Some(token)
    }

    pub fn save(&self, token: &TokenSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create token directory {}", parent.display())
                })?;
            }
        }
        let contents = serde_json::to_string_pretty(token)?;
        let mut file = fs::File::create(&self.path)
            .with_context(|| format!("failed to create token file {}", self.path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("failed to write token file {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync token file {}", self.path.display()))?;
        Ok(())
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PublishError;
use crate::metadata::TokenUri;
use crate::publisher::{PublishedToken, list_images};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    Uploaded,
    Static,
}

/// Ordered token URIs handed to the contract deployment, plus where they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUriManifest {
    pub source: TokenSource,
    pub images_dir: Option<PathBuf>,
    pub token_uris: Vec<String>,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_name: String,
    pub image_uri: String,
    pub token_uri: String,
}

impl TokenUriManifest {
    pub fn from_published(images_dir: &Path, tokens: &[PublishedToken]) -> Self {
        let entries: Vec<ManifestEntry> = tokens
            .iter()
            .map(|t| ManifestEntry {
                file_name: t.file_name.clone(),
                image_uri: t.image_pin.uri(),
                token_uri: t.token_uri().to_string(),
            })
            .collect();

        Self {
            source: TokenSource::Uploaded,
            images_dir: Some(images_dir.to_path_buf()),
            token_uris: entries.iter().map(|e| e.token_uri.clone()).collect(),
            entries,
        }
    }

    /// Uses a precomputed list instead of uploading. Every URI must be `ipfs://<hash>`.
    pub fn from_static(uris: &[String]) -> Result<Self, PublishError> {
        if uris.is_empty() {
            return Err(PublishError::NoStaticTokenUris);
        }
        for (index, uri) in uris.iter().enumerate() {
            if TokenUri::parse(uri).is_none() {
                return Err(PublishError::InvalidTokenUri {
                    index,
                    uri: uri.clone(),
                });
            }
        }

        Ok(Self {
            source: TokenSource::Static,
            images_dir: None,
            token_uris: uris.to_vec(),
            entries: Vec::new(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("failed to read manifest {:?}", path))?;
        let manifest = serde_json::from_str(&text).with_context(|| format!("failed to parse manifest {:?}", path))?;
        Ok(manifest)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("failed to create directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        fs::write(path, json).with_context(|| format!("failed to write manifest {:?}", path))?;
        Ok(())
    }

    /// Lists everything wrong with the manifest. Empty means it is safe to deploy with.
    pub fn audit(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.token_uris.is_empty() {
            problems.push("manifest has no token URIs".to_string());
        }

        let mut seen = HashSet::new();
        for (i, uri) in self.token_uris.iter().enumerate() {
            if TokenUri::parse(uri).is_none() {
                problems.push(format!("token_uris[{}] is not an ipfs:// URI: {:?}", i, uri));
            }
            if !seen.insert(uri.as_str()) {
                problems.push(format!("token_uris[{}] is a duplicate: {}", i, uri));
            }
        }

        if self.source == TokenSource::Static {
            return problems;
        }

        if self.entries.len() != self.token_uris.len() {
            problems.push(format!(
                "{} entries but {} token URIs",
                self.entries.len(),
                self.token_uris.len()
            ));
        }
        for (i, (entry, uri)) in self.entries.iter().zip(&self.token_uris).enumerate() {
            if &entry.token_uri != uri {
                problems.push(format!(
                    "entries[{}] ({}) has token URI {} but token_uris[{}] is {}",
                    i, entry.file_name, entry.token_uri, i, uri
                ));
            }
            if TokenUri::parse(&entry.image_uri).is_none() {
                problems.push(format!(
                    "entries[{}] ({}) has an invalid image URI: {:?}",
                    i, entry.file_name, entry.image_uri
                ));
            }
        }

        let Some(dir) = &self.images_dir else {
            problems.push("uploaded manifest has no images_dir".to_string());
            return problems;
        };
        if !dir.exists() {
            // 画像ディレクトリが無い環境（CI 等）では並び順チェックを省略
            return problems;
        }
        match list_images(dir) {
            Ok(images) => {
                let listed: Vec<&str> = images.iter().map(|i| i.file_name.as_str()).collect();
                let recorded: Vec<&str> = self.entries.iter().map(|e| e.file_name.as_str()).collect();
                if listed != recorded {
                    problems.push(format!(
                        "entries do not match the current contents of {:?}: manifest {:?}, directory {:?}",
                        dir, recorded, listed
                    ));
                }
            },
            Err(err) => problems.push(err.to_string()),
        }

        problems
    }
}

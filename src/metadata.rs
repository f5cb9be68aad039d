use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;

use crate::config::MetadataConfig;
use crate::pinning::PinResponse;

pub const IPFS_SCHEME: &str = "ipfs://";
pub const DEFAULT_DESCRIPTION_TEMPLATE: &str = "A cute {name} NFT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: Value,
}

/// The single placeholder trait every token gets unless configured otherwise.
pub fn default_attributes() -> Vec<Attribute> {
    vec![Attribute {
        trait_type: "Cuteness".to_string(),
        value: json!(100),
    }]
}

/// `ipfs://<hash>` reference to pinned metadata, handed to the NFT contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenUri(String);

impl TokenUri {
    pub fn from_hash(hash: &str) -> Self {
        Self(format!("{}{}", IPFS_SCHEME, hash))
    }

    /// Accepts only `ipfs://<hash>` with a non-empty hash free of whitespace
    /// and path separators.
    pub fn parse(uri: &str) -> Option<Self> {
        let hash = uri.strip_prefix(IPFS_SCHEME)?;
        if hash.is_empty() || hash.contains(|c: char| c.is_whitespace() || c == '/') {
            return None;
        }
        Some(Self(uri.to_string()))
    }

    pub fn hash(&self) -> &str {
        &self.0[IPFS_SCHEME.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ファイル名から拡張子を除いた表示名
pub fn display_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

/// Builds the metadata record for one pinned image.
pub fn build_metadata(file_name: &str, image_pin: &PinResponse, template: &MetadataConfig) -> NftMetadata {
    let name = display_name(file_name);
    let description = template.description_template.replace("{name}", &name);

    NftMetadata {
        name,
        description,
        image: image_pin.uri(),
        attributes: template.attributes.clone(),
    }
}

use anyhow::{Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::metadata::{Attribute, DEFAULT_DESCRIPTION_TEMPLATE, default_attributes};

/// Environment variable that overrides `upload` when set.
pub const UPLOAD_ENV: &str = "UPLOAD_TO_PINATA";

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!(
                "retry.initial_backoff_ms ({}) is larger than retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }
        Ok(())
    }

    /// Whether images should be pinned, taking `UPLOAD_TO_PINATA` into account.
    pub fn upload_enabled(&self) -> bool {
        upload_flag(self.upload, std::env::var(UPLOAD_ENV).ok().as_deref())
    }
}

/// An explicit environment value wins over the configured flag; only the exact
/// string `"true"` turns uploads on.
pub fn upload_flag(configured: bool, env_value: Option<&str>) -> bool {
    match env_value {
        Some(value) => value == "true",
        None => configured,
    }
}


#[derive(Debug, Deserialize)]
pub struct Config {
    pub images_dir: PathBuf,
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub static_token_uris: Vec<String>,
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub pinata: PinataConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinataConfig {
    #[serde(default = "defaults::api_url")]
    pub api_url: String,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PinataConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

/// Bounded exponential backoff for transient pinning failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, the first one included.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            initial_backoff_ms: defaults::initial_backoff_ms(),
            max_backoff_ms: defaults::max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// `{name}` is replaced with the image name.
    #[serde(default = "defaults::description_template")]
    pub description_template: String,
    #[serde(default = "default_attributes")]
    pub attributes: Vec<Attribute>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            description_template: defaults::description_template(),
            attributes: default_attributes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "defaults::manifest_path")]
    pub manifest_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            manifest_path: defaults::manifest_path(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn concurrency() -> usize {
        1
    }

    pub fn api_url() -> String {
        "https://api.pinata.cloud".into()
    }

    pub fn timeout_secs() -> u64 {
        60
    }

    pub fn max_attempts() -> u32 {
        3
    }

    pub fn initial_backoff_ms() -> u64 {
        500
    }

    pub fn max_backoff_ms() -> u64 {
        8_000
    }

    pub fn description_template() -> String {
        super::DEFAULT_DESCRIPTION_TEMPLATE.into()
    }

    pub fn manifest_path() -> PathBuf {
        PathBuf::from("output/token_uris.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_yaml("images_dir: ./images/randomNFT\n").unwrap();

        assert_eq!(cfg.images_dir, PathBuf::from("./images/randomNFT"));
        assert!(!cfg.upload);
        assert!(cfg.static_token_uris.is_empty());
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.pinata.api_url, "https://api.pinata.cloud");
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.metadata.description_template, "A cute {name} NFT");
        assert_eq!(cfg.metadata.attributes.len(), 1);
        assert_eq!(cfg.metadata.attributes[0].trait_type, "Cuteness");
        assert_eq!(cfg.metadata.attributes[0].value, json!(100));
        assert_eq!(cfg.output.manifest_path, PathBuf::from("output/token_uris.json"));
    }

    #[test]
    fn full_config_is_read() {
        let yaml = r#"
images_dir: images
upload: true
concurrency: 4
static_token_uris:
  - ipfs://QmXoNKwExBqXyidtzmqiwBbGeLZpMYS7K2Pcph4TUbDcUx
pinata:
  api_url: http://localhost:9999
  timeout_secs: 5
retry:
  max_attempts: 5
  initial_backoff_ms: 10
  max_backoff_ms: 100
metadata:
  description_template: "{name}, a very good dog"
  attributes:
    - trait_type: Fluffiness
      value: high
output:
  manifest_path: out/uris.json
"#;
        let cfg = Config::from_yaml(yaml).unwrap();

        assert!(cfg.upload);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.static_token_uris.len(), 1);
        assert_eq!(cfg.pinata.api_url, "http://localhost:9999");
        assert_eq!(cfg.pinata.timeout_secs, 5);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.metadata.attributes[0].value, json!("high"));
        assert_eq!(cfg.output.manifest_path, PathBuf::from("out/uris.json"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(Config::from_yaml("images_dir: x\nconcurrency: 0\n").is_err());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let yaml = "images_dir: x\nretry:\n  initial_backoff_ms: 10\n  max_backoff_ms: 1\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn missing_images_dir_is_an_error() {
        assert!(Config::from_yaml("upload: true\n").is_err());
    }

    #[test]
    fn env_value_overrides_configured_flag() {
        assert!(upload_flag(true, None));
        assert!(!upload_flag(false, None));
        assert!(upload_flag(false, Some("true")));
        assert!(!upload_flag(false, Some(" TRUE ")));
        assert!(!upload_flag(false, Some("True")));
        assert!(!upload_flag(true, Some("false")));
        assert!(!upload_flag(true, Some("1")));
    }
}

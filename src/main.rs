use nft_metadata_publisher::config::Config;
use nft_metadata_publisher::manifest::TokenUriManifest;
use nft_metadata_publisher::pinning::{PinataClient, PinataCredentials, Retrying};
use nft_metadata_publisher::publisher::Publisher;

use anyhow::{Context, Result};
use log::info;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let cfg = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;

    let manifest = if cfg.upload_enabled() {
        upload(&cfg)?
    } else {
        info!(
            "Uploads disabled, using {} static token URIs",
            cfg.static_token_uris.len()
        );
        TokenUriManifest::from_static(&cfg.static_token_uris)?
    };

    manifest.write(&cfg.output.manifest_path)?;

    info!(
        "Wrote {} token URIs to {:?}",
        manifest.token_uris.len(),
        cfg.output.manifest_path
    );
    for uri in &manifest.token_uris {
        println!("{}", uri);
    }

    Ok(())
}

/// 画像とメタデータを Pinata にアップロードしてマニフェストを作る
fn upload(cfg: &Config) -> Result<TokenUriManifest> {
    let credentials = PinataCredentials::from_env()?;
    let client = PinataClient::new(
        &cfg.pinata.api_url,
        credentials,
        Duration::from_secs(cfg.pinata.timeout_secs),
    )
    .context("failed to build the Pinata client")?;
    let service = Retrying::new(client, cfg.retry.clone());

    let tokens = Publisher::new(&service, &cfg.metadata)
        .with_concurrency(cfg.concurrency)
        .publish(&cfg.images_dir)
        .with_context(|| format!("publishing {:?} failed, nothing was written", cfg.images_dir))?;

    Ok(TokenUriManifest::from_published(&cfg.images_dir, &tokens))
}

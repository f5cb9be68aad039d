use anyhow::{Context, Result};
use nft_metadata_publisher::config::Config;
use nft_metadata_publisher::manifest::{TokenSource, TokenUriManifest};
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());

    // 設定が読めなくても既定のパスでチェックする
    let manifest_path = Config::load(&config_path)
        .map(|c| c.output.manifest_path)
        .unwrap_or_else(|_| PathBuf::from("output/token_uris.json"));

    let manifest = TokenUriManifest::load(&manifest_path)
        .with_context(|| format!("failed to read manifest {:?}", manifest_path))?;

    println!("==============================");
    println!(" Token URI Manifest Check");
    println!(" Manifest: {:?}", manifest_path);
    println!(
        " Source: {}",
        match manifest.source {
            TokenSource::Uploaded => "uploaded",
            TokenSource::Static => "static",
        }
    );
    println!(" Token URIs: {}", manifest.token_uris.len());
    println!("==============================\n");

    for (i, entry) in manifest.entries.iter().enumerate() {
        println!("  #{:<4} {:30} {}", i, entry.file_name, entry.token_uri);
    }
    if manifest.entries.is_empty() {
        for (i, uri) in manifest.token_uris.iter().enumerate() {
            println!("  #{:<4} {}", i, uri);
        }
    }
    println!();

    let problems = manifest.audit();
    if problems.is_empty() {
        println!("✅ No problems found");
        return Ok(());
    }

    println!("❌ {} problems found:", problems.len());
    for problem in &problems {
        println!("  - {}", problem);
    }
    std::process::exit(1);
}

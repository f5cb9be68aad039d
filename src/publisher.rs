//! Image directory -> pinned images -> pinned metadata -> token URIs.

use log::{debug, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::MetadataConfig;
use crate::error::PublishError;
use crate::metadata::{NftMetadata, TokenUri, build_metadata};
use crate::pinning::{PinResponse, PinningService};

/// One image found in the source directory. `index` is its position in the
/// listing and therefore the token id the contract will associate with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub index: usize,
    pub file_name: String,
    pub path: PathBuf,
}

/// Everything produced for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedToken {
    pub file_name: String,
    pub image_pin: PinResponse,
    pub metadata: NftMetadata,
    pub metadata_pin: PinResponse,
}

impl PublishedToken {
    pub fn token_uri(&self) -> TokenUri {
        TokenUri::from_hash(&self.metadata_pin.ipfs_hash)
    }
}

/// ディレクトリ直下のファイルをファイル名順に列挙（隠しファイルは除外）
pub fn list_images(dir: &Path) -> Result<Vec<ImageAsset>, PublishError> {
    let not_found = |source| PublishError::NotFound {
        path: dir.to_path_buf(),
        source,
    };

    let meta = fs::metadata(dir).map_err(not_found)?;
    if !meta.is_dir() {
        return Err(not_found(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not a directory",
        )));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| not_found(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        // ファイル名は Pinata に送るので UTF-8 必須。黙って飛ばすとトークン番号がずれる
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            return Err(PublishError::NotFound {
                path: entry.path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            });
        };
        if file_name.starts_with('.') {
            debug!("Skipping hidden file {}", file_name);
            continue;
        }

        images.push(ImageAsset {
            index: images.len(),
            file_name,
            path: entry.into_path(),
        });
    }

    Ok(images)
}

/// Lazily pins each listed image in order. Every item is either the pin for
/// that image or the error that stopped it; nothing is skipped.
pub struct ImageUploads<'a, S: ?Sized> {
    service: &'a S,
    assets: std::vec::IntoIter<ImageAsset>,
}

impl<S: PinningService + ?Sized> Iterator for ImageUploads<'_, S> {
    type Item = Result<(ImageAsset, PinResponse), PublishError>;

    fn next(&mut self) -> Option<Self::Item> {
        let asset = self.assets.next()?;
        Some(upload_image(self.service, &asset).map(|pin| (asset, pin)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.assets.size_hint()
    }
}

fn upload_image<S: PinningService + ?Sized>(service: &S, asset: &ImageAsset) -> Result<PinResponse, PublishError> {
    info!("Uploading {} to Pinata...", asset.file_name);

    let content = fs::read(&asset.path).map_err(|source| PublishError::NotFound {
        path: asset.path.clone(),
        source,
    })?;
    let pin = service
        .pin_file(&asset.file_name, content)
        .map_err(|source| PublishError::Upload {
            file: asset.file_name.clone(),
            source,
        })?;

    debug!("{} -> {}", asset.file_name, pin.uri());
    Ok(pin)
}

pub struct Publisher<'a, S: ?Sized> {
    service: &'a S,
    template: &'a MetadataConfig,
    concurrency: usize,
}

impl<'a, S: PinningService + ?Sized> Publisher<'a, S> {
    pub fn new(service: &'a S, template: &'a MetadataConfig) -> Self {
        Self {
            service,
            template,
            concurrency: 1,
        }
    }

    /// Number of images in flight at once. `1` keeps the run strictly sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fails with [`PublishError::NotFound`] before any upload when `dir` is missing.
    pub fn upload_images(&self, dir: &Path) -> Result<ImageUploads<'a, S>, PublishError> {
        let assets = list_images(dir)?;
        info!("Uploading {} images from {:?} to Pinata...", assets.len(), dir);
        Ok(ImageUploads {
            service: self.service,
            assets: assets.into_iter(),
        })
    }

    /// The record is pinned under `<name>.json`, which is also the name
    /// reported on failure. [`Publisher::publish`] reports the image file instead.
    pub fn upload_metadata(&self, metadata: &NftMetadata) -> Result<PinResponse, PublishError> {
        let pin_name = format!("{}.json", metadata.name);
        let content = serde_json::to_value(metadata).map_err(|source| PublishError::Serialization {
            file: pin_name.clone(),
            source,
        })?;

        info!("Uploading metadata {}...", pin_name);
        self.service
            .pin_json(&pin_name, &content)
            .map_err(|source| PublishError::Upload { file: pin_name, source })
    }

    /// Pins every image and its metadata. The result has one entry per image,
    /// in listing order, or is the first error encountered.
    pub fn publish(&self, dir: &Path) -> Result<Vec<PublishedToken>, PublishError> {
        let tokens = if self.concurrency == 1 {
            self.upload_images(dir)?
                .map(|uploaded| uploaded.and_then(|(asset, pin)| self.complete(asset, pin)))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let assets = list_images(dir)?;
            info!(
                "Uploading {} images from {:?} to Pinata with {} workers...",
                assets.len(),
                dir,
                self.concurrency
            );
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.concurrency)
                .build()?;
            // Indexed collect keeps listing order regardless of completion order.
            pool.install(|| {
                assets
                    .into_par_iter()
                    .map(|asset| {
                        let pin = upload_image(self.service, &asset)?;
                        self.complete(asset, pin)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?
        };

        info!("Published {} tokens", tokens.len());
        Ok(tokens)
    }

    pub fn publish_all(&self, dir: &Path) -> Result<Vec<TokenUri>, PublishError> {
        let tokens = self.publish(dir)?;
        Ok(tokens.iter().map(PublishedToken::token_uri).collect())
    }

    fn complete(&self, asset: ImageAsset, image_pin: PinResponse) -> Result<PublishedToken, PublishError> {
        let metadata = build_metadata(&asset.file_name, &image_pin, self.template);
        // Report the image, not the `<name>.json` pin name: stems can collide.
        let metadata_pin = self.upload_metadata(&metadata).map_err(|err| match err {
            PublishError::Upload { source, .. } => PublishError::Upload {
                file: asset.file_name.clone(),
                source,
            },
            PublishError::Serialization { source, .. } => PublishError::Serialization {
                file: asset.file_name.clone(),
                source,
            },
            other => other,
        })?;

        Ok(PublishedToken {
            file_name: asset.file_name,
            image_pin,
            metadata,
            metadata_pin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinning::PinError;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Hashes are derived from the pinned name; names in `failing` are rejected.
    #[derive(Default)]
    struct FakePinata {
        calls: Mutex<Vec<String>>,
        pinned_json: Mutex<Vec<Value>>,
        failing: HashSet<String>,
    }

    impl FakePinata {
        fn failing_on(name: &str) -> Self {
            Self {
                failing: [name.to_string()].into_iter().collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn pin(&self, name: &str) -> Result<PinResponse, PinError> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.failing.contains(name) {
                return Err(PinError::RequestFailedWithStatus {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(PinResponse {
                ipfs_hash: format!("Qm-{}", name),
                pin_size: name.len() as u64,
                timestamp: "2022-06-01T10:00:00.000Z".to_string(),
            })
        }
    }

    impl PinningService for FakePinata {
        fn pin_file(&self, name: &str, _content: Vec<u8>) -> Result<PinResponse, PinError> {
            self.pin(name)
        }

        fn pin_json(&self, name: &str, content: &Value) -> Result<PinResponse, PinError> {
            self.pinned_json.lock().unwrap().push(content.clone());
            self.pin(name)
        }
    }

    fn image_dir(names: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        dir
    }

    #[test]
    fn pug_and_shiba() {
        let dir = image_dir(&["shiba.png", "pug.png"]);
        let service = FakePinata::default();
        let template = MetadataConfig::default();

        let uris = Publisher::new(&service, &template).publish_all(dir.path()).unwrap();

        assert_eq!(
            uris,
            vec![TokenUri::from_hash("Qm-pug.json"), TokenUri::from_hash("Qm-shiba.json")]
        );
        assert_eq!(service.calls(), vec!["pug.png", "pug.json", "shiba.png", "shiba.json"]);

        let pinned = service.pinned_json.lock().unwrap();
        assert_eq!(pinned[0]["name"], "pug");
        assert_eq!(pinned[0]["description"], "A cute pug NFT");
        assert_eq!(pinned[0]["image"], "ipfs://Qm-pug.png");
        assert_eq!(pinned[1]["name"], "shiba");
        assert_eq!(pinned[1]["description"], "A cute shiba NFT");
        assert_eq!(pinned[1]["image"], "ipfs://Qm-shiba.png");
    }

    #[test]
    fn one_token_uri_per_image() {
        let names: Vec<String> = (0..12).map(|i| format!("dog-{:02}.png", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = image_dir(&refs);
        let service = FakePinata::default();
        let template = MetadataConfig::default();

        let tokens = Publisher::new(&service, &template).publish(dir.path()).unwrap();

        assert_eq!(tokens.len(), names.len());
        for (token, name) in tokens.iter().zip(&names) {
            assert_eq!(&token.file_name, name);
            assert_eq!(token.metadata.image, token.image_pin.uri());
        }
    }

    #[test]
    fn missing_directory_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("randomNFT");
        let service = FakePinata::default();
        let template = MetadataConfig::default();

        let err = Publisher::new(&service, &template).publish_all(&missing).unwrap_err();

        assert!(matches!(err, PublishError::NotFound { .. }));
        assert!(service.calls().is_empty());
    }

    #[test]
    fn a_file_is_not_a_directory() {
        let dir = image_dir(&["pug.png"]);
        let err = list_images(&dir.path().join("pug.png")).unwrap_err();
        assert!(matches!(err, PublishError::NotFound { .. }));
    }

    #[test]
    fn failure_on_second_image_aborts_the_run() {
        let dir = image_dir(&["a-pug.png", "b-shiba.png", "c-st-bernard.png"]);
        let service = FakePinata::failing_on("b-shiba.png");
        let template = MetadataConfig::default();

        let err = Publisher::new(&service, &template).publish_all(dir.path()).unwrap_err();

        assert!(matches!(err, PublishError::Upload { .. }));
        assert_eq!(err.file(), Some("b-shiba.png"));
        assert!(!service.calls().contains(&"c-st-bernard.png".to_string()));
    }

    #[test]
    fn metadata_failure_names_the_image() {
        let dir = image_dir(&["pug.png"]);
        let service = FakePinata::failing_on("pug.json");
        let template = MetadataConfig::default();

        let err = Publisher::new(&service, &template).publish(dir.path()).unwrap_err();
        assert!(matches!(err, PublishError::Upload { .. }));
        assert_eq!(err.file(), Some("pug.png"));
    }

    #[test]
    fn metadata_failure_with_shared_stem_names_the_first_image() {
        let dir = image_dir(&["pug.jpg", "pug.png"]);
        let service = FakePinata::failing_on("pug.json");
        let template = MetadataConfig::default();

        let err = Publisher::new(&service, &template).publish(dir.path()).unwrap_err();

        assert_eq!(err.file(), Some("pug.jpg"));
        assert_eq!(service.calls(), vec!["pug.jpg", "pug.json"]);
    }

    #[test]
    fn upload_metadata_alone_names_the_record() {
        let service = FakePinata::failing_on("pug.json");
        let template = MetadataConfig::default();
        let image_pin = PinResponse {
            ipfs_hash: "QmPug".to_string(),
            pin_size: 1,
            timestamp: "2022-06-01T10:00:00.000Z".to_string(),
        };
        let metadata = build_metadata("pug.png", &image_pin, &template);

        let err = Publisher::new(&service, &template).upload_metadata(&metadata).unwrap_err();
        assert_eq!(err.file(), Some("pug.json"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_file_name_aborts_the_listing() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = image_dir(&["a.png", "c.png"]);
        let bad = dir.path().join(OsStr::from_bytes(b"b\xff.png"));
        if fs::write(&bad, b"b").is_err() {
            // some filesystems (e.g. macOS APFS) refuse non UTF-8 names
            return;
        }
        let service = FakePinata::default();
        let template = MetadataConfig::default();

        let err = Publisher::new(&service, &template).publish_all(dir.path()).unwrap_err();

        match err {
            PublishError::NotFound { path, source } => {
                assert_eq!(path, bad);
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(service.calls().is_empty());
    }

    #[test]
    fn upload_images_is_lazy() {
        let dir = image_dir(&["a.png", "b.png", "c.png"]);
        let service = FakePinata::default();
        let template = MetadataConfig::default();

        let mut uploads = Publisher::new(&service, &template).upload_images(dir.path()).unwrap();
        assert!(service.calls().is_empty());
        assert_eq!(uploads.size_hint(), (3, Some(3)));

        let (asset, pin) = uploads.next().unwrap().unwrap();
        assert_eq!(asset.index, 0);
        assert_eq!(asset.file_name, "a.png");
        assert_eq!(pin.ipfs_hash, "Qm-a.png");
        assert_eq!(service.calls(), vec!["a.png"]);
    }

    #[test]
    fn upload_images_reports_failures_in_place() {
        let dir = image_dir(&["a.png", "b.png", "c.png"]);
        let service = FakePinata::failing_on("b.png");
        let template = MetadataConfig::default();

        let results: Vec<_> = Publisher::new(&service, &template)
            .upload_images(dir.path())
            .unwrap()
            .collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().file(), Some("b.png"));
        assert_eq!(results[2].as_ref().unwrap().0.file_name, "c.png");
    }

    #[test]
    fn hidden_files_and_subdirectories_are_skipped() {
        let dir = image_dir(&["pug.png", ".DS_Store"]);
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.png"), b"x").unwrap();

        let images = list_images(dir.path()).unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].file_name, "pug.png");
    }

    #[test]
    fn empty_directory_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = FakePinata::default();
        let template = MetadataConfig::default();

        let uris = Publisher::new(&service, &template).publish_all(dir.path()).unwrap();
        assert!(uris.is_empty());
    }

    #[test]
    fn parallel_run_keeps_listing_order() {
        let names: Vec<String> = (0..20).map(|i| format!("dog-{:02}.png", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = image_dir(&refs);
        let template = MetadataConfig::default();

        let sequential_service = FakePinata::default();
        let sequential = Publisher::new(&sequential_service, &template)
            .publish_all(dir.path())
            .unwrap();

        let parallel_service = FakePinata::default();
        let parallel = Publisher::new(&parallel_service, &template)
            .with_concurrency(4)
            .publish_all(dir.path())
            .unwrap();

        assert_eq!(parallel, sequential);
        assert_eq!(parallel_service.calls().len(), 40);
    }

    #[test]
    fn parallel_run_fails_as_a_whole() {
        let dir = image_dir(&["a.png", "b.png", "c.png", "d.png"]);
        let service = FakePinata::failing_on("c.json");
        let template = MetadataConfig::default();

        let err = Publisher::new(&service, &template)
            .with_concurrency(3)
            .publish_all(dir.path())
            .unwrap_err();

        assert_eq!(err.file(), Some("c.png"));
    }
}

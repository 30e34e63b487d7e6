//! Artifact openers: turn a source location into a byte stream.
//!
//! | Tag       | Opener            | Locations                          |
//! |-----------|-------------------|------------------------------------|
//! | `!file`   | [`FileOpener`]    | `file:<path>` or a bare path       |
//! | `!bundle` | [`BundleOpener`]  | `bundle:<path>` under a bundle dir |
//! | `!url`    | [`UrlOpener`]     | `http://` and `https://` URLs      |
//! | `!s3`     | [`S3Opener`]      | `s3://bucket/key`, or a bare key   |
//! | `!string` | [`StringOpener`]  | keys of an in-memory table         |
//!
//! [`SchemeOpener`] is used when a manifest does not pick one explicitly; it
//! dispatches on the location's scheme.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::sync::OnceCell;
use tokio_util::io::StreamReader;

use crate::error::CoreError;
use crate::serialization::TagRegistry;

/// Readable contents of one artifact.
pub type ArtifactStream = Pin<Box<dyn AsyncRead + Send>>;

/// Opens a byte stream for a source location.
#[async_trait]
pub trait ArtifactOpener: Send + Sync {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError>;
}

fn cannot_open(location: &str, cause: impl std::fmt::Display) -> CoreError {
    CoreError::Sandbox(format!("Cannot open '{location}': {cause}"))
}

async fn open_file(location: &str, path: &Path) -> Result<ArtifactStream, CoreError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| cannot_open(location, e))?;
    Ok(Box::pin(file))
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

/// Local filesystem; relative paths resolve against `base` when set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileOpener {
    #[serde(default)]
    pub base: Option<PathBuf>,
}

#[async_trait]
impl ArtifactOpener for FileOpener {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError> {
        let path = Path::new(location.strip_prefix("file:").unwrap_or(location));
        let path = match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        };
        open_file(location, &path).await
    }
}

// ---------------------------------------------------------------------------
// Deployment bundle
// ---------------------------------------------------------------------------

/// Resources shipped with the deployment under one root directory.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleOpener {
    pub root: PathBuf,
}

#[async_trait]
impl ArtifactOpener for BundleOpener {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError> {
        let name = location.strip_prefix("bundle:").unwrap_or(location);
        let relative = super::resolver::normalize(name)
            .ok_or_else(|| cannot_open(location, "not a relative bundle path"))?;
        open_file(location, &self.root.join(relative)).await
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// HTTP(S) download, streamed as it arrives.
#[derive(Debug, Clone, Default)]
pub struct UrlOpener {
    client: reqwest::Client,
}

#[async_trait]
impl ArtifactOpener for UrlOpener {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| cannot_open(location, e))?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

/// S3 objects. Bare keys are looked up in `bucket`; the client is built on
/// first use from the ambient AWS configuration, with `region` overriding it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Opener {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(skip)]
    client: OnceCell<aws_sdk_s3::Client>,
}

impl S3Opener {
    pub fn new(bucket: Option<String>, region: Option<String>) -> Self {
        Self {
            bucket,
            region,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &aws_sdk_s3::Client {
        self.client
            .get_or_init(|| async {
                let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
                if let Some(region) = &self.region {
                    loader = loader.region(aws_config::Region::new(region.clone()));
                }
                aws_sdk_s3::Client::new(&loader.load().await)
            })
            .await
    }
}

/// Split an S3 location into bucket and key.
fn s3_object<'a>(location: &'a str, bucket: Option<&'a str>) -> Option<(&'a str, &'a str)> {
    match location.strip_prefix("s3://") {
        Some(rest) => {
            let (bucket, key) = rest.split_once('/')?;
            (!bucket.is_empty() && !key.is_empty()).then_some((bucket, key))
        }
        None => {
            let key = location.trim_start_matches('/');
            bucket.filter(|_| !key.is_empty()).map(|bucket| (bucket, key))
        }
    }
}

#[async_trait]
impl ArtifactOpener for S3Opener {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError> {
        let (bucket, key) = s3_object(location, self.bucket.as_deref())
            .ok_or_else(|| cannot_open(location, "not an s3://bucket/key location"))?;
        let object = self
            .client()
            .await
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| cannot_open(location, aws_sdk_s3::error::DisplayErrorContext(e)))?;
        tracing::debug!(bucket, key, "Opened S3 object");
        Ok(Box::pin(object.body.into_async_read()))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Fixed contents keyed by location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StringOpener {
    #[serde(default)]
    pub contents: HashMap<String, String>,
}

impl StringOpener {
    pub fn with(mut self, location: impl Into<String>, contents: impl Into<String>) -> Self {
        self.contents.insert(location.into(), contents.into());
        self
    }
}

#[async_trait]
impl ArtifactOpener for StringOpener {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError> {
        let contents = self
            .contents
            .get(location)
            .ok_or_else(|| cannot_open(location, "no such entry"))?;
        Ok(Box::pin(Cursor::new(contents.clone().into_bytes())))
    }
}

// ---------------------------------------------------------------------------
// Scheme dispatch
// ---------------------------------------------------------------------------

/// Picks an opener from the location's scheme; bare paths are files.
#[derive(Debug, Clone, Default)]
pub struct SchemeOpener {
    file: FileOpener,
    bundle: Option<BundleOpener>,
    url: UrlOpener,
    s3: S3Opener,
}

impl SchemeOpener {
    pub fn new(bundle_dir: Option<PathBuf>) -> Self {
        Self {
            file: FileOpener::default(),
            bundle: bundle_dir.map(|root| BundleOpener { root }),
            url: UrlOpener::default(),
            s3: S3Opener::default(),
        }
    }
}

#[async_trait]
impl ArtifactOpener for SchemeOpener {
    async fn open(&self, location: &str) -> Result<ArtifactStream, CoreError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.url.open(location).await
        } else if location.starts_with("s3://") {
            self.s3.open(location).await
        } else if location.starts_with("bundle:") {
            match &self.bundle {
                Some(bundle) => bundle.open(location).await,
                None => Err(cannot_open(location, "no bundle directory configured")),
            }
        } else {
            self.file.open(location).await
        }
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct BundleConfig {
    #[serde(default)]
    root: Option<PathBuf>,
}

/// Tag registry for `opener:` values in sandbox manifests.
///
/// `!bundle` without an explicit `root` uses `bundle_dir`.
pub fn opener_tags(
    bundle_dir: Option<PathBuf>,
) -> Result<TagRegistry<Arc<dyn ArtifactOpener>>, CoreError> {
    let mut tags: TagRegistry<Arc<dyn ArtifactOpener>> = TagRegistry::new("artifact opener");

    tags.register("file", |config| {
        let opener: FileOpener = crate::serialization::from_tagged(config)?;
        Ok(Arc::new(opener) as Arc<dyn ArtifactOpener>)
    })?;
    tags.register("bundle", move |config| {
        let config: BundleConfig = crate::serialization::from_tagged(config)?;
        let root = config
            .root
            .or_else(|| bundle_dir.clone())
            .ok_or_else(|| CoreError::Validation("!bundle opener needs a root".to_string()))?;
        Ok(Arc::new(BundleOpener { root }) as Arc<dyn ArtifactOpener>)
    })?;
    tags.register("url", |_| Ok(Arc::new(UrlOpener::default()) as Arc<dyn ArtifactOpener>))?;
    tags.register("s3", |config| {
        let opener: S3Opener = crate::serialization::from_tagged(config)?;
        Ok(Arc::new(opener) as Arc<dyn ArtifactOpener>)
    })?;
    tags.register("string", |config| {
        let opener: StringOpener = crate::serialization::from_tagged(config)?;
        Ok(Arc::new(opener) as Arc<dyn ArtifactOpener>)
    })?;

    Ok(tags)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

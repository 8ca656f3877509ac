//! Object storage access.
//!
//! `ObjectStore` is the narrow surface the remote destination and the
//! listing command need: a metadata probe, a file upload, and a prefix
//! listing. `AwsCliStore` drives the `aws` command line tool the same way
//! the rest of the crate drives `git`, so credentials resolve through the
//! CLI's standard chain (profile, environment, instance role).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;

use crate::error::{truncate_diagnostic, Error, Result, MAX_DIAGNOSTIC_LEN};

/// User metadata attached to an uploaded object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Server-side encryption applied to every upload.
pub const SERVER_SIDE_ENCRYPTION: &str = "AES256";

/// What a store knows about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Minimal object storage interface.
pub trait ObjectStore: Send + Sync {
    /// Human readable location, e.g. `s3://bucket`.
    fn location(&self) -> String;

    /// Metadata probe. `Ok(None)` means the object does not exist.
    fn head(&self, key: &str) -> Result<Option<ObjectInfo>>;

    /// Uploads `path` under `key` with server-side encryption.
    fn put_file(&self, path: &Path, key: &str, metadata: &ObjectMetadata) -> Result<()>;

    /// Every object whose key starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;
}

/// `ObjectStore` backed by the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    bucket: String,
    region: String,
    profile: Option<String>,
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HeadObjectResponse {
    #[serde(default)]
    content_length: u64,
    #[serde(default)]
    last_modified: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsResponse {
    #[serde(default)]
    contents: Vec<ListedObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    last_modified: Option<String>,
}

impl AwsCliStore {
    pub fn new(bucket: &str, region: &str, profile: Option<&str>) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            profile: profile.map(str::to_string),
            program: PathBuf::from("aws"),
        }
    }

    /// Uses a different `aws` executable.
    pub fn with_program<P: AsRef<Path>>(mut self, program: P) -> Self {
        self.program = program.as_ref().to_path_buf();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn aws(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--region", &self.region]);
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile]);
        }
        cmd
    }

    fn run(&self, mut cmd: Command, key: &str, description: &str) -> Result<Output> {
        debug!("[S3] {} {}", description, key);
        cmd.output().map_err(|e| Error::ObjectStore {
            key: key.to_string(),
            message: format!("cannot run {}: {}", self.program.display(), e),
        })
    }
}

impl ObjectStore for AwsCliStore {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let mut cmd = self.aws();
        cmd.args(["s3api", "head-object", "--output", "json"])
            .args(["--bucket", &self.bucket])
            .args(["--key", key]);
        let output = self.run(cmd, key, "head-object")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(Error::ObjectStore {
                key: key.to_string(),
                message: truncate_diagnostic(&stderr, MAX_DIAGNOSTIC_LEN),
            });
        }

        let response: HeadObjectResponse = serde_json::from_slice(&output.stdout)?;
        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: response.content_length,
            modified_at: response.last_modified.as_deref().and_then(parse_timestamp),
        }))
    }

    fn put_file(&self, path: &Path, key: &str, metadata: &ObjectMetadata) -> Result<()> {
        let mut cmd = self.aws();
        cmd.args(["s3", "cp", "--only-show-errors"])
            .arg(path)
            .arg(format!("s3://{}/{}", self.bucket, key))
            .args(["--sse", SERVER_SIDE_ENCRYPTION])
            .arg("--metadata")
            .arg(serde_json::to_string(metadata)?);
        let output = self.run(cmd, key, "cp")?;

        if !output.status.success() {
            return Err(Error::ObjectStore {
                key: key.to_string(),
                message: truncate_diagnostic(
                    &String::from_utf8_lossy(&output.stderr),
                    MAX_DIAGNOSTIC_LEN,
                ),
            });
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut cmd = self.aws();
        cmd.args(["s3api", "list-objects-v2", "--output", "json"])
            .args(["--bucket", &self.bucket])
            .args(["--prefix", prefix]);
        let output = self.run(cmd, prefix, "list-objects-v2")?;

        if !output.status.success() {
            return Err(Error::ObjectStore {
                key: prefix.to_string(),
                message: truncate_diagnostic(
                    &String::from_utf8_lossy(&output.stderr),
                    MAX_DIAGNOSTIC_LEN,
                ),
            });
        }
        parse_listing(&output.stdout)
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("Not Found") || stderr.contains("(404)") || stderr.contains("NoSuchKey")
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Parses `list-objects-v2` JSON output. An empty listing prints nothing.
fn parse_listing(stdout: &[u8]) -> Result<Vec<ObjectInfo>> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let response: ListObjectsResponse = serde_json::from_slice(stdout)?;
    Ok(response
        .contents
        .into_iter()
        .map(|object| ObjectInfo {
            modified_at: object.last_modified.as_deref().and_then(parse_timestamp),
            key: object.key,
            size: object.size,
        })
        .collect())
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    metadata: ObjectMetadata,
    modified_at: DateTime<Utc>,
}

/// Thread-safe in-process `ObjectStore`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_puts: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose uploads always fail.
    pub fn failing() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            fail_puts: true,
        }
    }

    /// Stores raw bytes under `key`, bypassing upload checks.
    pub fn insert(&self, key: &str, bytes: &[u8]) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    bytes: bytes.to_vec(),
                    metadata: ObjectMetadata::new(),
                    modified_at: Utc::now(),
                },
            );
        }
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.metadata.clone()))
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.bytes.clone()))
    }

    fn poisoned(key: &str) -> Error {
        Error::ObjectStore {
            key: key.to_string(),
            message: "in-memory store lock poisoned".to_string(),
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn location(&self) -> String {
        "memory://".to_string()
    }

    fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned(key))?;
        Ok(objects.get(key).map(|object| ObjectInfo {
            key: key.to_string(),
            size: object.bytes.len() as u64,
            modified_at: Some(object.modified_at),
        }))
    }

    fn put_file(&self, path: &Path, key: &str, metadata: &ObjectMetadata) -> Result<()> {
        if self.fail_puts {
            return Err(Error::ObjectStore {
                key: key.to_string(),
                message: "upload rejected".to_string(),
            });
        }
        let bytes = fs::read(path)?;
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned(key))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                metadata: metadata.clone(),
                modified_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned(prefix))?;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.bytes.len() as u64,
                modified_at: Some(object.modified_at),
            })
            .collect())
    }
}

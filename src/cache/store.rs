//! On-disk artifact store
//!
//! One file per cache key, grouped by owning function:
//!
//! ```text
//! <root>/<function-dir>/<key>.bin
//! ```
//!
//! Each file is a bincode-encoded header followed by the encoded
//! value, so listings and sweeps only read the header. Writes go to a unique
//! temp file in the same directory and are renamed into place; readers see
//! either no artifact or a complete one, and concurrent writers of the same
//! key resolve as last-writer-wins.

use crate::cache::fingerprint::{CacheKey, FunctionId};
use crate::cache::retention::RetentionPolicy;
use crate::error::{CacheError, CacheResult};
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Artifact file extension
const ARTIFACT_EXT: &str = "bin";

/// Prefix of in-flight temp files; never listed as artifacts
const TEMP_PREFIX: &str = ".tmp";

/// Bumped whenever the header layout changes; older files read as corrupt
const FORMAT_VERSION: u32 = 1;

/// Metadata written ahead of every persisted value
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactHeader {
    version: u32,
    function: String,
    key: String,
    created_at: DateTime<Utc>,
    retention_days: u32,
}

/// Metadata of one persisted artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    /// Key the artifact is stored under
    pub key: CacheKey,
    /// Qualified name of the owning function
    pub function: String,
    /// When the value was written
    pub created_at: DateTime<Utc>,
    /// Retention window the artifact was written with
    pub retention: RetentionPolicy,
    /// Size of the artifact file in bytes
    pub size_bytes: u64,
    /// Location on disk
    pub path: PathBuf,
}

/// A persisted value together with its metadata
#[derive(Debug, Clone)]
pub struct Artifact<T> {
    pub meta: ArtifactMeta,
    pub value: T,
}

/// One file found while enumerating the store
#[derive(Debug, Clone)]
pub enum ArtifactEntry {
    /// Header read successfully
    Valid(ArtifactMeta),
    /// File exists but its header could not be decoded
    Corrupt { path: PathBuf, reason: String },
    /// File or function directory that could not be opened
    Inaccessible { path: PathBuf, reason: String },
}

impl ArtifactEntry {
    pub fn path(&self) -> &Path {
        match self {
            Self::Valid(meta) => &meta.path,
            Self::Corrupt { path, .. } | Self::Inaccessible { path, .. } => path,
        }
    }
}

/// Directory-backed store of function results
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            CacheError::io(format!("creating cache directory {}", root.display()), e)
        })?;
        debug!("Opened artifact store at {}", root.display());
        Ok(Self { root })
    }

    /// Base directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one function's artifacts
    pub fn function_dir(&self, function: &FunctionId) -> PathBuf {
        self.root.join(function.dir_name())
    }

    fn artifact_path(&self, function: &FunctionId, key: &CacheKey) -> PathBuf {
        self.function_dir(function).join(format!("{}.{}", key, ARTIFACT_EXT))
    }

    /// Persist `value` under `key`, stamped with the current time
    pub fn put<T: Serialize + ?Sized>(
        &self,
        function: &FunctionId,
        key: &CacheKey,
        retention: RetentionPolicy,
        value: &T,
    ) -> CacheResult<ArtifactMeta> {
        self.put_at(function, key, retention, value, Utc::now())
    }

    /// Persist `value` under `key` with an explicit creation time
    ///
    /// Overwrites any artifact already stored under the key.
    pub fn put_at<T: Serialize + ?Sized>(
        &self,
        function: &FunctionId,
        key: &CacheKey,
        retention: RetentionPolicy,
        value: &T,
        created_at: DateTime<Utc>,
    ) -> CacheResult<ArtifactMeta> {
        let dir = self.function_dir(function);
        fs::create_dir_all(&dir)
            .map_err(|e| CacheError::io(format!("creating directory {}", dir.display()), e))?;

        let header = ArtifactHeader {
            version: FORMAT_VERSION,
            function: function.qualified(),
            key: key.to_string(),
            created_at,
            retention_days: retention.n_days(),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&dir)
            .map_err(|e| CacheError::io(format!("creating temp file in {}", dir.display()), e))?;

        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let encode = |e: bincode::Error| CacheError::Encode {
                function: function.qualified(),
                reason: e.to_string(),
            };
            bincode::serialize_into(&mut writer, &header).map_err(&encode)?;
            bincode::serialize_into(&mut writer, value).map_err(&encode)?;
            writer
                .flush()
                .map_err(|e| CacheError::io("flushing artifact", e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io("syncing artifact", e))?;

        let path = self.artifact_path(function, key);
        let file = tmp.persist(&path).map_err(|e| {
            CacheError::io(format!("renaming artifact into {}", path.display()), e.error)
        })?;
        let size_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);

        debug!("Stored {} artifact {} ({} bytes)", function, key, size_bytes);
        Ok(ArtifactMeta {
            key: key.clone(),
            function: header.function,
            created_at,
            retention,
            size_bytes,
            path,
        })
    }

    /// Load the artifact stored under `key`
    ///
    /// Returns `None` when nothing is stored. Undecodable artifacts are
    /// deleted and reported as `None`; artifacts that cannot be opened are
    /// left in place and also reported as `None`.
    pub fn get<T: DeserializeOwned>(
        &self,
        function: &FunctionId,
        key: &CacheKey,
    ) -> Option<Artifact<T>> {
        let path = self.artifact_path(function, key);
        match read_artifact(&path, function, key) {
            Ok(artifact) => Some(artifact),
            Err(ReadFailure::Missing) => None,
            Err(ReadFailure::Unavailable(reason)) => {
                warn!("Cannot open artifact {}: {}", path.display(), reason);
                None
            }
            Err(ReadFailure::Corrupt(reason)) => {
                warn!("Discarding unreadable artifact {}: {}", path.display(), reason);
                if let Err(e) = remove_artifact(&path) {
                    warn!("{}", e);
                }
                None
            }
        }
    }

    /// Check whether an artifact file exists for `key`
    pub fn contains(&self, function: &FunctionId, key: &CacheKey) -> bool {
        self.artifact_path(function, key).is_file()
    }

    /// Delete the artifact for `key`; returns whether one existed
    pub fn delete(&self, function: &FunctionId, key: &CacheKey) -> CacheResult<bool> {
        remove_artifact(&self.artifact_path(function, key))
    }

    /// List metadata for every readable artifact of `function`
    pub fn list_for_function(&self, function: &FunctionId) -> CacheResult<Vec<ArtifactMeta>> {
        let mut metas: Vec<_> = artifact_files(&self.function_dir(function))?
            .into_iter()
            .filter_map(read_entry)
            .filter_map(|entry| match entry {
                ArtifactEntry::Valid(meta) => Some(meta),
                ArtifactEntry::Corrupt { path, reason }
                | ArtifactEntry::Inaccessible { path, reason } => {
                    debug!("Skipping unreadable artifact {}: {}", path.display(), reason);
                    None
                }
            })
            .collect();

        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(metas)
    }

    /// Delete every artifact of `function`, readable or not; returns the count removed
    pub fn delete_all_for_function(&self, function: &FunctionId) -> CacheResult<usize> {
        let dir = self.function_dir(function);
        let mut removed = 0;

        for path in artifact_files(&dir)? {
            if remove_artifact(&path)? {
                removed += 1;
            }
        }
        remove_dir_if_empty(&dir);

        Ok(removed)
    }

    /// Enumerate every artifact file under the store root
    ///
    /// Only an unreadable root is an error. Function directories that cannot
    /// be read are reported as [`ArtifactEntry::Inaccessible`].
    pub fn list_all(&self) -> CacheResult<Vec<ArtifactEntry>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(CacheError::io(
                    format!("reading cache directory {}", self.root.display()),
                    e,
                ))
            }
        };

        let mut found = vec![];
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Unreadable entry in {}: {}", self.root.display(), e);
                    found.push(ArtifactEntry::Inaccessible {
                        path: self.root.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !path.is_dir() {
                continue;
            }
            match artifact_files(&path) {
                Ok(files) => found.extend(files.into_iter().filter_map(read_entry)),
                Err(e) => {
                    warn!("{}", e);
                    found.push(ArtifactEntry::Inaccessible {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(found)
    }

    /// Remove function directories that no longer hold anything
    pub(crate) fn prune_function_dirs(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                remove_dir_if_empty(&path);
            }
        }
    }
}

enum ReadFailure {
    Missing,
    /// Could not be opened; says nothing about the contents
    Unavailable(String),
    Corrupt(String),
}

/// Decoder matching `bincode::serialize_into`, bounded by the file size
fn decode_options(limit: u64) -> impl Options {
    bincode::options()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
}

fn read_artifact<T: DeserializeOwned>(
    path: &Path,
    function: &FunctionId,
    key: &CacheKey,
) -> Result<Artifact<T>, ReadFailure> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReadFailure::Missing),
        Err(e) => return Err(ReadFailure::Unavailable(e.to_string())),
    };
    let size_bytes = file
        .metadata()
        .map_err(|e| ReadFailure::Unavailable(e.to_string()))?
        .len();
    let mut reader = BufReader::new(file);

    let header = read_header(&mut reader, size_bytes).map_err(ReadFailure::Corrupt)?;
    if header.key != key.as_str() || header.function != function.qualified() {
        return Err(ReadFailure::Corrupt(format!(
            "header names {} / {}",
            header.function, header.key
        )));
    }

    let value: T = decode_options(size_bytes)
        .deserialize_from(&mut reader)
        .map_err(|e| ReadFailure::Corrupt(e.to_string()))?;

    Ok(Artifact {
        meta: header.into_meta(key.clone(), path.to_path_buf(), size_bytes),
        value,
    })
}

fn read_header(reader: &mut impl io::Read, limit: u64) -> Result<ArtifactHeader, String> {
    let header: ArtifactHeader = decode_options(limit)
        .deserialize_from(reader)
        .map_err(|e| e.to_string())?;
    if header.version != FORMAT_VERSION {
        return Err(format!("unsupported artifact version {}", header.version));
    }
    Ok(header)
}

/// Classify one artifact file; `None` if it vanished before it was opened
fn read_entry(path: PathBuf) -> Option<ArtifactEntry> {
    let opened = File::open(&path).and_then(|file| {
        let size_bytes = file.metadata()?.len();
        Ok((file, size_bytes))
    });
    let (file, size_bytes) = match opened {
        Ok(opened) => opened,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            let reason = e.to_string();
            return Some(ArtifactEntry::Inaccessible { path, reason });
        }
    };

    let decoded = read_header(&mut BufReader::new(file), size_bytes).and_then(|header| {
        let key = CacheKey::from_hex(&header.key)
            .ok_or_else(|| format!("malformed key {:?}", header.key))?;
        Ok((header, key))
    });

    Some(match decoded {
        Ok((header, key)) => ArtifactEntry::Valid(header.into_meta(key, path, size_bytes)),
        Err(reason) => ArtifactEntry::Corrupt { path, reason },
    })
}

impl ArtifactHeader {
    fn into_meta(self, key: CacheKey, path: PathBuf, size_bytes: u64) -> ArtifactMeta {
        ArtifactMeta {
            key,
            function: self.function,
            created_at: self.created_at,
            retention: RetentionPolicy::days(self.retention_days),
            size_bytes,
            path,
        }
    }
}

/// Artifact files directly inside `dir`; a missing directory has none
fn artifact_files(dir: &Path) -> CacheResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(CacheError::io(
                format!("reading directory {}", dir.display()),
                e,
            ))
        }
    };

    let mut files = vec![];
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io("reading directory entry", e))?;
        let path = entry.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TEMP_PREFIX));
        if !is_temp && path.is_file() && path.extension().is_some_and(|ext| ext == ARTIFACT_EXT) {
            files.push(path);
        }
    }

    Ok(files)
}

/// Remove one artifact file; `Ok(false)` when it was already gone
pub(crate) fn remove_artifact(path: &Path) -> CacheResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(
            format!("removing artifact {}", path.display()),
            e,
        )),
    }
}

fn remove_dir_if_empty(dir: &Path) {
    // fails on non-empty directories
    let _ = fs::remove_dir(dir);
}

//! Persistent null distribution of (max, min) statistics
//!
//! A cache is an append-only sequence of rows addressed by a [`CacheKey`]. Row 0
//! is the observed statistic's own extrema; row k ≥ 1 comes from permutation k.
//!
//! The file store keeps one JSON-lines log per key:
//!
//! ```text
//! {"schema_version":1,"key":"...","seed":0}
//! [3.91,-2.75]
//! [2.12,-3.40]
//! ```
//!
//! Infinite extrema are spelled `"inf"` / `"-inf"` since JSON has no literal for
//! them. Every append writes exactly one complete line under an exclusive lock
//! and syncs it before returning; readers take a shared lock, so they see a
//! prefix of the rows.

use crate::correction::ThresholdSet;
use crate::design::{ComparisonContext, DesignKind, DesignSpecification, Entities};
use crate::error::{CacheCorruptionError, InferenceError, Result};
use fs4::fs_std::FileExt;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Version of the on-disk log layout
pub const SCHEMA_VERSION: u32 = 1;

/// Hex digits of the design digest kept in the key
const DIGEST_LEN: usize = 16;

/// Readable key prefix kept in file names
const FILE_STEM_LEN: usize = 96;

/// One null distribution row: extrema of a statistic matrix's off-diagonal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullRow {
    pub max: f64,
    pub min: f64,
}

impl NullRow {
    pub fn new(max: f64, min: f64) -> Self {
        Self { max, min }
    }
}

/// Identity of one null distribution
///
/// Built from the comparison label, design kind, descriptor, the entity filters
/// (pair-making entities removed) and a SHA-256 digest of the full design
/// specification. The permutation count is not part of the key so targets can
/// be extended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub label: String,
    pub design: DesignKind,
    pub descriptor: String,
    pub entities: Entities,
    pub digest: String,
}

impl CacheKey {
    pub fn derive(ctx: &ComparisonContext, spec: &DesignSpecification) -> Self {
        let mut entities = ctx.entities.clone();
        for key in spec.pair_making_entities() {
            entities.remove(&key);
        }

        let canonical = serde_json::to_vec(spec).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(&canonical));

        Self {
            label: ctx.label.clone(),
            design: spec.kind(),
            descriptor: ctx.descriptor.clone(),
            entities,
            digest: digest[..DIGEST_LEN].to_string(),
        }
    }

    /// File stem of this key's files inside a cache directory
    ///
    /// A sanitized prefix of the key for humans, then a digest of the full key so
    /// keys that sanitize alike still get their own files.
    pub fn file_stem(&self) -> String {
        let name = self.to_string();
        let readable: String = name
            .chars()
            .take(FILE_STEM_LEN)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        format!("{}_{}", readable, &digest[..DIGEST_LEN])
    }

    /// File name of this key's log inside a cache directory
    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.file_stem())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_desc-{}", self.label, self.design, self.descriptor)?;
        for (key, value) in &self.entities {
            write!(f, "_{}-{}", key, value)?;
        }
        write!(f, "_{}", self.digest)
    }
}

/// In-memory view of one null distribution
#[derive(Debug, Clone, PartialEq)]
pub struct NullDistributionCache {
    seed: u64,
    rows: Vec<NullRow>,
}

impl NullDistributionCache {
    /// Fresh cache holding only the observed extrema
    pub fn seeded(seed: u64, observed: NullRow) -> Self {
        Self {
            seed,
            rows: vec![observed],
        }
    }

    pub fn from_rows(seed: u64, rows: Vec<NullRow>) -> Self {
        Self { seed, rows }
    }

    /// Base seed the permutations were drawn with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rows(&self) -> &[NullRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: NullRow) {
        self.rows.push(row);
    }

    pub fn max_values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.max).collect()
    }

    pub fn min_values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.min).collect()
    }

    /// Permuted rows, excluding the observed seed row
    pub fn n_permutations(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

/// A cache read back from a store
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCache {
    pub cache: NullDistributionCache,
    /// A partially written final line was ignored
    pub torn_tail: bool,
}

/// Result of a conditional append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The store no longer has the expected length; nothing was written
    Conflict { current_len: usize },
}

/// Persistence for null distributions
///
/// `append` writes `row` as row number `index` only if the stored cache has
/// exactly `index` rows. Appending row 0 creates the cache.
pub trait CacheStore {
    fn load(&self, key: &CacheKey) -> Result<Option<LoadedCache>>;

    fn append(&self, key: &CacheKey, seed: u64, index: usize, row: NullRow)
        -> Result<AppendOutcome>;

    /// Replace the stored cache wholesale (recovery and compaction)
    fn rewrite(&self, key: &CacheKey, cache: &NullDistributionCache) -> Result<()>;

    /// Keep the thresholds derived from the cache next to it, for provenance
    fn record_thresholds(&self, key: &CacheKey, thresholds: &ThresholdSet) -> Result<()>;
}

/// Process-local cache store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: Mutex<HashMap<CacheKey, NullDistributionCache>>,
    thresholds: Mutex<HashMap<CacheKey, serde_json::Value>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn caches(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, NullDistributionCache>> {
        locked(&self.caches)
    }

    /// Snapshot of a stored cache
    pub fn get(&self, key: &CacheKey) -> Option<NullDistributionCache> {
        self.caches().get(key).cloned()
    }

    /// Last recorded `thresholds.json` document for `key`
    pub fn thresholds(&self, key: &CacheKey) -> Option<serde_json::Value> {
        locked(&self.thresholds).get(key).cloned()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, key: &CacheKey) -> Result<Option<LoadedCache>> {
        Ok(self.get(key).map(|cache| LoadedCache {
            cache,
            torn_tail: false,
        }))
    }

    fn append(
        &self,
        key: &CacheKey,
        seed: u64,
        index: usize,
        row: NullRow,
    ) -> Result<AppendOutcome> {
        let mut caches = self.caches();
        let current_len = caches.get(key).map_or(0, NullDistributionCache::len);
        if current_len != index {
            return Ok(AppendOutcome::Conflict { current_len });
        }
        caches
            .entry(key.clone())
            .or_insert_with(|| NullDistributionCache::from_rows(seed, Vec::new()))
            .push(row);
        Ok(AppendOutcome::Appended)
    }

    fn rewrite(&self, key: &CacheKey, cache: &NullDistributionCache) -> Result<()> {
        self.caches().insert(key.clone(), cache.clone());
        Ok(())
    }

    fn record_thresholds(&self, key: &CacheKey, thresholds: &ThresholdSet) -> Result<()> {
        locked(&self.thresholds).insert(key.clone(), thresholds.to_thresholds_json());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    schema_version: u32,
    key: String,
    seed: u64,
}

/// Store keeping one JSON-lines log per key in a directory
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Use `dir` for cache logs, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Provenance JSON written next to the key's log
    pub fn thresholds_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.thresholds.json", key.file_stem()))
    }

    /// Open (creating) the key's log and take the exclusive lock
    fn open_locked(&self, key: &CacheKey) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path(key))?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

/// Row value in the log; non-finite values are written as strings
#[derive(Debug, Clone, Copy, PartialEq)]
struct LogValue(f64);

impl Serialize for LogValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let value = self.0;
        if value.is_finite() {
            serializer.serialize_f64(value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

struct LogValueVisitor;

impl<'de> Visitor<'de> for LogValueVisitor {
    type Value = LogValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, \"inf\", \"-inf\" or \"nan\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<LogValue, E> {
        Ok(LogValue(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<LogValue, E> {
        Ok(LogValue(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<LogValue, E> {
        Ok(LogValue(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<LogValue, E> {
        match v {
            "inf" => Ok(LogValue(f64::INFINITY)),
            "-inf" => Ok(LogValue(f64::NEG_INFINITY)),
            "nan" => Ok(LogValue(f64::NAN)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for LogValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(LogValueVisitor)
    }
}

fn header_line(key: &CacheKey, seed: u64) -> Result<String> {
    let header = Header {
        schema_version: SCHEMA_VERSION,
        key: key.to_string(),
        seed,
    };
    let mut line = serde_json::to_string(&header).map_err(std::io::Error::from)?;
    line.push('\n');
    Ok(line)
}

fn row_line(row: NullRow) -> Result<String> {
    let mut line = serde_json::to_string(&(LogValue(row.max), LogValue(row.min)))
        .map_err(std::io::Error::from)?;
    line.push('\n');
    Ok(line)
}

/// Length of the complete-line prefix of `content`
fn complete_prefix(content: &str) -> usize {
    content.rfind('\n').map_or(0, |i| i + 1)
}

/// Parse the header line and check it belongs to `key`
///
/// A header naming another key is a conflict, not corruption: the file holds
/// some other comparison's rows and must not be rewritten.
fn parse_header(text: &str, key: &CacheKey) -> Result<Header> {
    let header: Header =
        serde_json::from_str(text).map_err(|e| CacheCorruptionError::Malformed {
            line: 1,
            reason: e.to_string(),
        })?;
    if header.schema_version != SCHEMA_VERSION {
        return Err(CacheCorruptionError::SchemaVersion {
            expected: SCHEMA_VERSION,
            found: header.schema_version,
        }
        .into());
    }
    let expected = key.to_string();
    if header.key != expected {
        return Err(InferenceError::CacheKeyConflict {
            expected,
            found: header.key,
        });
    }
    Ok(header)
}

/// Parse a log, ignoring a final line without its newline
///
/// `None` when no line is complete yet (a log whose first append never finished).
fn parse_log(content: &str, key: &CacheKey) -> Result<Option<LoadedCache>> {
    let prefix = complete_prefix(content);
    let torn_tail = prefix < content.len();
    let mut lines = content[..prefix].lines();

    let Some(header_text) = lines.next() else {
        return Ok(None);
    };
    let header = parse_header(header_text, key)?;

    let rows = lines
        .enumerate()
        .map(|(i, text)| {
            serde_json::from_str::<(LogValue, LogValue)>(text)
                .map(|(max, min)| NullRow::new(max.0, min.0))
                .map_err(|e| CacheCorruptionError::Malformed {
                    line: i + 2,
                    reason: e.to_string(),
                })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Err(CacheCorruptionError::Malformed {
            line: 2,
            reason: "missing observed row".to_string(),
        }
        .into());
    }

    Ok(Some(LoadedCache {
        cache: NullDistributionCache::from_rows(header.seed, rows),
        torn_tail,
    }))
}

impl CacheStore for FileCacheStore {
    fn load(&self, key: &CacheKey) -> Result<Option<LoadedCache>> {
        let mut file = match File::open(self.path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let content = read_log(&mut file)?;
        parse_log(&content, key)
    }

    fn append(
        &self,
        key: &CacheKey,
        seed: u64,
        index: usize,
        row: NullRow,
    ) -> Result<AppendOutcome> {
        let mut file = self.open_locked(key)?;

        let content = read_log(&mut file)?;
        let prefix = complete_prefix(&content);
        let mut lines = content[..prefix].lines();
        let mut text = match lines.next() {
            Some(header) => {
                parse_header(header, key)?;
                String::new()
            }
            None => header_line(key, seed)?,
        };
        let current_len = lines.count();
        if current_len != index {
            return Ok(AppendOutcome::Conflict { current_len });
        }
        text.push_str(&row_line(row)?);

        if prefix < content.len() {
            file.set_len(prefix as u64)?;
        }
        file.seek(SeekFrom::Start(prefix as u64))?;
        write_synced(&mut file, text.as_bytes())?;
        Ok(AppendOutcome::Appended)
    }

    /// Rewrites in place under the exclusive lock, so writers waiting on the
    /// lock append to the same file afterwards
    fn rewrite(&self, key: &CacheKey, cache: &NullDistributionCache) -> Result<()> {
        let mut text = header_line(key, cache.seed())?;
        for row in cache.rows() {
            text.push_str(&row_line(*row)?);
        }

        let mut file = self.open_locked(key)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write_synced(&mut file, text.as_bytes())?;
        Ok(())
    }

    fn record_thresholds(&self, key: &CacheKey, thresholds: &ThresholdSet) -> Result<()> {
        thresholds.write_thresholds_json(self.thresholds_path(key))
    }
}

/// Whole log as text; invalid UTF-8 is corruption, not an IO failure
fn read_log(file: &mut File) -> Result<String> {
    let mut content = String::new();
    match file.read_to_string(&mut content) {
        Ok(_) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(CacheCorruptionError::Malformed {
                line: 0,
                reason: e.to_string(),
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write and flush to disk; the lock is released when the file is dropped
fn write_synced(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

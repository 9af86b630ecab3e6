//! Content addressed, on-disk memoization of expensive pipeline stages.
//!
//! An entry is keyed by a 64-bit FNV-1a hash over the cache format version, the identity of
//! the computation, its parameters and a digest of its inputs, so any change to these yields
//! a new key and stale entries are never read. Entries are JSON files named by the key in
//! hexadecimal. The directory is trimmed to its size limit, oldest entries first, when the
//! cache is closed.
use efish_common::{
    ChannelSeries,
    metrics::{
        cache_lookups::{self, LookupResult},
        failures::{self, FailureKind},
        names::{CACHE_LOOKUPS, FAILURES},
    },
};
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fmt::{self, Display, Formatter},
    fs::{self, File},
    hash::Hasher,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Incremented whenever the layout of a cached value changes.
pub(crate) const CACHE_FORMAT_VERSION: u32 = 1;

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub(crate) enum CacheError {
    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// 64-bit FNV-1a hasher.
#[derive(Debug, Clone)]
pub(crate) struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
}

impl Default for Fnv1a {
    fn default() -> Self {
        Self(Self::OFFSET_BASIS)
    }
}

impl Hasher for Fnv1a {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Implemented by inputs whose content identifies a cached computation.
pub(crate) trait ContentDigest {
    fn digest(&self, hasher: &mut Fnv1a);
}

impl ContentDigest for ChannelSeries {
    fn digest(&self, hasher: &mut Fnv1a) {
        for (shot, sample) in self.rows() {
            hasher.write(&shot.to_le_bytes());
            hasher.write(&sample.time.to_bits().to_le_bytes());
            hasher.write(&sample.amplitude.to_bits().to_le_bytes());
        }
    }
}

/// Identifies a set of files by their paths, lengths and modification times.
#[derive(Debug, Clone)]
pub(crate) struct FileSet(Vec<PathBuf>);

impl FileSet {
    pub(crate) fn new(mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        Self(paths)
    }

    /// Digests the current state of the files.
    ///
    /// Any file that cannot be inspected is an error, as its content would go unaccounted.
    pub(crate) fn state_digest(&self, hasher: &mut Fnv1a) -> Result<(), CacheError> {
        for path in &self.0 {
            let metadata = fs::metadata(path).map_err(CacheError::io(path))?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_nanos())
                .unwrap_or_default();
            hasher.write(path.to_string_lossy().as_bytes());
            hasher.write(&metadata.len().to_le_bytes());
            hasher.write(&modified.to_le_bytes());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey(u64);

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CacheOptions {
    pub(crate) directory: PathBuf,
    /// Upper bound on the total size of the entries, in bytes, enforced on close.
    pub(crate) size_limit: u64,
}

/// Summary of a cache's use, returned when it is closed.
#[derive(Default, Debug, Clone, PartialEq)]
pub(crate) struct CacheStats {
    pub(crate) hits: u64,
    pub(crate) misses: u64,
    pub(crate) evicted: usize,
    pub(crate) size: u64,
}

struct Entry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

pub(crate) struct Cache {
    directory: PathBuf,
    size_limit: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    /// Opens the cache, creating its directory if necessary.
    #[instrument(skip_all, fields(directory = %options.directory.display()), err(level = "error"))]
    pub(crate) fn open(options: &CacheOptions) -> Result<Self, CacheError> {
        fs::create_dir_all(&options.directory).map_err(CacheError::io(&options.directory))?;
        Ok(Self {
            directory: options.directory.clone(),
            size_limit: options.size_limit,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Derives the key of a computation.
    /// # Parameters
    /// - function: identifies the computation.
    /// - parameters: every setting which affects the result.
    /// - input: the digest of the computation's inputs.
    pub(crate) fn key<P: Serialize>(
        function: &str,
        parameters: &P,
        input: u64,
    ) -> Result<CacheKey, CacheError> {
        let mut hasher = Fnv1a::default();
        hasher.write(&CACHE_FORMAT_VERSION.to_le_bytes());
        hasher.write(function.as_bytes());
        hasher.write(&serde_json::to_vec(parameters)?);
        hasher.write(&input.to_le_bytes());
        Ok(CacheKey(hasher.finish()))
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn record_lookup(&self, result: LookupResult) {
        match result {
            LookupResult::Hit => self.hits.fetch_add(1, Ordering::Relaxed),
            LookupResult::Miss => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        counter!(CACHE_LOOKUPS, &[cache_lookups::get_label(result)]).increment(1);
    }

    /// Reads an entry, if present.
    ///
    /// An entry which cannot be read or decoded is removed and treated as absent.
    pub(crate) fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let path = self.entry_path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => {
                self.record_lookup(LookupResult::Miss);
                return None;
            }
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(value) => {
                debug!(%key, "Cache hit");
                self.record_lookup(LookupResult::Hit);
                Some(value)
            }
            Err(e) => {
                warn!(%key, "Removing corrupt cache entry: {e}");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(%key, "Failed to remove corrupt cache entry: {e}");
                }
                self.record_lookup(LookupResult::Miss);
                None
            }
        }
    }

    /// Writes an entry, replacing any existing entry with the same key.
    ///
    /// The value is written to a temporary file first and renamed into place, so readers never
    /// observe a partial entry.
    pub(crate) fn put<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let temporary = path.with_extension("tmp");
        let file = File::create(&temporary).map_err(CacheError::io(&temporary))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush().map_err(CacheError::io(&temporary))?;
        fs::rename(&temporary, &path).map_err(CacheError::io(&path))?;
        debug!(%key, "Cache entry written");
        Ok(())
    }

    /// Returns the cached value for `key`, or computes and stores it.
    ///
    /// Failure to store the computed value is logged and otherwise ignored.
    pub(crate) fn get_or_compute<T, E, F>(&self, key: &CacheKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        if let Err(e) = self.put(key, &value) {
            warn!(%key, "Failed to store cache entry: {e}");
            counter!(FAILURES, &[failures::get_label(FailureKind::CacheFailed)]).increment(1);
        }
        Ok(value)
    }

    fn entries(&self) -> Result<Vec<Entry>, CacheError> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.directory).map_err(CacheError::io(&self.directory))? {
            let path = dir_entry.map_err(CacheError::io(&self.directory))?.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXTENSION) {
                continue;
            }
            let metadata = fs::metadata(&path).map_err(CacheError::io(&path))?;
            entries.push(Entry {
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
                path,
            });
        }
        Ok(entries)
    }

    /// Removes every entry, returning the number removed.
    #[instrument(skip_all, err(level = "error"))]
    pub(crate) fn clear(&self) -> Result<usize, CacheError> {
        let entries = self.entries()?;
        for entry in &entries {
            fs::remove_file(&entry.path).map_err(CacheError::io(&entry.path))?;
        }
        info!("Removed {} cache entries", entries.len());
        Ok(entries.len())
    }

    /// Closes the cache, evicting the oldest entries until the total size is within the limit.
    #[instrument(skip_all, fields(size_limit = self.size_limit), err(level = "error"))]
    pub(crate) fn close(self) -> Result<CacheStats, CacheError> {
        let mut entries = self.entries()?;
        entries.sort_by_key(|entry| entry.modified);

        let mut size = entries.iter().map(|entry| entry.size).sum::<u64>();
        let mut evicted = 0;
        for entry in &entries {
            if size <= self.size_limit {
                break;
            }
            fs::remove_file(&entry.path).map_err(CacheError::io(&entry.path))?;
            size -= entry.size;
            evicted += 1;
        }

        let stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted,
            size,
        };
        info!(
            hits = stats.hits,
            misses = stats.misses,
            evicted = stats.evicted,
            size = stats.size,
            "Cache closed"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efish_common::Sample;
    use std::{cell::Cell, collections::BTreeMap};

    fn open(directory: &Path, size_limit: u64) -> Cache {
        Cache::open(&CacheOptions {
            directory: directory.to_owned(),
            size_limit,
        })
        .expect("cache opens")
    }

    #[test]
    fn fnv1a_reference_values() {
        let hash = |bytes: &[u8]| {
            let mut hasher = Fnv1a::default();
            hasher.write(bytes);
            hasher.finish()
        };
        assert_eq!(hash(b""), 0xcbf29ce484222325);
        assert_eq!(hash(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(hash(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn key_depends_on_every_component() {
        let key = |function, threshold: f64, input| {
            Cache::key(function, &BTreeMap::from([("threshold", threshold)]), input)
                .expect("parameters serialize")
        };
        let base = key("stage", 0.5, 1);
        assert_eq!(base, key("stage", 0.5, 1));
        assert_ne!(base, key("other", 0.5, 1));
        assert_ne!(base, key("stage", 0.25, 1));
        assert_ne!(base, key("stage", 0.5, 2));
        assert_eq!(base.to_string().len(), 16);
    }

    #[test]
    fn series_digest_tracks_content() {
        let digest = |amplitude| {
            let series = ChannelSeries::from_rows([(1, Sample::new(0.0, amplitude))]);
            let mut hasher = Fnv1a::default();
            series.digest(&mut hasher);
            hasher.finish()
        };
        assert_eq!(digest(1.0), digest(1.0));
        assert_ne!(digest(1.0), digest(-1.0));
    }

    #[test]
    fn miss_then_hit() {
        let directory = tempfile::tempdir().expect("temporary directory");
        let cache = open(directory.path(), u64::MAX);
        let key = Cache::key("square", &(), 3).expect("key");
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, CacheError>(vec![9.0, 0.1])
        };

        assert_eq!(cache.get_or_compute(&key, compute).expect("computed"), vec![9.0, 0.1]);
        assert_eq!(cache.get_or_compute(&key, compute).expect("cached"), vec![9.0, 0.1]);
        assert_eq!(calls.get(), 1);

        let stats = cache.close().expect("closes");
        assert_eq!((stats.hits, stats.misses, stats.evicted), (1, 1, 0));
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let directory = tempfile::tempdir().expect("temporary directory");
        let cache = open(directory.path(), u64::MAX);
        let key = Cache::key("corrupt", &(), 0).expect("key");
        fs::write(cache.entry_path(&key), "{ not json").expect("entry written");

        assert_eq!(cache.get::<Vec<f64>>(&key), None);
        assert!(!cache.entry_path(&key).exists());
    }

    #[test]
    fn close_evicts_oldest_first() {
        let directory = tempfile::tempdir().expect("temporary directory");
        let cache = open(directory.path(), 0);
        let keys = (0..3)
            .map(|i| Cache::key("entry", &i, 0).expect("key"))
            .collect::<Vec<_>>();
        for (i, key) in keys.iter().enumerate() {
            cache.put(key, &vec![i; 8]).expect("entry written");
        }
        let entry_size = fs::metadata(cache.entry_path(&keys[0]))
            .expect("entry exists")
            .len();
        let oldest = File::options()
            .append(true)
            .open(cache.entry_path(&keys[0]))
            .expect("entry opens");
        oldest
            .set_modified(UNIX_EPOCH)
            .expect("modification time set");

        let cache = Cache {
            size_limit: 2 * entry_size,
            ..cache
        };
        let stats = cache.close().expect("closes");
        assert_eq!(stats.evicted, 1);
        assert!(!directory.path().join(format!("{}.json", keys[0])).exists());
        assert!(directory.path().join(format!("{}.json", keys[1])).exists());
    }

    #[test]
    fn clear_removes_entries() {
        let directory = tempfile::tempdir().expect("temporary directory");
        let cache = open(directory.path(), u64::MAX);
        for i in 0..4 {
            let key = Cache::key("entry", &i, 0).expect("key");
            cache.put(&key, &i).expect("entry written");
        }
        assert_eq!(cache.clear().expect("cleared"), 4);
        assert_eq!(cache.clear().expect("cleared"), 0);
    }

    #[test]
    fn file_set_changes_with_content() {
        let directory = tempfile::tempdir().expect("temporary directory");
        let path = directory.path().join("C1--shot--00001.txt");
        fs::write(&path, "1").expect("file written");
        let digest = |files: &FileSet| {
            let mut hasher = Fnv1a::default();
            files.state_digest(&mut hasher).expect("files exist");
            hasher.finish()
        };
        let files = FileSet::new(vec![path.clone()]);
        let before = digest(&files);
        fs::write(&path, "12").expect("file rewritten");
        assert_ne!(before, digest(&files));

        let missing = FileSet::new(vec![directory.path().join("missing.txt")]);
        assert!(missing.state_digest(&mut Fnv1a::default()).is_err());
    }
}

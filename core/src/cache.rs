//! On-disk cache for a keyword index and the document sequence it was built from.
//!
//! The pair lives in two files under one storage directory:
//!
//! - `bm25_cache.bin` holds the index structure,
//! - `docs_cache.bin` holds the ordered documents.
//!
//! Each file starts with a small bincode header (magic, format version,
//! generation, kind) followed by the bincode payload. Both files written by one
//! [`IndexCache::save`] share the same generation, so a load can tell a matched
//! pair from one torn by a crash or a concurrent writer.
//!
//! `save` stages both payloads in temporary files next to their targets and
//! renames them into place only once both writes have succeeded.

use crate::error::{CacheError, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const INDEX_FILE: &str = "bm25_cache.bin";
pub const DOCS_FILE: &str = "docs_cache.bin";
pub const FORMAT_VERSION: u32 = 1;
const MAGIC: [u8; 4] = *b"IDXC";
const TEMP_SUFFIX: &str = ".tmp";

static LAST_GENERATION: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FileKind {
    Index,
    Documents,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    format_version: u32,
    generation: u64,
    kind: FileKind,
}

pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join(INDEX_FILE) }
    pub fn docs(&self) -> PathBuf { self.root.join(DOCS_FILE) }
    fn temp(&self, name: &str, generation: u64) -> PathBuf {
        self.root.join(format!("{name}.{generation}{TEMP_SUFFIX}"))
    }
}

/// A matched index/documents pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex<I, D> {
    pub index: I,
    pub documents: Vec<D>,
}

/// Outcome of [`IndexCache::load`]. Never a partial pair.
#[derive(Debug)]
pub enum CacheLoad<I, D> {
    Hit(CachedIndex<I, D>),
    /// Neither file exists.
    Miss,
    /// Something was on disk but it is not a usable pair.
    Invalid(CacheError),
}

impl<I, D> CacheLoad<I, D> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLoad::Hit(_))
    }

    pub fn into_cached(self) -> Option<CachedIndex<I, D>> {
        match self {
            CacheLoad::Hit(cached) => Some(cached),
            CacheLoad::Miss | CacheLoad::Invalid(_) => None,
        }
    }

    /// `(index, documents)` or `None` for both.
    pub fn into_pair(self) -> Option<(I, Vec<D>)> {
        self.into_cached().map(|c| (c.index, c.documents))
    }
}

pub struct IndexCache {
    paths: CachePaths,
}

impl IndexCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { paths: CachePaths::new(dir) }
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// Persist a new generation, replacing whatever pair was there before.
    ///
    /// On failure the previous pair is left in place, except when the second of
    /// the two final renames fails; that leaves a generation mismatch which
    /// [`load`](Self::load) reports as invalid.
    pub fn save<I: Serialize, D: Serialize>(&self, index: &I, documents: &[D]) -> Result<()> {
        match self.try_save(index, documents) {
            Ok(generation) => {
                tracing::info!(dir = %self.paths.root.display(), generation, documents = documents.len(), "saved index cache");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(dir = %self.paths.root.display(), error = %err, "failed to save index cache");
                Err(err)
            }
        }
    }

    fn try_save<I: Serialize, D: Serialize>(&self, index: &I, documents: &[D]) -> Result<u64> {
        let generation = next_generation();
        // Encode before touching the filesystem.
        let index_bytes = encode(FileKind::Index, generation, index, "index")?;
        let docs_bytes = encode(FileKind::Documents, generation, &documents, "documents")?;

        fs::create_dir_all(&self.paths.root).map_err(|e| CacheError::io(&self.paths.root, e))?;
        let index_tmp = self.paths.temp(INDEX_FILE, generation);
        let docs_tmp = self.paths.temp(DOCS_FILE, generation);

        let staged = write_synced(&index_tmp, &index_bytes)
            .and_then(|()| write_synced(&docs_tmp, &docs_bytes))
            .and_then(|()| rename(&index_tmp, &self.paths.index()));
        if let Err(err) = staged {
            remove_quietly(&index_tmp);
            remove_quietly(&docs_tmp);
            return Err(err);
        }
        if let Err(err) = rename(&docs_tmp, &self.paths.docs()) {
            remove_quietly(&docs_tmp);
            return Err(err);
        }
        Ok(generation)
    }

    /// Restore the pair written by the last successful [`save`](Self::save).
    pub fn load<I: DeserializeOwned, D: DeserializeOwned>(&self) -> CacheLoad<I, D> {
        match self.try_load() {
            Ok(Some(cached)) => {
                tracing::info!(dir = %self.paths.root.display(), documents = cached.documents.len(), "loaded index cache");
                CacheLoad::Hit(cached)
            }
            Ok(None) => {
                tracing::debug!(dir = %self.paths.root.display(), "no index cache on disk");
                CacheLoad::Miss
            }
            Err(err) => {
                tracing::warn!(dir = %self.paths.root.display(), error = %err, "ignoring unusable index cache");
                CacheLoad::Invalid(err)
            }
        }
    }

    fn try_load<I: DeserializeOwned, D: DeserializeOwned>(&self) -> Result<Option<CachedIndex<I, D>>> {
        let index_path = self.paths.index();
        let docs_path = self.paths.docs();
        match (is_present(&index_path)?, is_present(&docs_path)?) {
            (false, false) => return Ok(None),
            (true, false) => return Err(CacheError::Incomplete { missing: docs_path }),
            (false, true) => return Err(CacheError::Incomplete { missing: index_path }),
            (true, true) => {}
        }

        let (index_gen, index) = decode::<I>(&index_path, FileKind::Index)?;
        let (docs_gen, documents) = decode::<Vec<D>>(&docs_path, FileKind::Documents)?;
        if index_gen != docs_gen {
            return Err(CacheError::GenerationMismatch { index: index_gen, documents: docs_gen });
        }
        Ok(Some(CachedIndex { index, documents }))
    }

    /// Remove both cache files. Missing files are fine, so clearing twice succeeds.
    pub fn clear(&self) -> Result<()> {
        let mut first_err = None;
        for path in [self.paths.index(), self.paths.docs()] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed cache file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    let err = CacheError::io(&path, e);
                    tracing::warn!(error = %err, "failed to remove cache file");
                    first_err.get_or_insert(err);
                }
            }
        }
        self.sweep_temp_files();
        match first_err {
            Some(err) => Err(err),
            None => {
                tracing::info!(dir = %self.paths.root.display(), "index cache cleared");
                Ok(())
            }
        }
    }

    /// Best effort: drop staging files left behind by an interrupted save.
    fn sweep_temp_files(&self) {
        let Ok(entries) = fs::read_dir(&self.paths.root) else { return };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let ours = name.starts_with(&format!("{INDEX_FILE}.")) || name.starts_with(&format!("{DOCS_FILE}."));
            if ours && name.ends_with(TEMP_SUFFIX) {
                remove_quietly(&entry.path());
            }
        }
    }
}

fn next_generation() -> u64 {
    let now = time::OffsetDateTime::now_utc().unix_timestamp_nanos().max(0) as u64;
    let mut last = LAST_GENERATION.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_GENERATION.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

fn encode<T: Serialize + ?Sized>(kind: FileKind, generation: u64, payload: &T, what: &'static str) -> Result<Vec<u8>> {
    let header = Header { magic: MAGIC, format_version: FORMAT_VERSION, generation, kind };
    let mut buf = bincode::serialize(&header).map_err(|source| CacheError::Encode { what, source })?;
    bincode::serialize_into(&mut buf, payload).map_err(|source| CacheError::Encode { what, source })?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(path: &Path, kind: FileKind) -> Result<(u64, T)> {
    let bytes = fs::read(path).map_err(|e| CacheError::io(path, e))?;
    let decode_err = |source| CacheError::Decode { path: path.to_path_buf(), source };
    let bad_header = |reason: String| CacheError::BadHeader { path: path.to_path_buf(), reason };

    let header: Header = bincode::deserialize(&bytes).map_err(decode_err)?;
    if header.magic != MAGIC {
        return Err(bad_header(format!("unexpected magic {:?}", header.magic)));
    }
    if header.format_version != FORMAT_VERSION {
        return Err(bad_header(format!("unsupported format version {}", header.format_version)));
    }
    if header.kind != kind {
        return Err(bad_header(format!("expected {kind:?} file, found {:?}", header.kind)));
    }
    let header_len = bincode::serialized_size(&header).map_err(decode_err)? as usize;
    let payload_bytes = bytes.get(header_len..).unwrap_or_default();
    // Decoding from the slice bounds every length prefix by the bytes actually present.
    let payload: T = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(payload_bytes.len() as u64)
        .deserialize(payload_bytes)
        .map_err(decode_err)?;
    Ok((header.generation, payload))
}

fn is_present(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = fs::File::create(path).map_err(|e| CacheError::io(path, e))?;
    f.write_all(bytes).map_err(|e| CacheError::io(path, e))?;
    f.sync_all().map_err(|e| CacheError::io(path, e))?;
    Ok(())
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| CacheError::io(to, e))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "could not remove staging file");
        }
    }
}

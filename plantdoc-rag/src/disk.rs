//! Directory-backed vector index.
//!
//! Layout of an index directory:
//!
//! - `manifest.json`: format version, dimension, embedding model, entry count
//! - `entries.jsonl`: one JSON chunk per line, in insertion order
//! - `vectors.f32`: little-endian `f32` values, `dimension` per entry, same order
//!
//! `persist` appends only what was added since the last persist and then
//! rewrites the manifest atomically; the manifest's entry count is the
//! commit point. A full rewrite goes to temporary files that are renamed
//! into place before the manifest is committed, and a failed write forces
//! the next persist to rewrite. Vectors are stored as raw bits, so they
//! reload exactly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::document::{Chunk, IndexEntry, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{IndexState, UpsertStats, VectorIndex};

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.jsonl";
const VECTORS_FILE: &str = "vectors.f32";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    dimension: Option<usize>,
    embedding_model: Option<String>,
    entry_count: usize,
}

#[derive(Debug, Default)]
struct DiskState {
    index: IndexState,
    /// Entries `[..persisted]` are already on disk.
    persisted: usize,
    /// Set when on-disk entries changed in place; the next persist rewrites everything.
    needs_rewrite: bool,
}

/// A vector index persisted to a directory.
///
/// A freshly constructed index is empty and unloaded; queries return no
/// results until [`load`](VectorIndex::load) succeeds or entries are upserted.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::{DiskVectorIndex, VectorIndex};
///
/// let index = DiskVectorIndex::open("./plantdoc_index").await?;
/// let results = index.query(&query_embedding, 3).await?;
/// ```
#[derive(Debug)]
pub struct DiskVectorIndex {
    dir: PathBuf,
    state: RwLock<DiskState>,
}

impl DiskVectorIndex {
    /// Create an unloaded index rooted at `dir`. Nothing is read or written.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), state: RwLock::new(DiskState::default()) }
    }

    /// Open an existing index, failing with [`RagError::IndexUnavailable`]
    /// if it has not been built.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let index = Self::new(dir);
        index.load().await?;
        Ok(index)
    }

    /// Open the index at `dir` if one exists, otherwise start an empty one there.
    pub async fn open_or_create(dir: impl Into<PathBuf>) -> Result<Self> {
        let index = Self::new(dir);
        if index.exists().await {
            index.load().await?;
        }
        Ok(index)
    }

    /// The index directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a manifest exists in the index directory.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(self.dir.join(MANIFEST_FILE)).await.unwrap_or(false)
    }

    fn unavailable(&self, message: impl Into<String>) -> RagError {
        RagError::IndexUnavailable { path: self.dir.clone(), message: message.into() }
    }

    async fn write_manifest(&self, index: &IndexState) -> Result<()> {
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            dimension: index.dimension(),
            embedding_model: index.embedding_model().map(str::to_string),
            entry_count: index.len(),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RagError::storage(self.dir.join(MANIFEST_FILE), e))?;

        let tmp = tmp_path(&self.dir, MANIFEST_FILE);
        let path = self.dir.join(MANIFEST_FILE);
        tokio::fs::write(&tmp, bytes).await.map_err(|e| RagError::storage(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| RagError::storage(&path, e))
    }

    /// Serialize `entries` into the contents of the two data files.
    fn encode(&self, entries: &[IndexEntry]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut lines = Vec::new();
        let mut vectors = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut lines, &entry.chunk)
                .map_err(|e| RagError::storage(self.dir.join(ENTRIES_FILE), e))?;
            lines.push(b'\n');
            vectors.extend(entry.vector.iter().flat_map(|v| v.to_le_bytes()));
        }
        Ok((lines, vectors))
    }

    /// Append `entries` to the committed data files.
    async fn append_entries(&self, entries: &[IndexEntry]) -> Result<()> {
        let (lines, vectors) = self.encode(entries)?;
        write_file(&self.dir.join(ENTRIES_FILE), &lines, true).await?;
        write_file(&self.dir.join(VECTORS_FILE), &vectors, true).await
    }

    /// Replace both data files with `entries`. The committed files are only
    /// swapped out once the new contents are fully on disk.
    async fn replace_entries(&self, entries: &[IndexEntry]) -> Result<()> {
        let (lines, vectors) = self.encode(entries)?;
        let entries_tmp = tmp_path(&self.dir, ENTRIES_FILE);
        let vectors_tmp = tmp_path(&self.dir, VECTORS_FILE);
        write_file(&entries_tmp, &lines, false).await?;
        write_file(&vectors_tmp, &vectors, false).await?;

        for (tmp, name) in [(entries_tmp, ENTRIES_FILE), (vectors_tmp, VECTORS_FILE)] {
            let path = self.dir.join(name);
            tokio::fs::rename(&tmp, &path).await.map_err(|e| RagError::storage(&path, e))?;
        }
        Ok(())
    }

    /// Write whatever `state` has not committed yet, then commit the manifest.
    async fn write_pending(&self, state: &DiskState, rewrite: bool) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| RagError::storage(&self.dir, e))?;
        if rewrite {
            self.replace_entries(state.index.entries()).await?;
        } else if state.persisted < state.index.len() {
            self.append_entries(&state.index.entries()[state.persisted..]).await?;
        }
        self.write_manifest(&state.index).await
    }
}

fn tmp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.tmp"))
}

async fn write_file(path: &Path, bytes: &[u8], append: bool) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let mut file = options.open(path).await.map_err(|e| RagError::storage(path, e))?;
    file.write_all(bytes).await.map_err(|e| RagError::storage(path, e))?;
    file.flush().await.map_err(|e| RagError::storage(path, e))?;
    file.sync_data().await.map_err(|e| RagError::storage(path, e))
}

fn decode_vectors(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorIndex for DiskVectorIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<UpsertStats> {
        let mut state = self.state.write().await;
        let (stats, lowest_replaced) = state.index.upsert(entries)?;
        if lowest_replaced.is_some_and(|pos| pos < state.persisted) {
            state.needs_rewrite = true;
        }
        debug!(backend = "Disk", inserted = stats.inserted, replaced = stats.replaced, "upsert");
        Ok(stats)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.state.read().await.index.query(vector, k)
    }

    async fn persist(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let total = state.index.len();
        // Nothing of ours is on disk yet: never append to files we did not load.
        let rewrite = state.needs_rewrite
            || state.persisted == 0
            || state.persisted > total
            || !self.exists().await;

        if let Err(e) = self.write_pending(&state, rewrite).await {
            // The data files may end in a partial write; only a rewrite realigns them.
            state.needs_rewrite = true;
            warn!(path = %self.dir.display(), error = %e, "persist failed");
            return Err(e);
        }

        info!(
            path = %self.dir.display(),
            entry_count = total,
            appended = if rewrite { total } else { total - state.persisted },
            rewrite,
            "persisted vector index"
        );
        state.persisted = total;
        state.needs_rewrite = false;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        let manifest_path = self.dir.join(MANIFEST_FILE);
        let manifest_bytes = tokio::fs::read(&manifest_path).await.map_err(|e| {
            self.unavailable(format!(
                "cannot read {MANIFEST_FILE} ({e}); run `plantdoc build` to create the index"
            ))
        })?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| self.unavailable(format!("corrupt {MANIFEST_FILE}: {e}")))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(self.unavailable(format!(
                "unsupported index format version {}; rebuild the index",
                manifest.format_version
            )));
        }

        let entries_text = tokio::fs::read_to_string(self.dir.join(ENTRIES_FILE))
            .await
            .or_else(|e| if manifest.entry_count == 0 { Ok(String::new()) } else { Err(e) })
            .map_err(|e| self.unavailable(format!("cannot read {ENTRIES_FILE}: {e}")))?;
        let vector_bytes = tokio::fs::read(self.dir.join(VECTORS_FILE))
            .await
            .or_else(|e| if manifest.entry_count == 0 { Ok(Vec::new()) } else { Err(e) })
            .map_err(|e| self.unavailable(format!("cannot read {VECTORS_FILE}: {e}")))?;

        let mut chunks = Vec::with_capacity(manifest.entry_count);
        for (line_no, line) in entries_text.lines().enumerate() {
            if chunks.len() == manifest.entry_count {
                break;
            }
            let chunk: Chunk = serde_json::from_str(line).map_err(|e| {
                self.unavailable(format!("corrupt {ENTRIES_FILE} line {}: {e}", line_no + 1))
            })?;
            chunks.push(chunk);
        }
        if chunks.len() < manifest.entry_count {
            return Err(self.unavailable(format!(
                "{ENTRIES_FILE} holds {} entries, manifest expects {}; rebuild the index",
                chunks.len(),
                manifest.entry_count
            )));
        }

        let dimension = manifest.dimension.unwrap_or(0);
        if dimension == 0 && manifest.entry_count > 0 {
            return Err(self.unavailable("manifest lists entries but no dimension"));
        }
        let expected_bytes = manifest.entry_count * dimension * 4;
        if vector_bytes.len() < expected_bytes {
            return Err(self.unavailable(format!(
                "{VECTORS_FILE} is truncated ({} of {expected_bytes} bytes); rebuild the index",
                vector_bytes.len()
            )));
        }
        // Longer files mean an append was interrupted after the last manifest commit.
        let trailing = entries_text.lines().count() > manifest.entry_count
            || vector_bytes.len() > expected_bytes;
        if trailing {
            warn!(path = %self.dir.display(), "ignoring uncommitted trailing index data");
        }

        let values = decode_vectors(&vector_bytes[..expected_bytes]);
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(values.chunks(dimension.max(1)))
            .map(|(chunk, vector)| IndexEntry { vector: vector.to_vec(), chunk })
            .collect();

        let mut state = self.state.write().await;
        state.index = IndexState::from_parts(entries, manifest.dimension, manifest.embedding_model);
        state.persisted = manifest.entry_count;
        state.needs_rewrite = trailing;

        info!(
            path = %self.dir.display(),
            entry_count = manifest.entry_count,
            dimension,
            "loaded vector index"
        );
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.read().await.index.len()
    }

    async fn dimension(&self) -> Option<usize> {
        self.state.read().await.index.dimension()
    }

    async fn contains(&self, id: &str) -> bool {
        self.state.read().await.index.contains(id)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.index.clear();
        state.needs_rewrite = true;
        Ok(())
    }

    async fn embedding_model(&self) -> Option<String> {
        self.state.read().await.index.embedding_model().map(str::to_string)
    }

    async fn set_embedding_model(&self, model: &str) -> Result<()> {
        self.state.write().await.index.set_embedding_model(model);
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module cache
//!
//! Persists the final transformed output of project files, keyed by the
//! SHA-256 of their raw source.
//!
//! Layout:
//! ```text
//! <cache_dir>/
//! ├── modules.json        index: [{ file, cacheFilePath, hash }]
//! └── modules/
//!     └── <uuid>.<ext>    one line header + transformed code
//! ```
//!
//! The index is read once when the cache is opened and rewritten in full on
//! every update. Missing or unreadable entries are cache misses, never
//! errors.

use crate::config::ResolvedConfig;
use crate::error::{LoaderError, Result};
use crate::graph::ModuleNode;
use crate::id;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Marker starting the header line of a cache file
const HEADER_PREFIX: &str = "// @cache ";

/// Index record for one cached module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Canonical file of the module
    pub file: String,
    /// Cache artifact holding the transformed code
    pub cache_file_path: PathBuf,
    /// SHA-256 of the raw source that produced the artifact
    pub hash: String,
}

/// Provenance written at the top of each cache artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHeader {
    /// Canonical file of the module
    pub file: String,
    /// Last plugin of the transform chain
    pub plugin: Option<String>,
    /// Total transform time of the run that produced the artifact
    pub elapsed_ms: u64,
}

/// Hex encoded SHA-256 of a source
pub fn content_hash(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Split a cache artifact into its header and code.
///
/// Artifacts without a readable header are returned whole.
pub fn parse_cache_file(content: &str) -> (Option<CacheHeader>, &str) {
    let Some(rest) = content.strip_prefix(HEADER_PREFIX) else {
        return (None, content);
    };
    let Some((line, code)) = rest.split_once('\n') else {
        return (None, content);
    };
    match serde_json::from_str(line) {
        Ok(header) => (Some(header), code),
        Err(_) => (None, content),
    }
}

/// Content-hash keyed store of transformed modules
#[derive(Debug)]
pub struct ModuleCache {
    modules_dir: PathBuf,
    index_path: PathBuf,
    index: RwLock<HashMap<String, CacheEntry>>,
    /// Serializes artifact allocation and index rewrites
    write_lock: tokio::sync::Mutex<()>,
}

impl ModuleCache {
    /// Open the cache of a pipeline, loading its index
    pub fn open(config: &ResolvedConfig) -> Self {
        Self::open_at(config.modules_dir(), config.modules_index())
    }

    /// Open a cache with explicit artifact directory and index file
    pub fn open_at(modules_dir: PathBuf, index_path: PathBuf) -> Self {
        let index = match load_index(&index_path) {
            Ok(index) => index,
            Err(e) => {
                warn!(index = %index_path.display(), "Ignoring unreadable module cache index: {}", e);
                HashMap::new()
            }
        };
        debug!(entries = index.len(), "Loaded module cache index");

        Self {
            modules_dir,
            index_path,
            index: RwLock::new(index),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Index record for a file
    pub fn entry(&self, file: &str) -> Option<CacheEntry> {
        self.index.read().get(file).cloned()
    }

    /// Number of indexed modules
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Whether the stored hash matches the node's raw code.
    ///
    /// Plugin vetoes are the container's concern.
    pub fn is_cache_valid(&self, node: &ModuleNode) -> bool {
        let Some(code) = node.raw_code() else {
            return false;
        };
        self.matches(&node.file, code)
    }

    /// Whether the stored hash for `file` equals the hash of `raw_code`
    pub fn matches(&self, file: &str, raw_code: &str) -> bool {
        self.index
            .read()
            .get(file)
            .is_some_and(|entry| entry.hash == content_hash(raw_code))
    }

    /// Read the cached transformed code of a file
    pub async fn load_cached(&self, file: &str) -> Option<String> {
        let entry = self.entry(file)?;
        match fs::read_to_string(&entry.cache_file_path).await {
            Ok(content) => Some(parse_cache_file(&content).1.to_string()),
            Err(e) => {
                debug!(file, "Cache miss, artifact unreadable: {}", e);
                None
            }
        }
    }

    /// Persist the final transform of a node and upsert its index record
    pub async fn store(&self, node: &ModuleNode) -> Result<()> {
        let raw = node
            .raw_code()
            .ok_or_else(|| LoaderError::Cache(format!("'{}' has no loaded source", node.file)))?;
        let code = node.current_code().unwrap_or(raw);
        let elapsed = node.transform_history.iter().map(|t| t.elapsed).sum::<Duration>();
        let plugin = node.last_transform().map(|t| t.plugin.as_str());
        self.store_output(&node.file, raw, code, plugin, elapsed).await
    }

    /// Persist `code`, the output of one transform run over `raw_code`.
    ///
    /// The stored hash is always the hash of `raw_code`, so an entry never
    /// pairs one source with another source's output.
    pub async fn store_output(
        &self,
        file: &str,
        raw_code: &str,
        code: &str,
        plugin: Option<&str>,
        elapsed: Duration,
    ) -> Result<()> {
        let hash = content_hash(raw_code);
        let header = CacheHeader {
            file: file.to_string(),
            plugin: plugin.map(str::to_string),
            elapsed_ms: elapsed.as_millis() as u64,
        };

        let _guard = self.write_lock.lock().await;

        let cache_file_path = match self.entry(file) {
            Some(entry) => entry.cache_file_path,
            None => self.allocate_path(file),
        };

        fs::create_dir_all(&self.modules_dir).await?;
        let content = format!("{}{}\n{}", HEADER_PREFIX, serde_json::to_string(&header)?, code);
        write_atomic(&cache_file_path, content.as_bytes()).await?;

        let snapshot = {
            let mut index = self.index.write();
            index.insert(
                file.to_string(),
                CacheEntry {
                    file: file.to_string(),
                    cache_file_path: cache_file_path.clone(),
                    hash,
                },
            );
            let mut entries: Vec<CacheEntry> = index.values().cloned().collect();
            entries.sort_by(|a, b| a.file.cmp(&b.file));
            entries
        };

        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.index_path, &serde_json::to_vec_pretty(&snapshot)?).await?;

        debug!(file, artifact = %cache_file_path.display(), "Stored module in cache");
        Ok(())
    }

    fn allocate_path(&self, file: &str) -> PathBuf {
        let ext = id::extension(file).unwrap_or("js");
        self.modules_dir
            .join(format!("{}.{}", uuid::Uuid::new_v4().simple(), ext))
    }
}

fn load_index(path: &Path) -> Result<HashMap<String, CacheEntry>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<CacheEntry> = serde_json::from_str(&content)?;
    Ok(entries.into_iter().map(|e| (e.file.clone(), e)).collect())
}

/// Write through a temporary sibling and rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LoadRecord, ModuleGraph, TransformRecord};
    use tempfile::tempdir;

    fn transformed_node(graph: &mut ModuleGraph, file: &str, raw: &str, out: &str) -> ModuleNode {
        let handle = graph.ensure_entry_from_file(file);
        let node = graph.node_mut(handle);
        node.load_result = Some(LoadRecord {
            plugin: None,
            code: raw.to_string(),
            elapsed: Duration::ZERO,
        });
        node.transform_history.push(TransformRecord {
            code: out.to_string(),
            plugin: "upper".to_string(),
            elapsed: Duration::from_millis(3),
            changed: true,
        });
        node.clone()
    }

    fn cache_in(dir: &Path) -> ModuleCache {
        ModuleCache::open_at(dir.join("modules"), dir.join("modules.json"))
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut graph = ModuleGraph::new();
        let node = transformed_node(&mut graph, "/app/src/a.ts", "let a = 1", "LET A = 1");

        cache.store(&node).await.unwrap();

        assert!(cache.is_cache_valid(&node));
        assert_eq!(cache.load_cached("/app/src/a.ts").await.as_deref(), Some("LET A = 1"));

        let entry = cache.entry("/app/src/a.ts").unwrap();
        assert_eq!(entry.cache_file_path.extension().unwrap(), "ts");
        assert_eq!(entry.hash, content_hash("let a = 1"));
    }

    #[tokio::test]
    async fn test_changed_source_misses() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut graph = ModuleGraph::new();
        let node = transformed_node(&mut graph, "/app/a.js", "let a = 1", "A");
        cache.store(&node).await.unwrap();

        assert!(!cache.matches("/app/a.js", "let a = 2"));
        assert!(!cache.matches("/app/other.js", "let a = 1"));
    }

    #[tokio::test]
    async fn test_restore_reuses_artifact_path() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut graph = ModuleGraph::new();

        let first = transformed_node(&mut graph, "/app/a.js", "v1", "V1");
        cache.store(&first).await.unwrap();
        let path = cache.entry("/app/a.js").unwrap().cache_file_path;

        let mut second = first.clone();
        second.load_result.as_mut().unwrap().code = "v2".to_string();
        second.transform_history[0].code = "V2".to_string();
        cache.store(&second).await.unwrap();

        let entry = cache.entry("/app/a.js").unwrap();
        assert_eq!(entry.cache_file_path, path);
        assert_eq!(entry.hash, content_hash("v2"));
        assert_eq!(cache.load_cached("/app/a.js").await.as_deref(), Some("V2"));
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempdir().unwrap();
        let mut graph = ModuleGraph::new();
        let node = transformed_node(&mut graph, "/app/a.js", "raw", "out");
        cache_in(dir.path()).store(&node).await.unwrap();

        let reopened = cache_in(dir.path());
        assert_eq!(reopened.len(), 1);
        assert!(reopened.matches("/app/a.js", "raw"));
        assert_eq!(reopened.load_cached("/app/a.js").await.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        let mut graph = ModuleGraph::new();
        let node = transformed_node(&mut graph, "/app/a.js", "raw", "out");
        cache.store(&node).await.unwrap();

        std::fs::remove_file(cache.entry("/app/a.js").unwrap().cache_file_path).unwrap();
        assert_eq!(cache.load_cached("/app/a.js").await, None);
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("modules.json"), "{ not json").unwrap();
        assert!(cache_in(dir.path()).is_empty());
    }

    #[test]
    fn test_parse_cache_file() {
        let content = "// @cache {\"file\":\"/a.js\",\"plugin\":\"p\",\"elapsed_ms\":4}\nexport {}\n";
        let (header, code) = parse_cache_file(content);
        assert_eq!(header.unwrap().plugin.as_deref(), Some("p"));
        assert_eq!(code, "export {}\n");

        assert_eq!(parse_cache_file("plain"), (None, "plain"));
    }
}

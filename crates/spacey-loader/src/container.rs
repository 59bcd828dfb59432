// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Plugin container
//!
//! Dispatches `resolve_id`, `load` and `transform` requests across the
//! sorted plugins, records every stage in the module graph and consults the
//! module cache before transforming project files.
//!
//! - `resolve_id` and `load` stop at the first plugin that returns a value.
//! - `transform` runs every implementing plugin, feeding each one the
//!   previous plugin's output.
//! - `should_transform_cached_module` stops at the first opinion.

use crate::cache::ModuleCache;
use crate::config::{ConfigEnv, ResolvedConfig, UserConfig};
use crate::error::{LoaderError, Result};
use crate::graph::{LoadRecord, ModuleGraph, ModuleId, ModuleNode, ResolveRecord, TransformRecord};
use crate::id::{self, ModuleFormat};
use crate::plugin::{
    Hook, LoadResult, Plugin, PluginContext, ResolveIdOptions, ResolvedId, SortedPlugins, TransformResult,
};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The plugin pipeline of one run
pub struct PluginContainer {
    config: Arc<ResolvedConfig>,
    plugins: SortedPlugins,
    graph: RwLock<ModuleGraph>,
    cache: Option<ModuleCache>,
    /// Serializes `load` and `transform` per module file
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PluginContainer {
    /// Build a pipeline.
    ///
    /// Drops plugins that do not apply to `env`, sorts the rest, runs the
    /// `config` hooks against `config`, resolves it and finally notifies
    /// `config_resolved` hooks.
    pub async fn new(plugins: Vec<Arc<dyn Plugin>>, config: UserConfig, env: ConfigEnv) -> Result<Self> {
        let plugins: Vec<Arc<dyn Plugin>> = plugins
            .into_iter()
            .filter(|plugin| {
                let applies = plugin.apply(&env);
                if !applies {
                    debug!(plugin = plugin.name(), "Plugin does not apply to this run");
                }
                applies
            })
            .collect();
        let sorted = SortedPlugins::new(&plugins);

        let mut config = config;
        for sp in sorted.for_hook(Hook::Config) {
            let ctx = PluginContext::detached(sp.name());
            let partial = sp
                .plugin
                .config(&ctx, &config, &env)
                .await
                .map_err(|e| attribute(sp.name(), e))?;

            if let Some(partial) = partial {
                for key in config.merge_missing(partial) {
                    warn!(
                        plugin = sp.name(),
                        "Tried merging the key '{}' which is already defined, skipping", key
                    );
                }
            }
        }

        let config = Arc::new(ResolvedConfig::resolve(config, &env)?);
        let cache = config.cache.then(|| ModuleCache::open(&config));

        let container = Self {
            config,
            plugins: sorted,
            graph: RwLock::new(ModuleGraph::new()),
            cache,
            locks: DashMap::new(),
        };

        for sp in container.plugins.for_hook(Hook::ConfigResolved) {
            let ctx = PluginContext::new(sp.name(), &container, &[]);
            sp.plugin
                .config_resolved(&ctx, &container.config)
                .await
                .map_err(|e| attribute(sp.name(), e))?;
        }

        debug!(
            root = %container.config.root.display(),
            plugins = plugins.len(),
            cache = container.cache.is_some(),
            "Plugin container ready"
        );
        Ok(container)
    }

    /// The frozen configuration
    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.config
    }

    /// The dispatch table
    pub fn plugins(&self) -> &SortedPlugins {
        &self.plugins
    }

    /// The module cache, when enabled
    pub fn cache(&self) -> Option<&ModuleCache> {
        self.cache.as_ref()
    }

    /// Read access to the module graph. Do not hold across an await.
    pub fn graph(&self) -> RwLockReadGuard<'_, ModuleGraph> {
        self.graph.read()
    }

    /// Snapshot of the node for an id
    pub fn module(&self, id: &str) -> Option<ModuleNode> {
        self.graph.read().get_by_id(&id::normalize_id(id)).cloned()
    }

    /// Resolve a specifier. `Ok(None)` means no plugin resolved it.
    pub async fn resolve_id(&self, specifier: &str, importer: Option<&str>) -> Result<Option<ResolvedId>> {
        self.resolve_id_with(specifier, importer, ResolveIdOptions::default(), &[])
            .await
    }

    /// Resolve a specifier, skipping the named plugins
    pub async fn resolve_id_with(
        &self,
        specifier: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
        skip: &[String],
    ) -> Result<Option<ResolvedId>> {
        self.resolve_chain(specifier, importer, options, skip, true).await
    }

    /// Run the `resolve_id` chain. With `record` unset the graph is left
    /// untouched: no node, provenance or edge.
    pub(crate) async fn resolve_chain(
        &self,
        specifier: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
        skip: &[String],
        record: bool,
    ) -> Result<Option<ResolvedId>> {
        let start = Instant::now();

        for sp in self.plugins.for_hook(Hook::ResolveId) {
            if skip.iter().any(|name| name == sp.name()) {
                continue;
            }

            let ctx = PluginContext::new(sp.name(), self, skip);
            let result = sp
                .plugin
                .resolve_id(&ctx, specifier, importer, options)
                .await
                .map_err(|e| attribute(sp.name(), e))?;

            let Some(resolved) = result.filter(|r| !r.id.is_empty()) else {
                continue;
            };

            let resolved = ResolvedId {
                id: id::normalize_id(&resolved.id),
                format: resolved.format,
            };
            if record {
                self.record_resolve(&resolved, sp.name(), specifier, importer, start.elapsed());
            }
            debug!(plugin = sp.name(), specifier, id = %resolved.id, "Resolved");
            return Ok(Some(resolved));
        }

        debug!(specifier, importer, "No plugin resolved specifier");
        Ok(None)
    }

    fn record_resolve(
        &self,
        resolved: &ResolvedId,
        plugin: &str,
        specifier: &str,
        importer: Option<&str>,
        elapsed: Duration,
    ) {
        let mut graph = self.graph.write();
        let handle = graph.ensure_entry_from_file(&resolved.id);

        let node = graph.node_mut(handle);
        node.resolve_result = Some(ResolveRecord {
            plugin: plugin.to_string(),
            specifier: specifier.to_string(),
            importer: importer.map(str::to_string),
            elapsed,
        });
        if let Some(format) = resolved.format {
            node.format = Some(format);
        } else if node.format.is_none() {
            node.format = ModuleFormat::from_id(&resolved.id);
        }

        if let Some(importer) = importer {
            let importer = graph.ensure_entry_from_file(&id::normalize_id(importer));
            graph.add_edge(importer, handle);
        }
    }

    /// Lock owned by one module file
    fn module_lock(&self, file: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.entry(file.to_string()).or_default().value())
    }

    /// Load a module. `Ok(None)` means the host must load it.
    ///
    /// A result with empty code counts as no result.
    pub async fn load(&self, id: &str) -> Result<Option<LoadResult>> {
        let file = id::normalize_id(id);
        let lock = self.module_lock(&file);
        let _guard = lock.lock().await;

        for sp in self.plugins.for_hook(Hook::Load) {
            let ctx = PluginContext::new(sp.name(), self, &[]);
            let start = Instant::now();
            let result = sp
                .plugin
                .load(&ctx, &file)
                .await
                .map_err(|e| attribute(sp.name(), e))?;

            if let Some(loaded) = result.filter(|loaded| !loaded.code.is_empty()) {
                self.record_load(&file, Some(sp.name()), &loaded.code, loaded.format, start.elapsed());
                debug!(plugin = sp.name(), id = %file, "Loaded");
                return Ok(Some(loaded));
            }
        }

        Ok(None)
    }

    /// Record raw code on a node. Used for plugin loads and host loads alike.
    pub fn record_load(
        &self,
        id: &str,
        plugin: Option<&str>,
        code: &str,
        format: Option<ModuleFormat>,
        elapsed: Duration,
    ) {
        let file = id::normalize_id(id);
        let mut graph = self.graph.write();
        let handle = graph.ensure_entry_from_file(&file);
        let node = graph.node_mut(handle);
        node.load_result = Some(LoadRecord {
            plugin: plugin.map(str::to_string),
            code: code.to_string(),
            elapsed,
        });
        if format.is_some() {
            node.format = format;
        }
    }

    /// Run the transform chain over a module's code.
    ///
    /// Project files whose code hashes to the cached value are served from
    /// the cache unless a plugin vetoes it. Transforms of the same file run
    /// one at a time.
    pub async fn transform(&self, code: String, id: &str) -> Result<TransformResult> {
        let file = id::normalize_id(id);
        let lock = self.module_lock(&file);
        let _guard = lock.lock().await;

        let input = code.clone();
        let (handle, is_project) = self.prepare_transform(&file, &code);
        let cache = self.cache.as_ref().filter(|_| is_project);

        if let Some(cache) = cache {
            if let Some(cached) = self.lookup_cache(cache, &code, &file).await? {
                let format = {
                    let mut graph = self.graph.write();
                    let node = graph.node_mut(handle);
                    node.cache_hit = true;
                    *node.format.get_or_insert_with(|| ModuleFormat::detect(&file, &cached))
                };
                debug!(id = %file, "Served transform from cache");
                return Ok(TransformResult {
                    code: cached,
                    format: Some(format),
                });
            }
        }

        let mut code = code;
        let mut format = None;
        let mut last_plugin = None;
        let mut total = Duration::ZERO;

        for sp in self.plugins.for_hook(Hook::Transform) {
            let ctx = PluginContext::new(sp.name(), self, &[]);
            let start = Instant::now();
            let result = sp
                .plugin
                .transform(&ctx, &code, &file)
                .await
                .map_err(|e| LoaderError::transform(sp.name(), &file, e))?;
            let elapsed = start.elapsed();
            total += elapsed;
            last_plugin = Some(sp.name());

            let changed = result.is_some();
            if let Some(result) = result {
                code = result.code;
                format = result.format.or(format);
            }

            self.graph.write().node_mut(handle).transform_history.push(TransformRecord {
                code: code.clone(),
                plugin: sp.name().to_string(),
                elapsed,
                changed,
            });
        }

        let format = {
            let mut graph = self.graph.write();
            let node = graph.node_mut(handle);
            node.cache_hit = false;
            let format = format
                .or(node.format)
                .unwrap_or_else(|| ModuleFormat::detect(&file, &code));
            node.format = Some(format);
            format
        };

        if let Some(cache) = cache {
            if let Err(e) = cache.store_output(&file, &input, &code, last_plugin, total).await {
                warn!(id = %file, "Failed to write module cache: {}", e);
            }
        }

        Ok(TransformResult {
            code,
            format: Some(format),
        })
    }

    /// Make sure the node exists and carries the code entering the chain
    fn prepare_transform(&self, file: &str, code: &str) -> (ModuleId, bool) {
        let mut graph = self.graph.write();
        let handle = graph.ensure_entry_from_file(file);
        let node = graph.node_mut(handle);
        if node.raw_code() != Some(code) {
            node.load_result = Some(LoadRecord {
                plugin: None,
                code: code.to_string(),
                elapsed: Duration::ZERO,
            });
        }
        (handle, node.is_project_file())
    }

    async fn lookup_cache(&self, cache: &ModuleCache, code: &str, file: &str) -> Result<Option<String>> {
        if !cache.matches(file, code) {
            return Ok(None);
        }
        if self.should_transform_cached_module(code, file).await? == Some(true) {
            debug!(id = %file, "Cached output rejected by plugin");
            return Ok(None);
        }
        Ok(cache.load_cached(file).await)
    }

    /// Ask plugins whether cached output must be discarded.
    ///
    /// `None` means no plugin has an opinion, and the cache may be used.
    pub async fn should_transform_cached_module(&self, code: &str, id: &str) -> Result<Option<bool>> {
        for sp in self.plugins.for_hook(Hook::ShouldTransformCachedModule) {
            let ctx = PluginContext::new(sp.name(), self, &[]);
            let opinion = sp
                .plugin
                .should_transform_cached_module(&ctx, code, id)
                .await
                .map_err(|e| attribute(sp.name(), e))?;
            if opinion.is_some() {
                return Ok(opinion);
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContainer")
            .field("root", &self.config.root)
            .field("modules", &self.graph.read().len())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Attribute a hook failure to the plugin that raised it
fn attribute(plugin: &str, err: LoaderError) -> LoaderError {
    if err.plugin_name().is_some() {
        err
    } else {
        LoaderError::plugin(plugin, err.to_string())
    }
}

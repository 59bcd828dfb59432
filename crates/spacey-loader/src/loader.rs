// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module loader - drives the plugin container for a host runtime
//!
//! For every `(specifier, importer)` pair the host calls [`ModuleLoader::resolve`],
//! then [`ModuleLoader::load`] for the resolved id. Loading runs
//! `load` → `transform` under a per-id lock, so one id is never processed
//! twice at the same time while distinct ids proceed concurrently.

use crate::container::PluginContainer;
use crate::error::{LoaderError, Result};
use crate::id::{self, ModuleFormat};
use crate::lexer::scan_imports;
use crate::plugin::ResolveIdOptions;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A module ready for evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedModule {
    /// Resolved module id
    pub id: String,
    /// Module format
    pub format: ModuleFormat,
    /// Final source, `None` for runtime builtins
    pub source: Option<String>,
}

/// Host loading layer on top of a [`PluginContainer`]
pub struct ModuleLoader {
    container: Arc<PluginContainer>,
    /// One lock per module id
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Modules finished in this run
    loaded: DashMap<String, LoadedModule>,
}

impl ModuleLoader {
    /// Create a loader for a container
    pub fn new(container: Arc<PluginContainer>) -> Self {
        Self {
            container,
            locks: DashMap::new(),
            loaded: DashMap::new(),
        }
    }

    /// The plugin container
    pub fn container(&self) -> &Arc<PluginContainer> {
        &self.container
    }

    /// Resolve a specifier, falling back to the specifier itself when no
    /// plugin resolves it
    pub async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<String> {
        match self.container.resolve_id(specifier, parent).await? {
            Some(resolved) => Ok(resolved.id),
            None => Ok(id::normalize_id(specifier)),
        }
    }

    /// Load and transform a resolved module id.
    ///
    /// A module already loaded in this run is returned without running any
    /// hook again.
    pub async fn load(&self, id: &str) -> Result<LoadedModule> {
        let id = id::normalize_id(id);
        let lock = self.locks.entry(id.clone()).or_default().clone();
        let _guard = lock.lock().await;

        if let Some(done) = self.loaded.get(&id) {
            return Ok(done.clone());
        }

        let module = if id::is_builtin_id(&id) {
            LoadedModule {
                id: id.clone(),
                format: ModuleFormat::Builtin,
                source: None,
            }
        } else {
            let code = self.load_source(&id).await?;
            let out = self.container.transform(code, &id).await?;
            let format = match out.format {
                Some(format) => format,
                None => ModuleFormat::detect(&id, &out.code),
            };
            LoadedModule {
                id: id.clone(),
                format,
                source: Some(out.code),
            }
        };

        self.loaded.insert(id, module.clone());
        Ok(module)
    }

    /// Resolve a specifier and load the result
    pub async fn import(&self, specifier: &str, parent: Option<&str>) -> Result<LoadedModule> {
        let id = self.resolve(specifier, parent).await?;
        self.load(&id).await
    }

    /// Raw code from the `load` hooks, or from disk when no plugin loads it
    async fn load_source(&self, id: &str) -> Result<String> {
        if let Some(loaded) = self.container.load(id).await? {
            return Ok(loaded.code);
        }
        if id::is_virtual_id(id) {
            return Err(LoaderError::load(id, "no plugin loaded this virtual module"));
        }

        let start = Instant::now();
        let path = id.split('?').next().unwrap_or(id);
        let code = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LoaderError::load(id, e))?;
        self.container.record_load(id, None, &code, None, start.elapsed());
        Ok(code)
    }

    /// Load an entry file and everything it imports, breadth first.
    ///
    /// Each level of the walk is loaded concurrently. Specifiers no plugin
    /// resolves are reported and skipped; the first load failure aborts the
    /// walk.
    pub async fn load_graph(&self, entry: &str) -> Result<Vec<LoadedModule>> {
        let options = ResolveIdOptions { is_entry: true };
        let entry_id = match self.container.resolve_id_with(entry, None, options, &[]).await? {
            Some(resolved) => resolved.id,
            None => id::normalize_id(entry),
        };

        let mut seen = HashSet::from([entry_id.clone()]);
        let mut level = vec![entry_id];
        let mut modules = Vec::new();

        while !level.is_empty() {
            let loaded = futures::future::try_join_all(level.iter().map(|id| self.load(id))).await?;

            let mut next = Vec::new();
            for module in &loaded {
                for specifier in self.imported_ids(module).await? {
                    if seen.insert(specifier.clone()) {
                        next.push(specifier);
                    }
                }
            }

            modules.extend(loaded);
            level = next;
        }

        debug!(modules = modules.len(), "Loaded module graph");
        Ok(modules)
    }

    /// Resolved ids of every static and literal dynamic import of a module
    async fn imported_ids(&self, module: &LoadedModule) -> Result<Vec<String>> {
        let Some(source) = module.source.as_deref() else {
            return Ok(Vec::new());
        };
        if module.format == ModuleFormat::Json {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for import in scan_imports(source) {
            let Some(specifier) = import.value else {
                continue;
            };
            match self.container.resolve_id(&specifier, Some(&module.id)).await? {
                Some(resolved) => ids.push(resolved.id),
                None => warn!(importer = %module.id, specifier = %specifier, "Could not resolve import"),
            }
        }
        Ok(ids)
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("container", &self.container)
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigEnv, UserConfig};
    use crate::error::Result;
    use crate::plugin::{Hook, HookSpec, Plugin, PluginContext, TransformResult};
    use crate::plugins::DefaultPlugin;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Counts transforms and yields so concurrent callers interleave
    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn hooks(&self) -> Vec<HookSpec> {
            vec![Hook::Transform.into()]
        }

        async fn transform(&self, _ctx: &PluginContext<'_>, code: &str, _id: &str) -> Result<Option<TransformResult>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Some(TransformResult::new(format!("// seen\n{}", code))))
        }
    }

    async fn loader(root: &Path, counting: Arc<Counting>) -> ModuleLoader {
        let config = UserConfig {
            root: Some(root.to_path_buf()),
            cache: Some(false),
            ..Default::default()
        };
        let plugins: Vec<Arc<dyn Plugin>> = vec![counting, Arc::new(DefaultPlugin::new())];
        let container = PluginContainer::new(plugins, config, ConfigEnv::default()).await.unwrap();
        ModuleLoader::new(Arc::new(container))
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_same_id_runs_once() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root.join("a.js"), "export const a = 1;");
        let counting = Arc::new(Counting::default());
        let loader = loader(&root, counting.clone()).await;
        let id = id::path_to_id(&root.join("a.js"));

        let (first, second) = tokio::join!(loader.load(&id), loader.load(&id));

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_graph_walks_imports() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(
            &root.join("src/main.js"),
            "import { a } from './a.js';\nimport fs from 'fs';\nimport('./lazy.js');\n",
        );
        write(&root.join("src/a.js"), "import { b } from './b.js'; export const a = b;");
        write(&root.join("src/b.js"), "export const b = 1;");
        write(&root.join("src/lazy.js"), "import { a } from './a.js';");
        let counting = Arc::new(Counting::default());
        let loader = loader(&root, counting.clone()).await;

        let entry = id::path_to_id(&root.join("src/main.js"));
        let modules = loader.load_graph(&entry).await.unwrap();

        let ids: Vec<&str> = modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], entry);
        assert!(ids.contains(&"node:fs"));
        assert_eq!(counting.runs.load(Ordering::SeqCst), 4);

        let graph = loader.container().graph();
        let a = graph.get_by_file(&id::path_to_id(&root.join("src/a.js"))).unwrap();
        assert_eq!(a.importers.len(), 2);
        assert_eq!(a.imported.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_falls_back_to_specifier() {
        let dir = tempdir().unwrap();
        let loader = loader(dir.path(), Arc::new(Counting::default())).await;
        assert_eq!(loader.resolve("not-installed", None).await.unwrap(), "not-installed");

        let err = loader.load("/definitely/missing.js").await.unwrap_err();
        assert!(matches!(err, LoaderError::Load { .. }));
    }
}

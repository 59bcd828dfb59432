// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Pipeline configuration
//!
//! [`UserConfig`] is what the host hands to the pipeline and what plugins
//! extend through the `config` hook. [`ResolvedConfig`] is the frozen result
//! with every default filled in.

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default cache directory, relative to the project root
pub const DEFAULT_CACHE_DIR: &str = "node_modules/.spacey";

/// Default mode
pub const DEFAULT_MODE: &str = "development";

/// User supplied configuration. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserConfig {
    /// Project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Directory for the module cache and optimized dependencies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Mode (`development`, `production`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Whether transformed project files are cached on disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,

    /// Dependency optimizer options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_deps: Option<OptimizeDepsConfig>,

    /// Plugin-defined keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Dependency optimizer options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeDepsConfig {
    /// Disable pre-bundling entirely
    pub disabled: bool,
    /// When non-empty, only these packages are pre-bundled
    pub include: Vec<String>,
    /// Packages never pre-bundled
    pub exclude: Vec<String>,
}

impl OptimizeDepsConfig {
    /// Whether a package may be pre-bundled
    pub fn allows(&self, package: &str) -> bool {
        if self.disabled || self.exclude.iter().any(|p| p == package) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p == package)
    }
}

/// Environment passed to the `config` hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEnv {
    /// Mode (`development`, `production`, ...)
    pub mode: String,
    /// Command being run (`serve`, `run`, ...)
    pub command: String,
}

impl Default for ConfigEnv {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE.to_string(),
            command: "run".to_string(),
        }
    }
}

impl UserConfig {
    /// Load a configuration from an explicit JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LoaderError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Fill keys that are still undefined from `partial`.
    ///
    /// Keys already defined are left untouched and returned so the caller
    /// can report them.
    pub fn merge_missing(&mut self, partial: UserConfig) -> Vec<String> {
        let mut conflicts = Vec::new();

        fill(&mut self.root, partial.root, "root", &mut conflicts);
        fill(&mut self.cache_dir, partial.cache_dir, "cacheDir", &mut conflicts);
        fill(&mut self.mode, partial.mode, "mode", &mut conflicts);
        fill(&mut self.cache, partial.cache, "cache", &mut conflicts);
        fill(&mut self.optimize_deps, partial.optimize_deps, "optimizeDeps", &mut conflicts);

        for (key, value) in partial.extra {
            if self.extra.contains_key(&key) {
                conflicts.push(key);
            } else {
                self.extra.insert(key, value);
            }
        }

        conflicts
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>, key: &str, conflicts: &mut Vec<String>) {
    match (slot.is_some(), value) {
        (false, Some(value)) => *slot = Some(value),
        (true, Some(_)) => conflicts.push(key.to_string()),
        (_, None) => {}
    }
}

/// Frozen configuration shared by every part of one pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// Absolute project root
    pub root: PathBuf,
    /// Absolute cache directory
    pub cache_dir: PathBuf,
    /// Mode
    pub mode: String,
    /// Command
    pub command: String,
    /// Whether the module cache is enabled
    pub cache: bool,
    /// Dependency optimizer options
    pub optimize_deps: OptimizeDepsConfig,
    /// Plugin-defined keys
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResolvedConfig {
    /// Fill defaults into a merged user configuration
    pub fn resolve(user: UserConfig, env: &ConfigEnv) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let root = match user.root {
            Some(root) if root.is_absolute() => root,
            Some(root) => cwd.join(root),
            None => cwd,
        };
        let cache_dir = match user.cache_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => root.join(dir),
            None => root.join(DEFAULT_CACHE_DIR),
        };

        Ok(Self {
            root,
            cache_dir,
            mode: user.mode.unwrap_or_else(|| env.mode.clone()),
            command: env.command.clone(),
            cache: user.cache.unwrap_or(true),
            optimize_deps: user.optimize_deps.unwrap_or_default(),
            extra: user.extra,
        })
    }

    /// Directory holding one file per cached module
    pub fn modules_dir(&self) -> PathBuf {
        self.cache_dir.join("modules")
    }

    /// Index of cached modules
    pub fn modules_index(&self) -> PathBuf {
        self.cache_dir.join("modules.json")
    }

    /// Directory holding one bundle per optimized dependency
    pub fn deps_dir(&self) -> PathBuf {
        self.cache_dir.join("deps")
    }
}

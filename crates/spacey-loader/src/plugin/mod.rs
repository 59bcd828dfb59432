// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Plugin interface
//!
//! A plugin declares which hooks it implements through [`Plugin::hooks`],
//! optionally overriding its phase per hook, and implements the matching
//! async methods. Every hook receives a [`PluginContext`] bound to the
//! plugin for the duration of that one call.

mod context;
mod sort;

pub use context::{PluginContext, ResolveOptions};
pub use sort::{SortedPlugin, SortedPlugins};

use crate::config::{ConfigEnv, ResolvedConfig, UserConfig};
use crate::error::Result;
use crate::id::ModuleFormat;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name prefix that marks a plugin as builtin
pub const BUILTIN_PLUGIN_PREFIX: &str = "spacey:";

/// Requested position of a plugin among the plugins of one hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Runs before normal plugins
    Pre,
    /// Default position
    #[default]
    Normal,
    /// Runs after normal plugins
    Post,
}

/// Extension points a plugin may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Hook {
    /// Contribute to the user configuration
    Config,
    /// Observe the resolved configuration
    ConfigResolved,
    /// Resolve a specifier to a module id
    ResolveId,
    /// Load the source of a module id
    Load,
    /// Transform module source
    Transform,
    /// Veto reuse of cached output
    ShouldTransformCachedModule,
}

impl Hook {
    /// Every hook, in dispatch-table order
    pub const ALL: [Hook; 6] = [
        Hook::Config,
        Hook::ConfigResolved,
        Hook::ResolveId,
        Hook::Load,
        Hook::Transform,
        Hook::ShouldTransformCachedModule,
    ];
}

/// Declaration of one implemented hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSpec {
    /// The hook
    pub hook: Hook,
    /// Phase override for this hook only
    pub phase: Option<Phase>,
}

impl HookSpec {
    /// Declare a hook that runs in the plugin's own phase
    pub fn new(hook: Hook) -> Self {
        Self { hook, phase: None }
    }

    /// Override the phase of this hook
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }
}

impl From<Hook> for HookSpec {
    fn from(hook: Hook) -> Self {
        HookSpec::new(hook)
    }
}

/// Options passed to `resolve_id`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveIdOptions {
    /// Whether the specifier is the entry point of a run
    pub is_entry: bool,
}

/// Result of a successful `resolve_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedId {
    /// Resolved module id
    pub id: String,
    /// Format, when the resolver knows it
    pub format: Option<ModuleFormat>,
}

impl ResolvedId {
    /// Resolved id without a format
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            format: None,
        }
    }

    /// Attach a format
    pub fn with_format(mut self, format: ModuleFormat) -> Self {
        self.format = Some(format);
        self
    }
}

impl From<String> for ResolvedId {
    fn from(id: String) -> Self {
        ResolvedId::new(id)
    }
}

impl From<&str> for ResolvedId {
    fn from(id: &str) -> Self {
        ResolvedId::new(id)
    }
}

/// Code with an optional format, returned by `load` and `transform`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescription {
    /// Module source
    pub code: String,
    /// Format, when the plugin knows it
    pub format: Option<ModuleFormat>,
}

/// Result of a successful `load`
pub type LoadResult = SourceDescription;

/// Result of a `transform` that produced new code
pub type TransformResult = SourceDescription;

impl SourceDescription {
    /// Code without a format
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            format: None,
        }
    }

    /// Attach a format
    pub fn with_format(mut self, format: ModuleFormat) -> Self {
        self.format = Some(format);
        self
    }
}

impl From<String> for SourceDescription {
    fn from(code: String) -> Self {
        SourceDescription::new(code)
    }
}

/// A pipeline plugin.
///
/// Only hooks listed by [`Plugin::hooks`] are dispatched; the default
/// method bodies defer.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name, used for provenance. Names starting with
    /// [`BUILTIN_PLUGIN_PREFIX`] mark builtin plugins.
    fn name(&self) -> &str;

    /// Default phase for every hook of this plugin
    fn phase(&self) -> Phase {
        Phase::Normal
    }

    /// Whether the plugin takes part in a run with this environment
    #[allow(unused_variables)]
    fn apply(&self, env: &ConfigEnv) -> bool {
        true
    }

    /// Hooks this plugin implements
    fn hooks(&self) -> Vec<HookSpec>;

    /// Return a partial configuration. Only keys still undefined are taken.
    #[allow(unused_variables)]
    async fn config(
        &self,
        ctx: &PluginContext<'_>,
        config: &UserConfig,
        env: &ConfigEnv,
    ) -> Result<Option<UserConfig>> {
        Ok(None)
    }

    /// Observe the frozen configuration
    #[allow(unused_variables)]
    async fn config_resolved(&self, ctx: &PluginContext<'_>, config: &Arc<ResolvedConfig>) -> Result<()> {
        Ok(())
    }

    /// Resolve a specifier. `Ok(None)` defers to the next plugin.
    #[allow(unused_variables)]
    async fn resolve_id(
        &self,
        ctx: &PluginContext<'_>,
        specifier: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        Ok(None)
    }

    /// Load a module. `Ok(None)` defers to the next plugin.
    #[allow(unused_variables)]
    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<LoadResult>> {
        Ok(None)
    }

    /// Transform module source. `Ok(None)` passes the code through.
    #[allow(unused_variables)]
    async fn transform(&self, ctx: &PluginContext<'_>, code: &str, id: &str) -> Result<Option<TransformResult>> {
        Ok(None)
    }

    /// `Some(true)` forces a cached module to be transformed again
    #[allow(unused_variables)]
    async fn should_transform_cached_module(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<bool>> {
        Ok(None)
    }
}

/// Whether a plugin name marks a builtin plugin
pub fn is_builtin_plugin(name: &str) -> bool {
    name.starts_with(BUILTIN_PLUGIN_PREFIX)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Fallback resolution and disk loading

use crate::config::ResolvedConfig;
use crate::error::{LoaderError, Result};
use crate::id::{self, ModuleFormat};
use crate::plugin::{
    Hook, HookSpec, LoadResult, Phase, Plugin, PluginContext, ResolveIdOptions, ResolvedId,
};
use crate::resolver::{ModuleResolver, Resolution};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Name of the default plugin
pub const DEFAULT_PLUGIN_NAME: &str = "spacey:default";

/// Runs last: resolves with the Node.js algorithm and reads files from disk
#[derive(Debug, Default)]
pub struct DefaultPlugin {
    resolver: ModuleResolver,
    root: OnceLock<PathBuf>,
}

impl DefaultPlugin {
    /// Create the default plugin
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self) -> PathBuf {
        match self.root.get() {
            Some(root) => root.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

#[async_trait]
impl Plugin for DefaultPlugin {
    fn name(&self) -> &str {
        DEFAULT_PLUGIN_NAME
    }

    fn phase(&self) -> Phase {
        Phase::Post
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![Hook::ConfigResolved.into(), Hook::ResolveId.into(), Hook::Load.into()]
    }

    async fn config_resolved(&self, _ctx: &PluginContext<'_>, config: &Arc<ResolvedConfig>) -> Result<()> {
        let _ = self.root.set(config.root.clone());
        Ok(())
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext<'_>,
        specifier: &str,
        importer: Option<&str>,
        _options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        if id::is_virtual_id(specifier) {
            return Ok(None);
        }

        let importer = importer
            .filter(|i| !id::is_virtual_id(i) && !id::is_builtin_id(i))
            .map(|i| i.split('?').next().unwrap_or(i))
            .map(Path::new);

        let resolved = match self.resolver.resolve(specifier, importer, &self.root()) {
            Some(Resolution::Builtin(name)) => ResolvedId::new(name).with_format(ModuleFormat::Builtin),
            Some(Resolution::File(path)) => {
                let id = id::path_to_id(&path);
                match ModuleFormat::from_id(&id) {
                    Some(format) => ResolvedId::new(id).with_format(format),
                    None => ResolvedId::new(id),
                }
            }
            None => return Ok(None),
        };
        Ok(Some(resolved))
    }

    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<LoadResult>> {
        if id::is_builtin_id(id) || id::is_virtual_id(id) {
            return Ok(None);
        }

        let path = id.split('?').next().unwrap_or(id);
        match tokio::fs::read_to_string(path).await {
            Ok(code) => Ok(Some(LoadResult::new(code))),
            Err(e) => {
                ctx.error(LoaderError::load(id, e));
                Ok(None)
            }
        }
    }
}

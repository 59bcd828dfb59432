// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Entry timing
//!
//! Serves `virtual:spacey-entry`, a module exporting the time it was
//! evaluated and a logger, and prefixes the entry module with an import of
//! it so the time spent loading the entry's imports is printed at startup.

use crate::error::Result;
use crate::id::{self, ModuleFormat};
use crate::lexer::detect_syntax;
use crate::plugin::{
    Hook, HookSpec, LoadResult, Plugin, PluginContext, ResolveIdOptions, ResolveOptions, ResolvedId,
    TransformResult,
};
use async_trait::async_trait;
use parking_lot::RwLock;

/// Name of the entry timing plugin
pub const ENTRY_PLUGIN_NAME: &str = "spacey:entry";

/// Specifier importers use for the timing module
pub const ENTRY_MODULE: &str = "virtual:spacey-entry";

/// Resolved id of the timing module
pub const ENTRY_MODULE_ID: &str = "\0virtual:spacey-entry";

/// First line of the injected prologue
const PROLOGUE_MARKER: &str = "// spacey:entry";

const ENTRY_MODULE_SOURCE: &str = r#"export const start_time = Date.now();
export function entry_time(message) {
  console.log('\x1b[90m' + new Date().toLocaleTimeString() + '\x1b[0m', '\x1b[36m[spacey]\x1b[90m[entry]\x1b[0m', message);
}
"#;

/// Times the evaluation of the entry module's imports
#[derive(Debug, Default)]
pub struct EntryTimePlugin {
    entry: RwLock<Option<String>>,
}

impl EntryTimePlugin {
    /// Create the entry timing plugin
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the entry of the current run, once it has been resolved
    pub fn entry(&self) -> Option<String> {
        self.entry.read().clone()
    }

    fn is_entry(&self, id: &str) -> bool {
        self.entry.read().as_deref() == Some(id)
    }
}

#[async_trait]
impl Plugin for EntryTimePlugin {
    fn name(&self) -> &str {
        ENTRY_PLUGIN_NAME
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![
            Hook::ResolveId.into(),
            Hook::Load.into(),
            Hook::Transform.into(),
            Hook::ShouldTransformCachedModule.into(),
        ]
    }

    async fn resolve_id(
        &self,
        ctx: &PluginContext<'_>,
        specifier: &str,
        importer: Option<&str>,
        options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        if specifier == ENTRY_MODULE {
            return Ok(Some(ResolvedId::new(ENTRY_MODULE_ID).with_format(ModuleFormat::Module)));
        }

        if options.is_entry && importer.is_none() {
            let lookup = ResolveOptions {
                skip_self: true,
                is_entry: true,
                lookup_only: true,
            };
            let entry = match ctx.resolve(specifier, None, lookup).await? {
                Some(resolved) => resolved.id,
                None => id::normalize_id(specifier),
            };
            ctx.debug(format_args!("entry is {}", entry));
            *self.entry.write() = Some(entry);
        }
        Ok(None)
    }

    async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<LoadResult>> {
        if id != ENTRY_MODULE_ID {
            return Ok(None);
        }
        Ok(Some(LoadResult::new(ENTRY_MODULE_SOURCE).with_format(ModuleFormat::Module)))
    }

    async fn transform(&self, _ctx: &PluginContext<'_>, code: &str, id: &str) -> Result<Option<TransformResult>> {
        if !self.is_entry(id) || id::extension(id) == Some("json") || code.contains(PROLOGUE_MARKER) {
            return Ok(None);
        }
        let syntax = detect_syntax(code);
        if syntax.has_cjs && !syntax.has_esm {
            return Ok(None);
        }
        Ok(Some(TransformResult::new(inject_prologue(code))))
    }

    async fn should_transform_cached_module(
        &self,
        _ctx: &PluginContext<'_>,
        _code: &str,
        id: &str,
    ) -> Result<Option<bool>> {
        Ok(self.is_entry(id).then_some(true))
    }
}

/// Put the timing prologue in front of `code`, after any hashbang line
fn inject_prologue(code: &str) -> String {
    let (hashbang, body) = match code.strip_prefix("#!") {
        Some(rest) => match rest.find('\n') {
            Some(end) => code.split_at(end + 3),
            None => (code, ""),
        },
        None => ("", code),
    };
    let separator = if hashbang.is_empty() || hashbang.ends_with('\n') { "" } else { "\n" };

    format!(
        "{hashbang}{separator}{PROLOGUE_MARKER}\n\
         import {{ entry_time as __spacey_entry_time, start_time as __spacey_start_time }} from \"{ENTRY_MODULE}\";\n\
         __spacey_entry_time(\"Executed entry file in \" + (Date.now() - __spacey_start_time) + \" milliseconds\");\n\
         {body}"
    )
}

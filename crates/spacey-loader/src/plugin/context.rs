// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-call plugin context

use super::{ResolveIdOptions, ResolvedId};
use crate::container::PluginContainer;
use crate::error::Result;
use futures::future::BoxFuture;
use std::fmt::Display;
use tracing::{debug, error, info, warn};

/// Options for [`PluginContext::resolve`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip the calling plugin, so a resolver can delegate to the rest of
    /// the chain without recursing into itself
    pub skip_self: bool,
    /// Whether the specifier is an entry point
    pub is_entry: bool,
    /// Only look the id up: record nothing in the module graph
    pub lookup_only: bool,
}

/// Context handed to a plugin for one hook call.
///
/// Bound to the plugin that is executing, so logs are attributed to it and
/// `resolve(.., skip_self)` knows whom to skip. A context never outlives the
/// call it was created for.
pub struct PluginContext<'a> {
    plugin: &'a str,
    container: Option<&'a PluginContainer>,
    skip: &'a [String],
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(plugin: &'a str, container: &'a PluginContainer, skip: &'a [String]) -> Self {
        Self {
            plugin,
            container: Some(container),
            skip,
        }
    }

    /// Context for hooks that run before the container exists (`config`)
    pub(crate) fn detached(plugin: &'a str) -> Self {
        Self {
            plugin,
            container: None,
            skip: &[],
        }
    }

    /// Name of the plugin this context belongs to
    pub fn plugin_name(&self) -> &str {
        self.plugin
    }

    /// Resolve a specifier through the pipeline's `resolve_id` chain
    pub fn resolve<'b>(
        &'b self,
        specifier: &'b str,
        importer: Option<&'b str>,
        options: ResolveOptions,
    ) -> BoxFuture<'b, Result<Option<ResolvedId>>> {
        Box::pin(async move {
            let Some(container) = self.container else {
                debug!(plugin = self.plugin, specifier, "resolve called outside of a pipeline run");
                return Ok(None);
            };

            let mut skip = self.skip.to_vec();
            if options.skip_self && !skip.iter().any(|name| name == self.plugin) {
                skip.push(self.plugin.to_string());
            }

            container
                .resolve_chain(
                    specifier,
                    importer,
                    ResolveIdOptions {
                        is_entry: options.is_entry,
                    },
                    &skip,
                    !options.lookup_only,
                )
                .await
        })
    }

    /// Log a debug message attributed to the plugin
    pub fn debug(&self, message: impl Display) {
        debug!(plugin = self.plugin, "{}", message);
    }

    /// Log an informational message attributed to the plugin
    pub fn info(&self, message: impl Display) {
        info!(plugin = self.plugin, "{}", message);
    }

    /// Log a warning attributed to the plugin
    pub fn warn(&self, message: impl Display) {
        warn!(plugin = self.plugin, "{}", message);
    }

    /// Log an error attributed to the plugin
    pub fn error(&self, message: impl Display) {
        error!(plugin = self.plugin, "{}", message);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Builtin plugins

mod default;
mod entry;
mod esbuild;
mod json;

pub use default::{DefaultPlugin, DEFAULT_PLUGIN_NAME};
pub use entry::{EntryTimePlugin, ENTRY_MODULE, ENTRY_MODULE_ID, ENTRY_PLUGIN_NAME};
pub use esbuild::{EsbuildPlugin, EsbuildTransformer, SourceLoader, Transformer, ESBUILD_PLUGIN_NAME};
pub use json::{json_to_esm, JsonPlugin, JSON_PLUGIN_NAME};

use crate::optimizer::{Bundler, OptimizeDepsPlugin};
use crate::plugin::Plugin;
use std::sync::Arc;

/// The builtin plugins, in dispatch order. `bundler` pre-bundles
/// dependencies and `transformer` compiles TypeScript and JSX.
pub fn builtin_plugins(bundler: Arc<dyn Bundler>, transformer: Arc<dyn Transformer>) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(OptimizeDepsPlugin::new(bundler)),
        Arc::new(JsonPlugin::new()),
        Arc::new(EsbuildPlugin::new(transformer)),
        Arc::new(EntryTimePlugin::new()),
        Arc::new(DefaultPlugin::new()),
    ]
}

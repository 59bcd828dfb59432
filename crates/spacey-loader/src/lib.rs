// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-loader
//!
//! A plugin-driven module pipeline for the Spacey runtime.
//!
//! Every module the host imports flows through ordered plugin hooks:
//!
//! - `resolveId` maps a specifier and importer to a module id
//! - `load` produces the raw source for an id
//! - `transform` rewrites the source, each plugin seeing the previous output
//!
//! Along the way the pipeline records a [`ModuleGraph`] of who imports whom,
//! reuses transformed code from a content-hashed on-disk [`ModuleCache`],
//! and pre-bundles bare dependency imports with an external bundler.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spacey_loader::{
//!     builtin_plugins, ConfigEnv, EsbuildBundler, EsbuildTransformer, ModuleLoader, PluginContainer, UserConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> spacey_loader::Result<()> {
//!     let root = std::env::current_dir()?;
//!     let bundler = Arc::new(EsbuildBundler::locate(&root));
//!     let transformer = Arc::new(EsbuildTransformer::locate(&root));
//!     let plugins = builtin_plugins(bundler, transformer);
//!     let container = PluginContainer::new(plugins, UserConfig::default(), ConfigEnv::default()).await?;
//!
//!     let loader = ModuleLoader::new(Arc::new(container));
//!     let main = loader.import("./src/main.ts", None).await?;
//!     println!("{}", main.source.unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Plugin order
//!
//! Plugins run in six buckets: `pre` user plugins, `pre` builtins, `normal`
//! user plugins, `normal` builtins, `post` user plugins, `post` builtins.
//! Builtins are the plugins whose name starts with `spacey:`. Within a bucket
//! plugins keep their registration order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod graph;
pub mod id;
pub mod lexer;
pub mod loader;
pub mod optimizer;
pub mod plugin;
pub mod plugins;
pub mod resolver;

// Re-exports
pub use bus::{BusClient, InProcessTransport, Transport};
pub use cache::ModuleCache;
pub use config::{ConfigEnv, ResolvedConfig, UserConfig};
pub use container::PluginContainer;
pub use error::{LoaderError, Result};
pub use graph::{ModuleGraph, ModuleNode};
pub use id::ModuleFormat;
pub use loader::{LoadedModule, ModuleLoader};
pub use optimizer::{Bundler, EsbuildBundler, OptimizeDepsPlugin};
pub use plugin::{Hook, HookSpec, Phase, Plugin, PluginContext, ResolvedId, SourceDescription};
pub use plugins::{builtin_plugins, EsbuildTransformer, Transformer};

/// Version of the loader
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

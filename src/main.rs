// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-dev CLI - runs a project's import graph through the loader pipeline

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use spacey_loader::config::OptimizeDepsConfig;
use spacey_loader::graph::ModuleNode;
use spacey_loader::{
    builtin_plugins, ConfigEnv, EsbuildBundler, EsbuildTransformer, Hook, LoadedModule, ModuleLoader, PluginContainer,
    UserConfig, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "spacey-dev",
    about = "Resolve, load and transform a module graph through the Spacey plugin pipeline",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Entry module
    entry: String,

    /// Project root (defaults to the current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Cache directory (defaults to <root>/node_modules/.spacey)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Disable the module cache
    #[arg(long)]
    no_cache: bool,

    /// Disable dependency pre-bundling
    #[arg(long)]
    no_optimize: bool,

    /// Package to leave out of dependency pre-bundling
    #[arg(long = "exclude", value_name = "PKG")]
    exclude: Vec<String>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the final source of every module
    #[arg(long)]
    print: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    /// Configuration file overlaid with command line flags
    fn user_config(&self) -> anyhow::Result<UserConfig> {
        let mut config = match &self.config {
            Some(path) => UserConfig::from_file(path)
                .with_context(|| format!("Failed to read config file '{}'", path.display()))?,
            None => UserConfig::default(),
        };

        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
        if self.no_cache {
            config.cache = Some(false);
        }
        if self.no_optimize || !self.exclude.is_empty() {
            let optimize_deps = config.optimize_deps.get_or_insert_with(OptimizeDepsConfig::default);
            optimize_deps.disabled |= self.no_optimize;
            optimize_deps.exclude.extend(self.exclude.iter().cloned());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_loader=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_loader=warn")
            .init();
    }

    let config = cli.user_config()?;
    let root = match &config.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };

    let bundler = Arc::new(EsbuildBundler::locate(&root));
    let transformer = Arc::new(EsbuildTransformer::locate(&root));
    let container = PluginContainer::new(builtin_plugins(bundler, transformer), config, ConfigEnv::default()).await?;
    let loader = ModuleLoader::new(Arc::new(container));

    let entry = root.join(&cli.entry);
    let modules = match loader.load_graph(&entry.to_string_lossy()).await {
        Ok(modules) => modules,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    };

    print_banner(loader.container());
    for module in &modules {
        print_module(module, loader.container().module(&module.id).as_ref());
        if cli.print {
            if let Some(source) = &module.source {
                println!("{}", source.dimmed());
            }
        }
    }

    let hits = modules
        .iter()
        .filter_map(|m| loader.container().module(&m.id))
        .filter(|node| node.cache_hit)
        .count();
    println!();
    println!(
        "{} {} modules, {} from cache",
        "done".green().bold(),
        modules.len(),
        hits
    );

    Ok(())
}

fn print_banner(container: &PluginContainer) {
    println!("{} {}", "spacey-dev".cyan().bold(), VERSION.yellow());
    println!("{} {}", "root".dimmed(), container.config().root.display());
    println!(
        "{} {}",
        "transforms".dimmed(),
        container.plugins().names(Hook::Transform).join(", ")
    );
    println!();
}

fn print_module(module: &LoadedModule, node: Option<&ModuleNode>) {
    let Some(node) = node else {
        println!("{} {}", module.id.bold(), format!("{:?}", module.format).dimmed());
        return;
    };

    let cached = if node.cache_hit { " (cached)".green().to_string() } else { String::new() };
    println!(
        "{} {}{}",
        module.id.bold(),
        format!("{:?} {:?}", node.kind, module.format).dimmed(),
        cached
    );

    if let Some(resolve) = &node.resolve_result {
        println!("  {} {} {}", "resolve".blue(), resolve.plugin, elapsed(resolve.elapsed));
    }
    if let Some(load) = &node.load_result {
        println!(
            "  {} {} {}",
            "load".blue(),
            load.plugin.as_deref().unwrap_or("host"),
            elapsed(load.elapsed)
        );
    }
    for step in node.transform_history.iter().filter(|step| step.changed) {
        println!("  {} {} {}", "transform".magenta(), step.plugin, elapsed(step.elapsed));
    }
}

fn elapsed(duration: Duration) -> String {
    format!("{:.2}ms", duration.as_secs_f64() * 1000.0).dimmed().to_string()
}

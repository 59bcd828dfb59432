// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dependency optimizer
//!
//! A `pre` transform that pre-bundles the third-party packages a project
//! file imports and points the import specifiers at the bundles.
//!
//! For every bare specifier found by the import lexer, the package entry is
//! resolved through the pipeline, bundled once per specifier and version
//! into `<cache_dir>/deps/`, and the specifier text is replaced with the
//! bundle's path relative to the importing file. Everything else in the
//! statement, including the quotes, is left as written.

mod bundler;

pub use bundler::{locate_esbuild, BundleOptions, Bundler, EsbuildBundler};

use crate::config::ResolvedConfig;
use crate::error::Result;
use crate::id;
use crate::lexer::{scan_imports, ImportSpan, Span};
use crate::plugin::{Hook, HookSpec, Phase, Plugin, PluginContext, ResolveOptions, TransformResult};
use crate::resolver::{parse_package_specifier, read_package_version};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Name of the optimizer plugin
pub const OPTIMIZER_PLUGIN_NAME: &str = "spacey:optimize-deps";

/// Version used in artifact names when a package declares none
const UNKNOWN_VERSION: &str = "0.0.0";

/// One specifier rewrite, valid only during one transform call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceJob {
    /// Span of the whole statement
    pub statement: Span,
    /// Span of the specifier text inside the quotes
    pub specifier: Span,
    /// Bare specifier as written
    pub bare: String,
    /// Bundle artifact
    pub bundle: PathBuf,
    /// Whether the specifier belongs to a dynamic `import()`
    pub dynamic: bool,
}

type BundleSlot = Arc<OnceCell<Option<PathBuf>>>;

/// The dependency optimizer plugin
pub struct OptimizeDepsPlugin {
    bundler: Arc<dyn Bundler>,
    options: BundleOptions,
    config: OnceLock<Arc<ResolvedConfig>>,
    /// In-flight and finished bundles keyed by `specifier@version`
    bundles: DashMap<String, BundleSlot>,
}

impl OptimizeDepsPlugin {
    /// Create the optimizer with a bundler
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        Self::with_options(bundler, BundleOptions::default())
    }

    /// Create the optimizer with a bundler and bundle options
    pub fn with_options(bundler: Arc<dyn Bundler>, options: BundleOptions) -> Self {
        Self {
            bundler,
            options,
            config: OnceLock::new(),
            bundles: DashMap::new(),
        }
    }

    /// Number of distinct bundles requested so far
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    /// Resolve and bundle one import. `None` leaves the specifier as written.
    async fn prepare(
        &self,
        ctx: &PluginContext<'_>,
        config: &ResolvedConfig,
        import: &ImportSpan,
        importer: &str,
    ) -> Option<ReplaceJob> {
        let bare = import.value.as_deref()?;
        let (package, _) = parse_package_specifier(bare);
        if !config.optimize_deps.allows(package) {
            debug!(package, "Excluded from dependency optimization");
            return None;
        }

        // The import is about to point at the bundle, so the package entry
        // itself never becomes part of the graph
        let options = ResolveOptions {
            skip_self: true,
            lookup_only: true,
            ..Default::default()
        };
        let entry = match ctx.resolve(bare, Some(importer), options).await {
            Ok(Some(resolved)) if id::is_dependency_path(&resolved.id) => resolved.id,
            Ok(_) => {
                debug!(specifier = bare, "Not an installed dependency, leaving as is");
                return None;
            }
            Err(e) => {
                ctx.warn(format!("Failed to resolve '{}': {}", bare, e));
                return None;
            }
        };

        let version = id::parse_package_path(&entry)
            .and_then(|info| info.version)
            .or_else(|| id::package_root(&entry).and_then(|root| read_package_version(Path::new(&root))))
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let bundle = self.bundle_once(config, bare, &version, &entry).await?;

        Some(ReplaceJob {
            statement: import.statement,
            specifier: import.specifier,
            bare: bare.to_string(),
            bundle,
            dynamic: import.dynamic,
        })
    }

    /// Bundle a specifier at most once per version, awaiting an in-flight
    /// build instead of starting another one
    async fn bundle_once(&self, config: &ResolvedConfig, bare: &str, version: &str, entry: &str) -> Option<PathBuf> {
        let key = format!("{}@{}", bare, version);
        let slot = self.bundles.entry(key).or_default().clone();

        slot.get_or_init(|| self.build(config, bare, version, entry))
            .await
            .clone()
    }

    async fn build(&self, config: &ResolvedConfig, bare: &str, version: &str, entry: &str) -> Option<PathBuf> {
        let output = config.deps_dir().join(artifact_name(bare, version));
        if output.is_file() {
            debug!(specifier = bare, version, "Reusing pre-bundled dependency");
            return Some(output);
        }

        if let Err(e) = tokio::fs::create_dir_all(config.deps_dir()).await {
            error!(package = bare, "Failed to create dependency directory: {}", e);
            return None;
        }

        match self.bundler.bundle(Path::new(entry), &output, &self.options).await {
            Ok(()) => {
                info!(package = bare, version, bundler = self.bundler.name(), "Pre-bundled dependency");
                Some(output)
            }
            Err(e) => {
                error!(package = bare, "Failed to pre-bundle dependency: {}", e);
                None
            }
        }
    }
}

impl std::fmt::Debug for OptimizeDepsPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizeDepsPlugin")
            .field("bundler", &self.bundler.name())
            .field("options", &self.options)
            .field("bundles", &self.bundles.len())
            .finish()
    }
}

#[async_trait]
impl Plugin for OptimizeDepsPlugin {
    fn name(&self) -> &str {
        OPTIMIZER_PLUGIN_NAME
    }

    fn phase(&self) -> Phase {
        Phase::Pre
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![Hook::ConfigResolved.into(), Hook::Transform.into()]
    }

    async fn config_resolved(&self, _ctx: &PluginContext<'_>, config: &Arc<ResolvedConfig>) -> Result<()> {
        let _ = self.config.set(Arc::clone(config));
        Ok(())
    }

    async fn transform(&self, ctx: &PluginContext<'_>, code: &str, id: &str) -> Result<Option<TransformResult>> {
        if id::is_dependency_path(id) || id::is_builtin_id(id) || id::is_virtual_id(id) {
            return Ok(None);
        }
        let Some(config) = self.config.get() else {
            return Ok(None);
        };
        if config.optimize_deps.disabled {
            return Ok(None);
        }

        let candidates: Vec<ImportSpan> = scan_imports(code)
            .into_iter()
            .filter(|import| import.value.as_deref().is_some_and(is_bare_specifier))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let jobs = futures::future::join_all(
            candidates
                .iter()
                .map(|import| self.prepare(ctx, config, import, id)),
        )
        .await;
        let jobs: Vec<ReplaceJob> = jobs.into_iter().flatten().collect();
        if jobs.is_empty() {
            return Ok(None);
        }

        ctx.debug(format!("Rewriting {} dependency import(s) in {}", jobs.len(), id));
        Ok(Some(TransformResult::new(apply_jobs(code, id, jobs))))
    }
}

/// Whether a specifier names a package. Relative, absolute, aliased and
/// protocol specifiers are not bare.
pub fn is_bare_specifier(specifier: &str) -> bool {
    !specifier.is_empty()
        && !specifier.starts_with(['.', '/', '#', '~', '\0'])
        && !specifier.contains(':')
}

/// File name of the bundle of a specifier at a version
pub fn artifact_name(specifier: &str, version: &str) -> String {
    format!("{}@{}.js", specifier.replace(['/', '\\'], "+"), version)
}

/// Import path of `bundle` as seen from the file `importer`
pub fn relative_import_path(bundle: &Path, importer: &str) -> String {
    let importer_dir = Path::new(importer).parent().unwrap_or_else(|| Path::new("/"));
    let relative = pathdiff::diff_paths(bundle, importer_dir).unwrap_or_else(|| bundle.to_path_buf());
    let relative = relative.to_string_lossy().replace('\\', "/");
    if relative.starts_with("../") || relative.starts_with('/') {
        relative
    } else {
        format!("./{}", relative)
    }
}

/// Splice every job's bundle path into its specifier span
fn apply_jobs(code: &str, importer: &str, mut jobs: Vec<ReplaceJob>) -> String {
    // Back to front, so earlier spans stay valid
    jobs.sort_by(|a, b| b.specifier.start.cmp(&a.specifier.start));

    let mut out = code.to_string();
    for job in jobs {
        let path = relative_import_path(&job.bundle, importer);
        debug!(
            specifier = %job.bare,
            statement = job.statement.slice(code),
            dynamic = job.dynamic,
            "Pointing import at {}", path
        );
        out.replace_range(job.specifier.start..job.specifier.end, &path);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigEnv, OptimizeDepsConfig, UserConfig};
    use crate::container::PluginContainer;
    use crate::error::LoaderError;
    use crate::plugins::DefaultPlugin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Bundler that copies the entry and counts invocations
    #[derive(Default)]
    struct CopyBundler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Bundler for CopyBundler {
        fn name(&self) -> &str {
            "copy"
        }

        async fn bundle(&self, entry: &Path, output: &Path, _options: &BundleOptions) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            tokio::fs::copy(entry, output).await?;
            Ok(())
        }
    }

    struct FailingBundler;

    #[async_trait]
    impl Bundler for FailingBundler {
        fn name(&self) -> &str {
            "failing"
        }

        async fn bundle(&self, entry: &Path, _output: &Path, _options: &BundleOptions) -> Result<()> {
            Err(LoaderError::Bundle {
                package: entry.display().to_string(),
                reason: "syntax error".to_string(),
            })
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(
            &root.join("node_modules/left-pad/package.json"),
            r#"{ "name": "left-pad", "version": "1.3.0", "main": "index.js" }"#,
        );
        write(&root.join("node_modules/left-pad/index.js"), "module.exports = function leftPad() {}");
        write(&root.join("src/util.js"), "export const util = 1;");
        (dir, root)
    }

    async fn pipeline(root: &Path, bundler: Arc<dyn Bundler>, optimize_deps: OptimizeDepsConfig) -> PluginContainer {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(OptimizeDepsPlugin::new(bundler)),
            Arc::new(DefaultPlugin::new()),
        ];
        let config = UserConfig {
            root: Some(root.to_path_buf()),
            cache: Some(false),
            optimize_deps: Some(optimize_deps),
            ..Default::default()
        };
        PluginContainer::new(plugins, config, ConfigEnv::default()).await.unwrap()
    }

    #[test]
    fn test_is_bare_specifier() {
        assert!(is_bare_specifier("left-pad"));
        assert!(is_bare_specifier("@scope/pkg/sub"));
        assert!(!is_bare_specifier("./util.js"));
        assert!(!is_bare_specifier("../x"));
        assert!(!is_bare_specifier("/abs/x.js"));
        assert!(!is_bare_specifier("#internal"));
        assert!(!is_bare_specifier("node:fs"));
        assert!(!is_bare_specifier("file:///x.js"));
        assert!(!is_bare_specifier("\0virtual:x"));
    }

    #[test]
    fn test_relative_import_path() {
        let bundle = Path::new("/app/node_modules/.spacey/deps/left-pad@1.3.0.js");
        assert_eq!(
            relative_import_path(bundle, "/app/src/main.js"),
            "../node_modules/.spacey/deps/left-pad@1.3.0.js"
        );
        assert_eq!(
            relative_import_path(Path::new("/app/deps/x.js"), "/app/main.js"),
            "./deps/x.js"
        );
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("left-pad", "1.3.0"), "left-pad@1.3.0.js");
        assert_eq!(artifact_name("@scope/pkg/sub", "2.0.0"), "@scope+pkg+sub@2.0.0.js");
    }

    #[test]
    fn test_apply_jobs_preserves_quotes_and_statements() {
        let code = r#"import a from 'a'; const b = import("b");"#;
        let imports = scan_imports(code);
        let jobs = imports
            .iter()
            .map(|import| ReplaceJob {
                statement: import.statement,
                specifier: import.specifier,
                bare: import.value.clone().unwrap(),
                bundle: PathBuf::from(format!("/app/deps/{}.js", import.value.as_deref().unwrap())),
                dynamic: import.dynamic,
            })
            .collect();

        assert_eq!(
            apply_jobs(code, "/app/main.js", jobs),
            r#"import a from './deps/a.js'; const b = import("./deps/b.js");"#
        );
    }

    #[tokio::test]
    async fn test_rewrites_bare_specifier_only() {
        let (_dir, root) = project();
        let bundler = Arc::new(CopyBundler::default());
        let container = pipeline(&root, bundler.clone(), OptimizeDepsConfig::default()).await;
        let main = root.join("src/main.js");
        let source = "import lp from \"left-pad\"; import \"./util.js\";\n";

        let out = container
            .transform(source.to_string(), &main.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(
            out.code,
            "import lp from \"../node_modules/.spacey/deps/left-pad@1.3.0.js\"; import \"./util.js\";\n"
        );
        assert!(root.join("node_modules/.spacey/deps/left-pad@1.3.0.js").is_file());
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);

        // The package entry was only looked up
        let graph = container.graph();
        let entry = id::path_to_id(&root.join("node_modules/left-pad/index.js"));
        assert!(graph.get_by_file(&entry).is_none());
        let importer = graph.get_by_file(&id::path_to_id(&main)).unwrap();
        assert!(importer.imported.is_empty());
    }

    #[tokio::test]
    async fn test_one_artifact_for_two_importers() {
        let (_dir, root) = project();
        let bundler = Arc::new(CopyBundler::default());
        let container = pipeline(&root, bundler.clone(), OptimizeDepsConfig::default()).await;
        let a = root.join("src/a.js").to_string_lossy().to_string();
        let b = root.join("src/nested/b.js").to_string_lossy().to_string();

        let (out_a, out_b) = tokio::join!(
            container.transform("import lp from 'left-pad';".to_string(), &a),
            container.transform("export { default } from 'left-pad';".to_string(), &b),
        );

        assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);
        let artifacts: Vec<_> = std::fs::read_dir(root.join("node_modules/.spacey/deps"))
            .unwrap()
            .collect();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            out_a.unwrap().code,
            "import lp from '../node_modules/.spacey/deps/left-pad@1.3.0.js';"
        );
        assert_eq!(
            out_b.unwrap().code,
            "export { default } from '../../node_modules/.spacey/deps/left-pad@1.3.0.js';"
        );
    }

    #[tokio::test]
    async fn test_excluded_and_unresolvable_left_alone() {
        let (_dir, root) = project();
        let bundler = Arc::new(CopyBundler::default());
        let optimize_deps = OptimizeDepsConfig {
            exclude: vec!["left-pad".to_string()],
            ..Default::default()
        };
        let container = pipeline(&root, bundler.clone(), optimize_deps).await;
        let main = root.join("src/main.js").to_string_lossy().to_string();
        let source = "import lp from 'left-pad'; import fs from 'fs'; import x from 'not-installed'; import(dyn);";

        let out = container.transform(source.to_string(), &main).await.unwrap();

        assert_eq!(out.code, source);
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bundle_failure_keeps_specifier() {
        let (_dir, root) = project();
        let container = pipeline(&root, Arc::new(FailingBundler), OptimizeDepsConfig::default()).await;
        let main = root.join("src/main.js").to_string_lossy().to_string();
        let source = "import lp from 'left-pad';";

        let out = container.transform(source.to_string(), &main).await.unwrap();
        assert_eq!(out.code, source);
    }

    #[tokio::test]
    async fn test_dependency_files_are_not_rewritten() {
        let (_dir, root) = project();
        let bundler = Arc::new(CopyBundler::default());
        let container = pipeline(&root, bundler.clone(), OptimizeDepsConfig::default()).await;
        let inner = root.join("node_modules/other/index.js").to_string_lossy().to_string();

        let out = container
            .transform("import lp from 'left-pad';".to_string(), &inner)
            .await
            .unwrap();
        assert_eq!(out.code, "import lp from 'left-pad';");
        assert_eq!(bundler.calls.load(Ordering::SeqCst), 0);
    }
}

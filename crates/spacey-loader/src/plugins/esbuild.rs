// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! TypeScript and JSX compilation
//!
//! Project `.ts`, `.tsx` and `.jsx` files are piped through an external
//! compiler, one file at a time. Dependency files, builtins and virtual
//! modules are left alone.

use crate::error::{LoaderError, Result};
use crate::id::{self, ModuleFormat};
use crate::optimizer::locate_esbuild;
use crate::plugin::{Hook, HookSpec, Plugin, PluginContext, TransformResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Name of the compile plugin
pub const ESBUILD_PLUGIN_NAME: &str = "spacey:esbuild";

/// Source language of a file handed to a [`Transformer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLoader {
    /// TypeScript (`.ts`, `.mts`, `.cts`)
    Ts,
    /// TypeScript with JSX (`.tsx`)
    Tsx,
    /// JavaScript with JSX (`.jsx`)
    Jsx,
}

impl SourceLoader {
    /// Loader for an id, `None` for plain JavaScript and everything else
    pub fn from_id(id: &str) -> Option<Self> {
        match id::extension(id)? {
            "ts" | "mts" | "cts" => Some(SourceLoader::Ts),
            "tsx" => Some(SourceLoader::Tsx),
            "jsx" => Some(SourceLoader::Jsx),
            _ => None,
        }
    }

    /// Name of the loader on the esbuild command line
    pub fn as_str(self) -> &'static str {
        match self {
            SourceLoader::Ts => "ts",
            SourceLoader::Tsx => "tsx",
            SourceLoader::Jsx => "jsx",
        }
    }
}

impl fmt::Display for SourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiles one source file to plain JavaScript
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Compile `code`, read from `file`, with the given loader
    async fn transform(&self, code: &str, file: &str, loader: SourceLoader) -> Result<String>;
}

/// Transformer driving the `esbuild` executable over stdin
#[derive(Debug, Clone)]
pub struct EsbuildTransformer {
    program: PathBuf,
}

impl EsbuildTransformer {
    /// Use the given executable
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Prefer the project's `node_modules/.bin/esbuild`, falling back to
    /// `esbuild` on `PATH`
    pub fn locate(root: &Path) -> Self {
        Self::new(locate_esbuild(root))
    }

    /// Executable this transformer runs
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Transformer for EsbuildTransformer {
    fn name(&self) -> &str {
        "esbuild"
    }

    async fn transform(&self, code: &str, file: &str, loader: SourceLoader) -> Result<String> {
        debug!(file, %loader, "Running esbuild transform");
        let mut child = Command::new(&self.program)
            .arg(format!("--loader={}", loader))
            .arg(format!("--sourcefile={}", file))
            .arg("--log-level=error")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LoaderError::Generic(format!("failed to run {}: {}", self.program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
        }

        let out = child.wait_with_output().await?;
        if !out.status.success() {
            return Err(LoaderError::Generic(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        String::from_utf8(out.stdout)
            .map_err(|e| LoaderError::Generic(format!("esbuild produced invalid UTF-8: {}", e)))
    }
}

/// Compiles project TypeScript and JSX files to JavaScript
pub struct EsbuildPlugin {
    transformer: Arc<dyn Transformer>,
}

impl EsbuildPlugin {
    /// Create the compile plugin around `transformer`
    pub fn new(transformer: Arc<dyn Transformer>) -> Self {
        Self { transformer }
    }
}

#[async_trait]
impl Plugin for EsbuildPlugin {
    fn name(&self) -> &str {
        ESBUILD_PLUGIN_NAME
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![Hook::Transform.into()]
    }

    async fn transform(&self, ctx: &PluginContext<'_>, code: &str, id: &str) -> Result<Option<TransformResult>> {
        if id::is_dependency_path(id) || id::is_builtin_id(id) || id::is_virtual_id(id) {
            return Ok(None);
        }
        let Some(loader) = SourceLoader::from_id(id) else {
            return Ok(None);
        };

        let file = id.split('?').next().unwrap_or(id);
        ctx.debug(format_args!("compiling {} with {}", file, self.transformer.name()));
        let compiled = self.transformer.transform(code, file, loader).await?;
        let format = ModuleFormat::detect(file, &compiled);
        Ok(Some(TransformResult::new(compiled).with_format(format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    /// Drops `: number` annotations and records what it was asked to compile
    #[derive(Default)]
    struct StripTypes {
        seen: Mutex<Vec<(String, SourceLoader)>>,
    }

    #[async_trait]
    impl Transformer for StripTypes {
        fn name(&self) -> &str {
            "strip-types"
        }

        async fn transform(&self, code: &str, file: &str, loader: SourceLoader) -> Result<String> {
            self.seen.lock().push((file.to_string(), loader));
            Ok(code.replace(": number", ""))
        }
    }

    fn plugin() -> (Arc<StripTypes>, EsbuildPlugin) {
        let transformer = Arc::new(StripTypes::default());
        (transformer.clone(), EsbuildPlugin::new(transformer))
    }

    #[test]
    fn test_loader_from_id() {
        assert_eq!(SourceLoader::from_id("/app/a.ts"), Some(SourceLoader::Ts));
        assert_eq!(SourceLoader::from_id("/app/a.cts"), Some(SourceLoader::Ts));
        assert_eq!(SourceLoader::from_id("/app/a.tsx?v=1"), Some(SourceLoader::Tsx));
        assert_eq!(SourceLoader::from_id("/app/a.jsx"), Some(SourceLoader::Jsx));
        assert_eq!(SourceLoader::from_id("/app/a.js"), None);
        assert_eq!(SourceLoader::from_id("/app/data.json"), None);
    }

    #[tokio::test]
    async fn test_compiles_project_typescript() {
        let (transformer, plugin) = plugin();
        let ctx = PluginContext::detached(ESBUILD_PLUGIN_NAME);

        let out = plugin
            .transform(&ctx, "export const n: number = 1;\n", "/app/src/n.ts?t=1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(out.code, "export const n = 1;\n");
        assert_eq!(out.format, Some(ModuleFormat::Module));
        assert_eq!(*transformer.seen.lock(), vec![("/app/src/n.ts".to_string(), SourceLoader::Ts)]);
    }

    #[tokio::test]
    async fn test_commonjs_typescript_keeps_its_format() {
        let (_, plugin) = plugin();
        let ctx = PluginContext::detached(ESBUILD_PLUGIN_NAME);

        let out = plugin
            .transform(&ctx, "module.exports = 1;\n", "/app/src/legacy.cts")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(out.format, Some(ModuleFormat::CommonJs));
    }

    #[tokio::test]
    async fn test_skips_javascript_and_dependencies() {
        let (transformer, plugin) = plugin();
        let ctx = PluginContext::detached(ESBUILD_PLUGIN_NAME);

        for id in [
            "/app/src/a.js",
            "/app/node_modules/typed/index.ts",
            "\0virtual:types.ts",
            "node:fs",
        ] {
            assert!(plugin.transform(&ctx, "x", id).await.unwrap().is_none(), "{}", id);
        }
        assert!(transformer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_executable_fails() {
        let dir = tempdir().unwrap();
        let transformer = EsbuildTransformer::new(dir.path().join("no-such-esbuild"));
        let err = transformer
            .transform("let a: number = 1;", "/app/a.ts", SourceLoader::Ts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }

    #[test]
    fn test_locate_falls_back_to_path() {
        let dir = tempdir().unwrap();
        assert_eq!(EsbuildTransformer::locate(dir.path()).program(), Path::new("esbuild"));
    }
}

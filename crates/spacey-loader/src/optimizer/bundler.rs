// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! External single-entry bundler

use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Options for one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOptions {
    /// Output module format
    pub format: String,
    /// Target platform
    pub platform: String,
    /// Language target
    pub target: String,
    /// Minify the output
    pub minify: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            format: "esm".to_string(),
            platform: "node".to_string(),
            target: "node18".to_string(),
            minify: true,
        }
    }
}

/// Bundles one entry file and its dependencies into one output file
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Bundle `entry` into `output`
    async fn bundle(&self, entry: &Path, output: &Path, options: &BundleOptions) -> Result<()>;
}

/// The project's `node_modules/.bin/esbuild` if installed, otherwise
/// `esbuild` from `PATH`
pub fn locate_esbuild(root: &Path) -> PathBuf {
    let local = root.join("node_modules").join(".bin").join(if cfg!(windows) {
        "esbuild.cmd"
    } else {
        "esbuild"
    });
    if local.is_file() { local } else { PathBuf::from("esbuild") }
}

/// Bundler driving the `esbuild` executable
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: PathBuf,
}

impl EsbuildBundler {
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

    /// Executable this bundler runs
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    fn name(&self) -> &str {
        "esbuild"
    }

    async fn bundle(&self, entry: &Path, output: &Path, options: &BundleOptions) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg(entry)
            .arg("--bundle")
            .arg(format!("--outfile={}", output.display()))
            .arg(format!("--format={}", options.format))
            .arg(format!("--platform={}", options.platform))
            .arg(format!("--target={}", options.target))
            .arg("--log-level=error");
        if options.minify {
            command.arg("--minify");
        }

        debug!(entry = %entry.display(), output = %output.display(), "Running esbuild");
        let out = command.output().await.map_err(|e| LoaderError::Bundle {
            package: entry.display().to_string(),
            reason: format!("failed to run {}: {}", self.program.display(), e),
        })?;

        if !out.status.success() {
            return Err(LoaderError::Bundle {
                package: entry.display().to_string(),
                reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_locate_falls_back_to_path() {
        let dir = tempdir().unwrap();
        assert_eq!(EsbuildBundler::locate(dir.path()).program(), Path::new("esbuild"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_bundle_error() {
        let dir = tempdir().unwrap();
        let bundler = EsbuildBundler::new(dir.path().join("no-such-esbuild"));
        let err = bundler
            .bundle(&dir.path().join("in.js"), &dir.path().join("out.js"), &BundleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Bundle { .. }));
    }
}

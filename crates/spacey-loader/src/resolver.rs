// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution (Node.js algorithm)

use crate::id::{BUILTIN_PREFIX, DEPS_DIR};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Built-in module names, without the `node:` prefix
const BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "stream/promises",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Result of module resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Built-in module, as a `node:` id
    Builtin(String),
    /// File on disk
    File(PathBuf),
}

/// Module resolver implementing the Node.js resolution algorithm, extended
/// with TypeScript extensions and the `module` field
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    /// File extensions to try, in order
    extensions: Vec<String>,
}

impl ModuleResolver {
    /// Create a new module resolver
    pub fn new() -> Self {
        Self {
            extensions: [".js", ".mjs", ".cjs", ".ts", ".mts", ".cts", ".jsx", ".tsx", ".json"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    /// Check if a module is a built-in
    pub fn is_builtin(&self, name: &str) -> bool {
        let name = name.strip_prefix(BUILTIN_PREFIX).unwrap_or(name);
        BUILTINS.contains(&name)
    }

    /// Resolve a specifier imported by `importer`, or from `root` when there
    /// is no importer. `None` when nothing matches.
    pub fn resolve(&self, specifier: &str, importer: Option<&Path>, root: &Path) -> Option<Resolution> {
        if let Some(name) = specifier.strip_prefix(BUILTIN_PREFIX) {
            return Some(Resolution::Builtin(format!("{}{}", BUILTIN_PREFIX, name)));
        }
        if self.is_builtin(specifier) {
            return Some(Resolution::Builtin(format!("{}{}", BUILTIN_PREFIX, specifier)));
        }

        let base_dir = match importer.and_then(Path::parent) {
            Some(dir) => dir.to_path_buf(),
            None => root.to_path_buf(),
        };

        let specifier = specifier.strip_prefix("file://").unwrap_or(specifier);
        if is_path_specifier(specifier) {
            return self.resolve_file(&base_dir.join(specifier)).map(Resolution::File);
        }

        self.resolve_node_modules(specifier, &base_dir).map(Resolution::File)
    }

    /// Resolve a file path, probing extensions and directory indexes
    fn resolve_file(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(canonical(path));
        }

        for ext in &self.extensions {
            let mut with_ext = path.as_os_str().to_owned();
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(canonical(&with_ext));
            }
        }

        // `./util.js` written for a `util.ts` source
        if let Some(stem_ext) = path.extension().and_then(|e| e.to_str()) {
            let alternates: &[&str] = match stem_ext {
                "js" => &["ts", "tsx"],
                "mjs" => &["mts"],
                "cjs" => &["cts"],
                "jsx" => &["tsx"],
                _ => &[],
            };
            for alt in alternates {
                let candidate = path.with_extension(alt);
                if candidate.is_file() {
                    return Some(canonical(&candidate));
                }
            }
        }

        if path.is_dir() {
            return self.resolve_directory(path);
        }

        None
    }

    /// Resolve a directory through its package.json or an index file
    fn resolve_directory(&self, dir: &Path) -> Option<PathBuf> {
        if let Some(pkg) = read_package_json(dir) {
            if let Some(entry) = pkg.entry() {
                let entry_path = dir.join(entry);
                if let Some(found) = self.resolve_file_no_dir(&entry_path) {
                    return Some(found);
                }
                if entry_path.is_dir() && entry_path != dir {
                    if let Some(found) = self.resolve_index(&entry_path) {
                        return Some(found);
                    }
                }
            }
        }

        self.resolve_index(dir)
    }

    fn resolve_file_no_dir(&self, path: &Path) -> Option<PathBuf> {
        if path.is_dir() {
            return None;
        }
        self.resolve_file(path)
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions.iter().find_map(|ext| {
            let index = dir.join(format!("index{}", ext));
            index.is_file().then(|| canonical(&index))
        })
    }

    /// Resolve a bare specifier by walking up `node_modules` directories
    fn resolve_node_modules(&self, specifier: &str, from_dir: &Path) -> Option<PathBuf> {
        let (package_name, subpath) = parse_package_specifier(specifier);
        let package_dir = find_package_dir(package_name, from_dir)?;

        match subpath {
            Some(sub) => self.resolve_file(&package_dir.join(sub)),
            None => self.resolve_directory(&package_dir),
        }
    }
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a specifier names a path rather than a package
pub fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || specifier.starts_with('/')
        || (specifier.len() > 2 && specifier.as_bytes()[1] == b':' && specifier.as_bytes()[0].is_ascii_alphabetic())
}

/// Parse a package specifier into name and optional subpath
pub fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    if let Some(rest) = specifier.strip_prefix('@') {
        // Scoped package: @scope/name or @scope/name/subpath
        if let Some(slash_pos) = rest.find('/') {
            let after_scope = &rest[slash_pos + 1..];
            if let Some(subpath_pos) = after_scope.find('/') {
                let name_end = slash_pos + 2 + subpath_pos;
                return (&specifier[..name_end], Some(&specifier[name_end + 1..]));
            }
        }
        (specifier, None)
    } else {
        // Regular package: name or name/subpath
        match specifier.split_once('/') {
            Some((name, subpath)) => (name, Some(subpath)),
            None => (specifier, None),
        }
    }
}

/// Find the directory of a package, walking up from `from_dir`
pub fn find_package_dir(package_name: &str, from_dir: &Path) -> Option<PathBuf> {
    from_dir.ancestors().find_map(|dir| {
        // Never look for node_modules/node_modules
        if dir.file_name().is_some_and(|n| n == DEPS_DIR) {
            return None;
        }
        let candidate = dir.join(DEPS_DIR).join(package_name);
        candidate.is_dir().then_some(candidate)
    })
}

/// Version declared by the package.json in `dir`
pub fn read_package_version(dir: &Path) -> Option<String> {
    read_package_json(dir)?.version
}

fn read_package_json(dir: &Path) -> Option<PackageJson> {
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    serde_json::from_str(&content).ok()
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Minimal package.json structure for resolution
#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    version: Option<String>,
    main: Option<String>,
    module: Option<String>,
    #[serde(default)]
    exports: Option<serde_json::Value>,
}

impl PackageJson {
    /// Entry file for a bare import of the package
    fn entry(&self) -> Option<&str> {
        self.exports
            .as_ref()
            .and_then(export_root)
            .or(self.module.as_deref())
            .or(self.main.as_deref())
    }
}

/// Target of the `"."` export, preferring `import` over `default` and
/// `require` conditions
fn export_root(exports: &serde_json::Value) -> Option<&str> {
    use serde_json::Value;

    let root = match exports {
        Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => map.get(".")?,
        other => other,
    };

    match root {
        Value::String(target) => Some(target),
        Value::Object(conditions) => ["import", "module", "default", "require", "node"]
            .iter()
            .find_map(|cond| conditions.get(*cond))
            .and_then(export_root),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_is_builtin() {
        let resolver = ModuleResolver::new();
        assert!(resolver.is_builtin("fs"));
        assert!(resolver.is_builtin("path"));
        assert!(resolver.is_builtin("node:fs"));
        assert!(!resolver.is_builtin("lodash"));
    }

    #[test]
    fn test_parse_package_specifier() {
        assert_eq!(parse_package_specifier("lodash"), ("lodash", None));
        assert_eq!(parse_package_specifier("lodash/get"), ("lodash", Some("get")));
        assert_eq!(parse_package_specifier("@types/node"), ("@types/node", None));
        assert_eq!(
            parse_package_specifier("@babel/core/lib/index"),
            ("@babel/core", Some("lib/index"))
        );
    }

    #[test]
    fn test_resolve_builtins() {
        let resolver = ModuleResolver::new();
        let root = Path::new("/app");
        assert_eq!(
            resolver.resolve("fs", None, root),
            Some(Resolution::Builtin("node:fs".to_string()))
        );
        assert_eq!(
            resolver.resolve("node:test", None, root),
            Some(Resolution::Builtin("node:test".to_string()))
        );
    }

    #[test]
    fn test_resolve_relative_with_extension_probing() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root.join("src/util.ts"), "export {}");
        write(&root.join("src/lib/index.js"), "export {}");
        let importer = root.join("src/main.ts");
        let resolver = ModuleResolver::new();

        assert_eq!(
            resolver.resolve("./util", Some(&importer), &root),
            Some(Resolution::File(root.join("src/util.ts")))
        );
        assert_eq!(
            resolver.resolve("./util.js", Some(&importer), &root),
            Some(Resolution::File(root.join("src/util.ts")))
        );
        assert_eq!(
            resolver.resolve("./lib", Some(&importer), &root),
            Some(Resolution::File(root.join("src/lib/index.js")))
        );
        assert_eq!(resolver.resolve("./missing", Some(&importer), &root), None);
    }

    #[test]
    fn test_resolve_packages() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(
            &root.join("node_modules/left-pad/package.json"),
            r#"{ "name": "left-pad", "version": "1.3.0", "main": "index.js" }"#,
        );
        write(&root.join("node_modules/left-pad/index.js"), "module.exports = {}");
        write(
            &root.join("node_modules/@scope/esm/package.json"),
            r#"{ "version": "2.0.0", "main": "cjs.js", "exports": { ".": { "import": "./esm.mjs", "require": "./cjs.js" } } }"#,
        );
        write(&root.join("node_modules/@scope/esm/esm.mjs"), "export {}");
        write(&root.join("node_modules/@scope/esm/cjs.js"), "");
        write(&root.join("node_modules/@scope/esm/extra/thing.js"), "");

        let importer = root.join("src/deep/main.js");
        let resolver = ModuleResolver::new();

        assert_eq!(
            resolver.resolve("left-pad", Some(&importer), &root),
            Some(Resolution::File(root.join("node_modules/left-pad/index.js")))
        );
        assert_eq!(
            resolver.resolve("@scope/esm", Some(&importer), &root),
            Some(Resolution::File(root.join("node_modules/@scope/esm/esm.mjs")))
        );
        assert_eq!(
            resolver.resolve("@scope/esm/extra/thing", Some(&importer), &root),
            Some(Resolution::File(root.join("node_modules/@scope/esm/extra/thing.js")))
        );
        assert_eq!(
            read_package_version(&root.join("node_modules/left-pad")).as_deref(),
            Some("1.3.0")
        );
        assert_eq!(resolver.resolve("not-installed", Some(&importer), &root), None);
    }

    #[test]
    fn test_export_root_shapes() {
        let string = serde_json::json!("./index.mjs");
        assert_eq!(export_root(&string), Some("./index.mjs"));

        let conditions = serde_json::json!({ "require": "./a.cjs", "default": "./a.js" });
        assert_eq!(export_root(&conditions), Some("./a.js"));

        let nested = serde_json::json!({ ".": { "node": { "import": "./n.mjs" } }, "./sub": "./sub.js" });
        assert_eq!(export_root(&nested), Some("./n.mjs"));
    }
}

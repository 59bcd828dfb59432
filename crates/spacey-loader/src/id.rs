// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module id helpers: normalization, reserved prefixes, formats and
//! package information parsed from dependency paths

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of runtime builtin modules (`node:fs`)
pub const BUILTIN_PREFIX: &str = "node:";

/// Prefix of resolved virtual module ids
pub const VIRTUAL_PREFIX: &str = "\0";

/// Prefix of unresolved virtual module specifiers
pub const VIRTUAL_SPECIFIER_PREFIX: &str = "virtual:";

/// Name of the shared dependency directory
pub const DEPS_DIR: &str = "node_modules";

/// Check if an id names a runtime builtin module
pub fn is_builtin_id(id: &str) -> bool {
    id.starts_with(BUILTIN_PREFIX)
}

/// Check if an id names a virtual module
pub fn is_virtual_id(id: &str) -> bool {
    id.starts_with(VIRTUAL_PREFIX) || id.starts_with(VIRTUAL_SPECIFIER_PREFIX)
}

/// Check if a file lives inside the shared dependency directory
pub fn is_dependency_path(file: &str) -> bool {
    file.split('/').any(|seg| seg == DEPS_DIR)
}

/// Normalize a module id into its canonical form.
///
/// Strips a `file://` scheme, converts separators to `/` and removes `.`
/// and `..` segments from absolute paths. Reserved ids are returned as-is.
pub fn normalize_id(raw: &str) -> String {
    if is_builtin_id(raw) || is_virtual_id(raw) {
        return raw.to_string();
    }

    let id = raw.strip_prefix("file://").unwrap_or(raw).replace('\\', "/");
    if is_absolute(&id) { clean_path(&id) } else { id }
}

/// Normalize a file system path into a module id
pub fn path_to_id(path: &Path) -> String {
    normalize_id(&path.to_string_lossy())
}

fn is_absolute(id: &str) -> bool {
    let bytes = id.as_bytes();
    id.starts_with('/')
        || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/')
}

fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                // Never pop a drive letter
                if parts.len() > 1 || (rooted && !parts.is_empty()) {
                    parts.pop();
                }
            }
            seg => parts.push(seg),
        }
    }

    let joined = parts.join("/");
    if rooted { format!("/{}", joined) } else { joined }
}

/// Extension of an id without the leading dot, ignoring any query string
pub fn extension(id: &str) -> Option<&str> {
    let id = id.split('?').next().unwrap_or(id);
    let name = id.rsplit('/').next().unwrap_or(id);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// Resolved format of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    /// Runtime builtin (`node:*`)
    Builtin,
    /// ECMAScript module
    Module,
    /// CommonJS module
    CommonJs,
    /// JSON document
    Json,
}

impl ModuleFormat {
    /// Detect the format from the id alone, if its extension is conclusive
    pub fn from_id(id: &str) -> Option<Self> {
        if is_builtin_id(id) {
            return Some(ModuleFormat::Builtin);
        }
        match extension(id) {
            Some("mjs" | "mts") => Some(ModuleFormat::Module),
            Some("cjs" | "cts") => Some(ModuleFormat::CommonJs),
            Some("json") => Some(ModuleFormat::Json),
            _ => None,
        }
    }

    /// Determine the format from the id, falling back to a syntax scan of
    /// the source. Mixed or undetectable sources are treated as modules.
    pub fn detect(id: &str, source: &str) -> Self {
        if let Some(format) = Self::from_id(id) {
            return format;
        }
        let syntax = crate::lexer::detect_syntax(source);
        if syntax.has_cjs && !syntax.has_esm {
            ModuleFormat::CommonJs
        } else {
            ModuleFormat::Module
        }
    }
}

/// Name and version of an external package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package name (`lodash`, `@babel/core`)
    pub name: String,
    /// Package version, when it could be determined
    pub version: Option<String>,
}

/// Parse the package a dependency file belongs to.
///
/// The name is taken from the segments after the last `node_modules`
/// directory. The version comes from a `name@version` segment (the pnpm
/// layout, e.g. `.pnpm/ws@8.15.1/node_modules/ws/index.js`) when present.
pub fn parse_package_path(file: &str) -> Option<PackageInfo> {
    let segments: Vec<&str> = file.split('/').collect();
    let deps_idx = segments.iter().rposition(|seg| *seg == DEPS_DIR)?;

    let first = segments.get(deps_idx + 1)?;
    // `.bin`, `.pnpm` and tool caches are not packages
    if first.starts_with('.') {
        return None;
    }
    let name = if first.starts_with('@') {
        format!("{}/{}", first, segments.get(deps_idx + 2)?)
    } else {
        first.to_string()
    };

    let version = segments[..deps_idx]
        .iter()
        .rev()
        .find_map(|seg| version_from_segment(seg));

    Some(PackageInfo { name, version })
}

/// Directory of the package a dependency file belongs to
pub fn package_root(file: &str) -> Option<String> {
    let segments: Vec<&str> = file.split('/').collect();
    let deps_idx = segments.iter().rposition(|seg| *seg == DEPS_DIR)?;
    let first = segments.get(deps_idx + 1)?;
    let end = if first.starts_with('@') { deps_idx + 3 } else { deps_idx + 2 };
    if end > segments.len() {
        return None;
    }
    Some(segments[..end].join("/"))
}

fn version_from_segment(seg: &str) -> Option<String> {
    // Skip the leading `@` of scoped names
    let at = seg.get(1..)?.find('@')? + 1;
    let version = &seg[at + 1..];
    if !version.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    // pnpm appends peer-dependency suffixes after an underscore
    let version = version.split('_').next().unwrap_or(version);
    Some(version.to_string())
}

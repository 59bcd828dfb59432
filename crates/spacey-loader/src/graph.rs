// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module graph
//!
//! Gives every module a canonical identity, tracks importer/imported edges
//! and records the result of each pipeline stage.
//!
//! Nodes live in an arena owned by the graph and are referred to by
//! [`ModuleId`]. Exactly one node exists per canonical file string for the
//! lifetime of the graph.

use crate::id::{self, ModuleFormat, PackageInfo};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

/// Handle to a node in a [`ModuleGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModuleId(usize);

impl ModuleId {
    /// Index of the node in the graph's arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// What kind of module a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    /// Runtime builtin (`node:fs`)
    Builtin,
    /// Module synthesized by a plugin (`\0virtual:entry`)
    Virtual,
    /// File inside the shared dependency directory
    ExternalPackage,
    /// File owned by the project
    ProjectFile,
}

/// Provenance of the resolve stage
#[derive(Debug, Clone, Serialize)]
pub struct ResolveRecord {
    /// Plugin that resolved the module
    pub plugin: String,
    /// Specifier as written by the importer
    pub specifier: String,
    /// Importer the specifier was resolved from
    pub importer: Option<String>,
    /// Time spent in the resolving plugin chain
    pub elapsed: Duration,
}

/// Provenance of the load stage
#[derive(Debug, Clone, Serialize)]
pub struct LoadRecord {
    /// Plugin that loaded the module, `None` when the host loaded it
    pub plugin: Option<String>,
    /// Raw, untransformed code
    pub code: String,
    /// Time spent in the loading plugin chain
    pub elapsed: Duration,
}

/// One step of a module's transform history
#[derive(Debug, Clone, Serialize)]
pub struct TransformRecord {
    /// Code after this step
    pub code: String,
    /// Plugin that ran
    pub plugin: String,
    /// Time spent in the plugin
    pub elapsed: Duration,
    /// Whether the plugin returned new code
    pub changed: bool,
}

/// A module in the graph
#[derive(Debug, Clone, Serialize)]
pub struct ModuleNode {
    /// Handle of this node
    pub handle: ModuleId,
    /// Module id. Equal to `file`: external packages are identified by
    /// path, with the package name kept in `package`.
    pub id: String,
    /// Canonical absolute path or synthetic id
    pub file: String,
    /// Module kind
    pub kind: ModuleKind,
    /// Resolved format
    pub format: Option<ModuleFormat>,
    /// Owning package, for external package files only
    pub package: Option<PackageInfo>,
    /// Modules importing this one
    pub importers: BTreeSet<ModuleId>,
    /// Modules imported by this one
    pub imported: BTreeSet<ModuleId>,
    /// Resolve stage provenance
    pub resolve_result: Option<ResolveRecord>,
    /// Load stage provenance
    pub load_result: Option<LoadRecord>,
    /// Append-only transform history, in plugin order
    pub transform_history: Vec<TransformRecord>,
    /// Whether the last transform was served from the module cache
    pub cache_hit: bool,
}

impl ModuleNode {
    /// Classify a normalized file and build a fresh node for it
    fn new(handle: ModuleId, file: &str) -> Self {
        let (kind, format, package) = if id::is_builtin_id(file) {
            (ModuleKind::Builtin, Some(ModuleFormat::Builtin), None)
        } else if id::is_virtual_id(file) {
            (ModuleKind::Virtual, None, None)
        } else if id::is_dependency_path(file) {
            (ModuleKind::ExternalPackage, None, package_of(file))
        } else {
            (ModuleKind::ProjectFile, None, None)
        };

        Self {
            handle,
            id: file.to_string(),
            file: file.to_string(),
            kind,
            format,
            package,
            importers: BTreeSet::new(),
            imported: BTreeSet::new(),
            resolve_result: None,
            load_result: None,
            transform_history: Vec::new(),
            cache_hit: false,
        }
    }

    /// Whether this is a virtual module
    pub fn is_virtual(&self) -> bool {
        self.kind == ModuleKind::Virtual
    }

    /// Whether this module lives in the shared dependency directory
    pub fn is_node_module(&self) -> bool {
        self.kind == ModuleKind::ExternalPackage
    }

    /// Whether this module is owned by the project
    pub fn is_project_file(&self) -> bool {
        self.kind == ModuleKind::ProjectFile
    }

    /// Raw code recorded by the load stage
    pub fn raw_code(&self) -> Option<&str> {
        self.load_result.as_ref().map(|l| l.code.as_str())
    }

    /// Last entry of the transform history
    pub fn last_transform(&self) -> Option<&TransformRecord> {
        self.transform_history.last()
    }

    /// Code after the last transform, or the raw code if none ran
    pub fn current_code(&self) -> Option<&str> {
        self.last_transform().map(|t| t.code.as_str()).or_else(|| self.raw_code())
    }
}

/// Module graph with lookups by id and by file
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<ModuleNode>,
    by_id: HashMap<String, ModuleId>,
    by_file: HashMap<String, ModuleId>,
}

impl ModuleGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node by module id
    pub fn get_by_id(&self, id: &str) -> Option<&ModuleNode> {
        self.by_id.get(id).map(|handle| &self.nodes[handle.0])
    }

    /// Look up a node by canonical file
    pub fn get_by_file(&self, file: &str) -> Option<&ModuleNode> {
        self.by_file.get(file).map(|handle| &self.nodes[handle.0])
    }

    /// Look up a node handle by canonical file
    pub fn handle_of(&self, file: &str) -> Option<ModuleId> {
        self.by_file.get(file).copied()
    }

    /// Get a node by handle
    pub fn node(&self, handle: ModuleId) -> &ModuleNode {
        &self.nodes[handle.0]
    }

    /// Get a node by handle, mutably
    pub fn node_mut(&mut self, handle: ModuleId) -> &mut ModuleNode {
        &mut self.nodes[handle.0]
    }

    /// Get the node for a file, creating it on first use.
    ///
    /// `file` must already be normalized. Calling this twice with the same
    /// file returns the same handle.
    pub fn ensure_entry_from_file(&mut self, file: &str) -> ModuleId {
        if let Some(handle) = self.by_file.get(file) {
            return *handle;
        }

        let handle = ModuleId(self.nodes.len());
        let node = ModuleNode::new(handle, file);
        self.by_id.insert(node.id.clone(), handle);
        self.by_file.insert(node.file.clone(), handle);
        self.nodes.push(node);
        handle
    }

    /// Record that `importer` imports `imported`. Adding an existing edge
    /// is a no-op.
    pub fn add_edge(&mut self, importer: ModuleId, imported: ModuleId) {
        self.nodes[importer.0].imported.insert(imported);
        self.nodes[imported.0].importers.insert(importer);
    }

    /// All nodes belonging to an external package
    pub fn modules_of_package<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ModuleNode> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.package.as_ref().is_some_and(|p| p.name == name))
    }

    /// Iterate over all nodes in creation order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.iter()
    }

    /// Number of modules in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Package of a dependency file, falling back to the package.json version
/// when the path carries none
fn package_of(file: &str) -> Option<PackageInfo> {
    let mut package = id::parse_package_path(file)?;
    if package.version.is_none() {
        package.version = id::package_root(file)
            .and_then(|root| crate::resolver::read_package_version(Path::new(&root)));
    }
    Some(package)
}

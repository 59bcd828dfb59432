// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! JSON modules
//!
//! Turns a JSON document into an ES module: a default export of the whole
//! value plus one `export const` per top-level key that is a valid
//! identifier, so importers can pick single keys.

use crate::error::{LoaderError, Result};
use crate::id::{self, ModuleFormat};
use crate::plugin::{
    Hook, HookSpec, Plugin, PluginContext, ResolveIdOptions, ResolvedId, TransformResult,
};
use crate::resolver::is_path_specifier;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write;
use std::path::Path;
use unicode_xid::UnicodeXID;

/// Name of the JSON plugin
pub const JSON_PLUGIN_NAME: &str = "spacey:json";

/// Words that can not be bound with `export const`
const RESERVED_WORDS: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
    "null", "package", "private", "protected", "public", "return", "static", "super", "switch",
    "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Resolves relative `.json` imports and converts JSON to ES modules
#[derive(Debug, Default)]
pub struct JsonPlugin;

impl JsonPlugin {
    /// Create the JSON plugin
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for JsonPlugin {
    fn name(&self) -> &str {
        JSON_PLUGIN_NAME
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![Hook::ResolveId.into(), Hook::Transform.into()]
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext<'_>,
        specifier: &str,
        importer: Option<&str>,
        _options: ResolveIdOptions,
    ) -> Result<Option<ResolvedId>> {
        if id::extension(specifier) != Some("json") || !is_path_specifier(specifier) {
            return Ok(None);
        }
        let Some(importer_dir) = importer
            .filter(|i| !id::is_virtual_id(i))
            .and_then(|i| Path::new(i).parent())
        else {
            return Ok(None);
        };

        let path = importer_dir.join(specifier);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(ResolvedId::new(id::path_to_id(&path)).with_format(ModuleFormat::Json)))
    }

    async fn transform(&self, _ctx: &PluginContext<'_>, code: &str, id: &str) -> Result<Option<TransformResult>> {
        if id::extension(id) != Some("json") {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(code).map_err(|e| {
            LoaderError::Generic(format!(
                "Failed to parse JSON file, invalid JSON syntax found at line {} column {}",
                e.line(),
                e.column()
            ))
        })?;

        Ok(Some(TransformResult::new(json_to_esm(&value)?).with_format(ModuleFormat::Module)))
    }
}

/// Render a JSON value as an ES module
pub fn json_to_esm(value: &Value) -> Result<String> {
    let Value::Object(map) = value else {
        return Ok(format!("export default {};\n", serde_json::to_string(value)?));
    };

    let mut out = String::new();
    let mut members = Vec::with_capacity(map.len());

    for (key, value) in map {
        let literal = serde_json::to_string(value)?;
        if is_legal_binding(key) {
            let _ = writeln!(out, "export const {} = {};", key, literal);
            members.push(format!("\t{}: {}", key, key));
        } else {
            members.push(format!("\t{}: {}", serde_json::to_string(key)?, literal));
        }
    }

    if members.is_empty() {
        out.push_str("export default {};\n");
    } else {
        let _ = writeln!(out, "export default {{\n{}\n}};", members.join(",\n"));
    }
    Ok(out)
}

fn is_legal_binding(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first == '$' || first.is_xid_start())
        && chars.all(|c| c == '_' || c == '$' || c.is_xid_continue())
        && !RESERVED_WORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_to_esm() {
        let esm = json_to_esm(&json!({ "name": "app", "bad-key": 1, "default": true })).unwrap();
        assert_eq!(
            esm,
            "export const name = \"app\";\n\
             export default {\n\
             \t\"bad-key\": 1,\n\
             \t\"default\": true,\n\
             \tname: name\n\
             };\n"
        );
    }

    #[test]
    fn test_non_object_to_esm() {
        assert_eq!(json_to_esm(&json!([1, 2])).unwrap(), "export default [1,2];\n");
        assert_eq!(json_to_esm(&json!({})).unwrap(), "export default {};\n");
    }

    #[test]
    fn test_legal_bindings() {
        assert!(is_legal_binding("version"));
        assert!(is_legal_binding("$ref"));
        assert!(!is_legal_binding("1st"));
        assert!(!is_legal_binding("class"));
        assert!(!is_legal_binding(""));
    }

    #[tokio::test]
    async fn test_invalid_json_fails_transform() {
        let ctx = PluginContext::detached(JSON_PLUGIN_NAME);
        let err = JsonPlugin::new()
            .transform(&ctx, "{ \"a\": ", "/app/data.json")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid JSON syntax"));
    }

    #[tokio::test]
    async fn test_non_json_passes_through() {
        let ctx = PluginContext::detached(JSON_PLUGIN_NAME);
        let out = JsonPlugin::new().transform(&ctx, "{", "/app/a.js").await.unwrap();
        assert!(out.is_none());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the loader pipeline

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, loading or transforming modules
///
/// A specifier that no plugin resolves is not an error: hooks signal
/// "defer to the host" with `Ok(None)`.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A module could not be read
    #[error("Failed to load module '{id}': {reason}")]
    Load {
        /// Module id
        id: String,
        /// Reason for failure
        reason: String,
    },

    /// A plugin's `transform` hook failed, aborting the chain for this module
    #[error("[{plugin}] Failed to transform '{id}': {source}")]
    Transform {
        /// Name of the plugin that was executing
        plugin: String,
        /// Module id
        id: String,
        /// Underlying error
        #[source]
        source: Box<LoaderError>,
    },

    /// A plugin hook other than `transform` failed
    #[error("[{plugin}] {message}")]
    Plugin {
        /// Name of the plugin that was executing
        plugin: String,
        /// Error message
        message: String,
    },

    /// The external bundler failed to pre-bundle a dependency
    #[error("Failed to bundle dependency '{package}': {reason}")]
    Bundle {
        /// Package specifier
        package: String,
        /// Reason for failure
        reason: String,
    },

    /// The module cache is unreadable or inconsistent
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request channel was closed or returned a mismatched response
    #[error("Channel error: {0}")]
    Channel(String),

    /// File system error
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl LoaderError {
    /// Create a plugin error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a load error
    pub fn load(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap an error raised inside a `transform` hook
    pub fn transform(plugin: impl Into<String>, id: impl Into<String>, source: LoaderError) -> Self {
        Self::Transform {
            plugin: plugin.into(),
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// Name of the plugin the error is attributed to, if any
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            Self::Transform { plugin, .. } | Self::Plugin { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}

impl From<String> for LoaderError {
    fn from(s: String) -> Self {
        LoaderError::Generic(s)
    }
}

impl From<&str> for LoaderError {
    fn from(s: &str) -> Self {
        LoaderError::Generic(s.to_string())
    }
}

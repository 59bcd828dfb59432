// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Plugin ordering.
//!
//! For every hook, implementing plugins are bucketed by phase and by the
//! builtin flag, then flattened in this fixed order:
//!
//! ```text
//! pre/user, pre/builtin, normal/user, normal/builtin, post/user, post/builtin
//! ```
//!
//! Registration order is kept inside a bucket.

use super::{is_builtin_plugin, Hook, Phase, Plugin};
use std::collections::HashMap;
use std::sync::Arc;

/// A plugin bound to one hook
#[derive(Clone)]
pub struct SortedPlugin {
    /// The plugin
    pub plugin: Arc<dyn Plugin>,
    /// Effective phase for this hook
    pub phase: Phase,
    /// Whether the plugin is builtin
    pub builtin: bool,
}

impl SortedPlugin {
    /// Plugin name
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    fn bucket(&self) -> usize {
        let phase = match self.phase {
            Phase::Pre => 0,
            Phase::Normal => 1,
            Phase::Post => 2,
        };
        phase * 2 + usize::from(self.builtin)
    }
}

impl std::fmt::Debug for SortedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedPlugin")
            .field("name", &self.name())
            .field("phase", &self.phase)
            .field("builtin", &self.builtin)
            .finish()
    }
}

/// Dispatch table: the ordered plugins of every hook, computed once
#[derive(Debug, Clone, Default)]
pub struct SortedPlugins {
    by_hook: HashMap<Hook, Vec<SortedPlugin>>,
}

impl SortedPlugins {
    /// Sort a registration list
    pub fn new(plugins: &[Arc<dyn Plugin>]) -> Self {
        let mut by_hook: HashMap<Hook, Vec<SortedPlugin>> = HashMap::new();

        for plugin in plugins {
            let builtin = is_builtin_plugin(plugin.name());
            for spec in plugin.hooks() {
                by_hook.entry(spec.hook).or_default().push(SortedPlugin {
                    plugin: Arc::clone(plugin),
                    phase: spec.phase.unwrap_or_else(|| plugin.phase()),
                    builtin,
                });
            }
        }

        for list in by_hook.values_mut() {
            // Stable, so registration order survives inside a bucket
            list.sort_by_key(SortedPlugin::bucket);
        }

        Self { by_hook }
    }

    /// Plugins implementing a hook, in dispatch order
    pub fn for_hook(&self, hook: Hook) -> &[SortedPlugin] {
        self.by_hook.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of the plugins implementing a hook, in dispatch order
    pub fn names(&self, hook: Hook) -> Vec<&str> {
        self.for_hook(hook).iter().map(SortedPlugin::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::HookSpec;

    struct Named {
        name: &'static str,
        phase: Phase,
        hooks: Vec<HookSpec>,
    }

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        fn hooks(&self) -> Vec<HookSpec> {
            self.hooks.clone()
        }
    }

    fn plugin(name: &'static str, phase: Phase, hooks: &[Hook]) -> Arc<dyn Plugin> {
        Arc::new(Named {
            name,
            phase,
            hooks: hooks.iter().copied().map(HookSpec::from).collect(),
        })
    }

    #[test]
    fn test_six_buckets() {
        let plugins = vec![
            plugin("spacey:post", Phase::Post, &[Hook::Transform]),
            plugin("user-post", Phase::Post, &[Hook::Transform]),
            plugin("spacey:normal", Phase::Normal, &[Hook::Transform]),
            plugin("user-normal", Phase::Normal, &[Hook::Transform]),
            plugin("spacey:pre", Phase::Pre, &[Hook::Transform]),
            plugin("user-pre", Phase::Pre, &[Hook::Transform]),
        ];
        let sorted = SortedPlugins::new(&plugins);
        assert_eq!(
            sorted.names(Hook::Transform),
            vec!["user-pre", "spacey:pre", "user-normal", "spacey:normal", "user-post", "spacey:post"]
        );
    }

    #[test]
    fn test_registration_order_within_bucket() {
        let plugins = vec![
            plugin("b", Phase::Normal, &[Hook::Load]),
            plugin("a", Phase::Normal, &[Hook::Load]),
        ];
        assert_eq!(SortedPlugins::new(&plugins).names(Hook::Load), vec!["b", "a"]);
    }

    #[test]
    fn test_only_implementing_plugins_are_listed() {
        let plugins = vec![
            plugin("resolver", Phase::Normal, &[Hook::ResolveId]),
            plugin("loader", Phase::Normal, &[Hook::Load]),
        ];
        let sorted = SortedPlugins::new(&plugins);
        assert_eq!(sorted.names(Hook::ResolveId), vec!["resolver"]);
        assert!(sorted.for_hook(Hook::Transform).is_empty());
    }

    #[test]
    fn test_per_hook_phase_override() {
        let late: Arc<dyn Plugin> = Arc::new(Named {
            name: "late-transform",
            phase: Phase::Pre,
            hooks: vec![
                HookSpec::new(Hook::ResolveId),
                HookSpec::new(Hook::Transform).with_phase(Phase::Post),
            ],
        });
        let plugins = vec![late, plugin("plain", Phase::Normal, &[Hook::ResolveId, Hook::Transform])];
        let sorted = SortedPlugins::new(&plugins);

        assert_eq!(sorted.names(Hook::ResolveId), vec!["late-transform", "plain"]);
        assert_eq!(sorted.names(Hook::Transform), vec!["plain", "late-transform"]);
    }
}

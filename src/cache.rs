use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::pipeline::{lower_module, LoweringOptions, ModuleOutput};
use crate::validate::SourceModule;

lazy_static! {
    /// Process-wide memo used by the host bridge.
    pub static ref GLOBAL_CACHE: LoweringCache = LoweringCache::new();
}

/// In-memory memo of module lowerings keyed by input content.
///
/// Lowering is deterministic in its inputs, so identical module and option
/// JSON always maps to the same output.
#[derive(Default)]
pub struct LoweringCache {
    entries: Mutex<HashMap<String, ModuleOutput>>,
}

impl LoweringCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(module: &SourceModule, options: &LoweringOptions) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(module).unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(options).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, module: &SourceModule, options: &LoweringOptions) -> Option<ModuleOutput> {
        let key = Self::compute_hash(module, options);
        let entries = self.entries.lock().ok()?;
        entries.get(&key).cloned()
    }

    pub fn get_or_lower(&self, module: &SourceModule, options: &LoweringOptions) -> ModuleOutput {
        let key = Self::compute_hash(module, options);
        if let Some(hit) = self.entries.lock().ok().and_then(|e| e.get(&key).cloned()) {
            debug!(file = %module.file_path, hash = %&key[..12], "lowering cache hit");
            return hit;
        }

        let output = lower_module(module, options);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, output.clone());
        }
        output
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(initial: &str) -> SourceModule {
        serde_json::from_value(json!({
            "filePath": "cache.ets",
            "components": [{
                "name": "Counter",
                "members": [{
                    "member": "field",
                    "name": "count",
                    "decorator": { "kind": "state" },
                    "initializer": initial
                }],
                "render": { "body": [] }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_hash_depends_on_module_and_options() {
        let options = LoweringOptions::default();
        let a = LoweringCache::compute_hash(&module("0"), &options);
        let b = LoweringCache::compute_hash(&module("1"), &options);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);

        let sequential = LoweringOptions {
            parallel: false,
            ..LoweringOptions::default()
        };
        assert_ne!(a, LoweringCache::compute_hash(&module("0"), &sequential));
        assert_eq!(a, LoweringCache::compute_hash(&module("0"), &options));
    }

    #[test]
    fn test_get_or_lower_memoizes() {
        let cache = LoweringCache::new();
        let options = LoweringOptions::default();
        assert!(cache.get(&module("0"), &options).is_none());

        let first = cache.get_or_lower(&module("0"), &options);
        assert_eq!(cache.len(), 1);
        let second = cache.get_or_lower(&module("0"), &options);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        cache.get_or_lower(&module("5"), &options);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}

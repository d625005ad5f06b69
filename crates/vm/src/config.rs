//! VM tuning knobs. The language semantics in `vm.rs` never branch on
//! these; they only affect when and how aggressively the collector runs
//! and how much the VM logs, matching spec's "debug switches become
//! runtime toggles" stance for a system that ships one release binary.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub initial_gc_threshold: usize,
    pub gc_heap_grow_factor: usize,
    pub stress_gc: bool,
    pub trace_execution: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            initial_gc_threshold: 1024 * 1024,
            gc_heap_grow_factor: 2,
            stress_gc: false,
            trace_execution: false,
        }
    }
}

impl VmConfig {
    /// Overlays `EMBER_GC_STRESS`, `EMBER_TRACE_EXECUTION`, and
    /// `EMBER_GC_INITIAL_THRESHOLD` onto the defaults.
    pub fn from_env() -> VmConfig {
        let mut config = VmConfig::default();
        config.apply_env();
        config
    }

    /// Loads `path` as a TOML overlay on top of `self`, returning the
    /// merged config. File values are overridden by anything already set
    /// via environment variables, matching a defaults-then-file-then-env
    /// precedence.
    pub fn merge_toml_file(mut self, path: &Path) -> VmConfig {
        if let Ok(text) = std::fs::read_to_string(path) {
            match toml::from_str::<VmConfig>(&text) {
                Ok(from_file) => self = from_file,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring malformed ember.toml");
                }
            }
        }
        self.apply_env();
        self
    }

    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("EMBER_GC_STRESS") {
            self.stress_gc = val != "0";
        }
        if let Ok(val) = std::env::var("EMBER_TRACE_EXECUTION") {
            self.trace_execution = val != "0";
        }
        if let Ok(val) = std::env::var("EMBER_GC_INITIAL_THRESHOLD") {
            if let Ok(bytes) = val.parse() {
                self.initial_gc_threshold = bytes;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_initial_threshold() {
        let config = VmConfig::default();
        assert_eq!(config.initial_gc_threshold, 1024 * 1024);
        assert_eq!(config.gc_heap_grow_factor, 2);
        assert!(!config.stress_gc);
    }
}

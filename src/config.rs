// Tue Oct 13 2026 - Alex

use serde::{Deserialize, Serialize};
use std::path::Path;

/// How `unique_type_name` disambiguates names that are not unique on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueNamePolicy {
    /// Always the bare mangled name.
    MangledOnly,
    /// Ambiguous names get the ordered parent unique names appended.
    Readable,
    /// Ambiguous names get a 64-bit digest of the parent unique names appended.
    Hashed,
    /// Every class with parents gets the readable fingerprint.
    AlwaysReadable,
}

impl Default for UniqueNamePolicy {
    fn default() -> Self {
        Self::Readable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_vtable_slots: usize,
    pub max_base_count: u32,
    pub max_vtt_entries: usize,
    pub max_name_length: usize,
    pub parallel: bool,
    pub thread_count: usize,
    pub strict_bases: bool,
    pub unique_name_policy: UniqueNamePolicy,
    pub type_info_symbol_prefix: String,
    pub pure_virtual_symbols: Vec<String>,
    pub deleted_virtual_symbols: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_vtable_slots: 4096,
            max_base_count: 256,
            max_vtt_entries: 512,
            max_name_length: 4096,
            parallel: true,
            thread_count: num_cpus::get(),
            strict_bases: false,
            unique_name_policy: UniqueNamePolicy::default(),
            type_info_symbol_prefix: "_ZTI".to_string(),
            pure_virtual_symbols: vec!["__cxa_pure_virtual".to_string()],
            deleted_virtual_symbols: vec!["__cxa_deleted_virtual".to_string()],
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    pub fn with_strict_bases(mut self, strict: bool) -> Self {
        self.strict_bases = strict;
        self
    }

    pub fn with_unique_name_policy(mut self, policy: UniqueNamePolicy) -> Self {
        self.unique_name_policy = policy;
        self
    }

    pub fn with_max_vtable_slots(mut self, max: usize) -> Self {
        self.max_vtable_slots = max;
        self
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read {}: {}", path.as_ref().display(), e))?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| format!("Invalid config JSON: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_vtable_slots == 0 {
            return Err("max_vtable_slots must be greater than 0".to_string());
        }
        if self.max_base_count == 0 {
            return Err("max_base_count must be greater than 0".to_string());
        }
        if self.max_vtt_entries == 0 {
            return Err("max_vtt_entries must be greater than 0".to_string());
        }
        if self.max_name_length == 0 {
            return Err("max_name_length must be greater than 0".to_string());
        }
        if self.parallel && self.thread_count == 0 {
            return Err("thread_count must be greater than 0".to_string());
        }
        if self.type_info_symbol_prefix.is_empty() {
            return Err("type_info_symbol_prefix must not be empty".to_string());
        }
        Ok(())
    }
}

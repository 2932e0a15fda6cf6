//! Runtime tuning knobs for the training job.
//!
//! The accelerator compiler, collective fabric and allocator are tuned through
//! environment variables inside the training container. Here they are an
//! ordinary value that is rendered into a variable map only when the job
//! request is built; this process never reads or sets its own environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const COMPILER_FLAGS_VAR: &str = "NEURON_CC_FLAGS";
pub const COMPILE_CACHE_URL_VAR: &str = "NEURON_COMPILE_CACHE_URL";
pub const USE_BF16_VAR: &str = "XLA_USE_BF16";
pub const DOWNCAST_BF16_VAR: &str = "XLA_DOWNCAST_BF16";
pub const FABRIC_PROVIDER_VAR: &str = "FI_PROVIDER";
pub const DEVICE_RDMA_VAR: &str = "FI_EFA_USE_DEVICE_RDMA";
pub const MALLOC_ARENA_MAX_VAR: &str = "MALLOC_ARENA_MAX";

const MANAGED_VARS: [&str; 7] = [
    COMPILER_FLAGS_VAR,
    COMPILE_CACHE_URL_VAR,
    USE_BF16_VAR,
    DOWNCAST_BF16_VAR,
    FABRIC_PROVIDER_VAR,
    DEVICE_RDMA_VAR,
    MALLOC_ARENA_MAX_VAR,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeEnvironment {
    /// Accelerator compiler flags, joined with spaces.
    pub compiler_flags: Vec<String>,
    /// Shared location for compiled graphs, e.g. `s3://bucket/neuron-cache`.
    pub compile_cache_url: Option<String>,
    pub use_bf16: bool,
    pub downcast_bf16: bool,
    pub fabric_provider: Option<String>,
    pub device_rdma: bool,
    pub malloc_arena_max: Option<u32>,
    /// Additional variables passed through untouched.
    pub extra: BTreeMap<String, String>,
}

impl Default for RuntimeEnvironment {
    fn default() -> Self {
        Self {
            compiler_flags: vec![
                "--model-type=transformer".to_string(),
                "--distribution-strategy=llm-training".to_string(),
            ],
            compile_cache_url: None,
            use_bf16: true,
            downcast_bf16: false,
            fabric_provider: Some("efa".to_string()),
            device_rdma: true,
            malloc_arena_max: Some(64),
            extra: BTreeMap::new(),
        }
    }
}

impl RuntimeEnvironment {
    /// Variables to set in the training container. Disabled switches and
    /// unset options are left out rather than rendered as empty strings.
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();

        if !self.compiler_flags.is_empty() {
            vars.insert(COMPILER_FLAGS_VAR.to_string(), self.compiler_flags.join(" "));
        }
        if let Some(url) = &self.compile_cache_url {
            vars.insert(COMPILE_CACHE_URL_VAR.to_string(), url.clone());
        }
        if self.use_bf16 {
            vars.insert(USE_BF16_VAR.to_string(), "1".to_string());
        }
        if self.downcast_bf16 {
            vars.insert(DOWNCAST_BF16_VAR.to_string(), "1".to_string());
        }
        if let Some(provider) = &self.fabric_provider {
            vars.insert(FABRIC_PROVIDER_VAR.to_string(), provider.clone());
        }
        if self.device_rdma {
            vars.insert(DEVICE_RDMA_VAR.to_string(), "1".to_string());
        }
        if let Some(arenas) = self.malloc_arena_max {
            vars.insert(MALLOC_ARENA_MAX_VAR.to_string(), arenas.to_string());
        }

        for (key, value) in &self.extra {
            vars.insert(key.clone(), value.clone());
        }

        vars
    }

    /// Appends every problem found to `errors`, prefixed with `environment.`.
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.use_bf16 && self.downcast_bf16 {
            errors.push(
                "environment.use_bf16 and environment.downcast_bf16 are mutually exclusive"
                    .to_string(),
            );
        }

        if let Some(0) = self.malloc_arena_max {
            errors.push("environment.malloc_arena_max must be greater than 0".to_string());
        }

        for flag in &self.compiler_flags {
            if flag.trim().is_empty() {
                errors.push("environment.compiler_flags must not contain empty flags".to_string());
            }
        }

        for key in self.extra.keys() {
            if MANAGED_VARS.contains(&key.as_str()) {
                errors.push(format!(
                    "environment.extra.{} is set by a dedicated option; use that instead",
                    key
                ));
            } else if !is_valid_var_name(key) {
                errors.push(format!(
                    "environment.extra key '{}' is not a valid variable name",
                    key
                ));
            }
        }
    }
}

fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

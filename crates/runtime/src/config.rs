//! Marshalling configuration
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LCH_MAX_TABLE_DEPTH` | `64` | Deepest table nesting accepted when decoding |
//! | `LCH_TRACEBACK` | `on` | `off`, `0` or `false` calls callbacks without the traceback handler |
//!
//! ## Example
//!
//! ```bash
//! # Reject anything nested more than 8 tables deep
//! LCH_MAX_TABLE_DEPTH=8 ./my-host
//! ```

use std::sync::OnceLock;

pub const DEFAULT_MAX_TABLE_DEPTH: usize = 64;

static CONFIG: OnceLock<BridgeConfig> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Maximum table nesting during decode (at least 1)
    pub max_table_depth: usize,
    /// Install the traceback message handler around callback invocations
    pub traceback: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_table_depth: DEFAULT_MAX_TABLE_DEPTH,
            traceback: true,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let max_table_depth = std::env::var("LCH_MAX_TABLE_DEPTH")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|&v: &usize| v > 0)
            .unwrap_or(DEFAULT_MAX_TABLE_DEPTH);

        let traceback = std::env::var("LCH_TRACEBACK")
            .ok()
            .map(|s| !matches!(s.trim().to_lowercase().as_str(), "off" | "0" | "false"))
            .unwrap_or(true);

        Self {
            max_table_depth,
            traceback,
        }
    }
}

/// Process-wide configuration, read from the environment on first use.
pub fn config() -> &'static BridgeConfig {
    CONFIG.get_or_init(BridgeConfig::from_env)
}

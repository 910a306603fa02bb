//! Runtime configuration

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u32 {
    1000
}

/// Host-tunable runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Whether page settings allow script at all.
    #[serde(default = "default_true")]
    pub script_enabled: bool,

    /// Member visits between the clone codec's timeout polls. Smaller values
    /// tighten worst-case latency between a deadline passing and the codec
    /// noticing, at some throughput cost.
    #[serde(default = "default_tick_interval")]
    pub clone_tick_interval: u32,

    /// Whether worker threads are allowed.
    #[serde(default = "default_true")]
    pub workers_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            script_enabled: true,
            clone_tick_interval: default_tick_interval(),
            workers_enabled: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<RuntimeConfig, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.script_enabled);
        assert_eq!(config.clone_tick_interval, 1000);
        assert!(config.workers_enabled);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = RuntimeConfig::from_json(r#"{"script_enabled": false}"#).unwrap();
        assert!(!config.script_enabled);
        assert_eq!(config.clone_tick_interval, 1000);
    }
}

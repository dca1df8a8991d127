//! Startup configuration (spec §6: "Configuration (startup only)").
//!
//! Merged, in increasing priority, from compiled-in defaults, an optional
//! TOML file, `CUCKOOCACHE_*` environment variables, and CLI flags. Every
//! value is read once at startup and is immutable thereafter — there is
//! no config-reload path, unlike the reference stack's `ConfigWatcher`:
//! spec §1 explicitly rules out dynamic resizing of the table after
//! startup, and every other knob here feeds table/socket setup.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Victim-selection rule used during cuckoo displacement (spec §4.B step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Uniformly pick one of the `D` occupied probes as the displacement
    /// victim. The spec's Open Question accepts this as an equivalent to
    /// deterministic first-probe eviction, and it shortens worst-case
    /// displacement chains (see DESIGN.md).
    #[default]
    Random,
    /// Always evict from the first probe (`h_1(k)`), per the reference
    /// source's deterministic rule.
    FirstProbe,
}

/// Fully resolved startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address the TCP listener binds to.
    pub server_host: String,
    /// Port the TCP listener binds to.
    pub server_port: u16,
    /// Maximum key+value payload size per slot, in bytes.
    pub cuckoo_item_size: usize,
    /// Number of slots in the table (`N`), fixed for the process lifetime.
    pub cuckoo_nitem: usize,
    /// Cuckoo displacement victim-selection rule.
    pub cuckoo_policy: EvictionPolicy,
    /// Maximum accepted key length in bytes.
    pub key_maxlen: usize,
    /// Whether the `stats` command is enabled.
    pub stats_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 11211,
            cuckoo_item_size: 64,
            cuckoo_nitem: 1_048_576,
            cuckoo_policy: EvictionPolicy::default(),
            key_maxlen: 250,
            stats_enabled: true,
        }
    }
}

impl Config {
    /// Load defaults, then overlay a TOML file if `path` is given, then
    /// overlay recognized `CUCKOOCACHE_*` environment variables.
    ///
    /// CLI flags (highest priority) are applied by the caller afterward
    /// via the individual `with_*` setters, since `clap` has already
    /// parsed them into `Option<T>` overrides by the time this runs.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&text).map_err(|e| {
            CacheError::Config(format!("failed to parse config file {}: {e}", path.display()))
        })
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CUCKOOCACHE_HOST") {
            self.server_host = v;
        }
        if let Ok(v) = std::env::var("CUCKOOCACHE_PORT") {
            if let Ok(port) = v.parse() {
                self.server_port = port;
            }
        }
        if let Ok(v) = std::env::var("CUCKOOCACHE_ITEM_SIZE") {
            if let Ok(n) = v.parse() {
                self.cuckoo_item_size = n;
            }
        }
        if let Ok(v) = std::env::var("CUCKOOCACHE_NITEM") {
            if let Ok(n) = v.parse() {
                self.cuckoo_nitem = n;
            }
        }
        if let Ok(v) = std::env::var("CUCKOOCACHE_CUCKOO_POLICY") {
            match v.to_lowercase().as_str() {
                "random" => self.cuckoo_policy = EvictionPolicy::Random,
                "firstprobe" | "first_probe" => self.cuckoo_policy = EvictionPolicy::FirstProbe,
                _ => {}
            }
        }
    }

    /// Validate every field, after all sources have been merged.
    ///
    /// Returns [`CacheError::Config`] naming the first violated
    /// constraint; `main` maps this to exit code `65` (bad config).
    pub fn validate(&self) -> Result<()> {
        if self.cuckoo_item_size == 0 {
            return Err(CacheError::Config(
                "cuckoo_item_size must be greater than 0".to_string(),
            ));
        }
        if self.cuckoo_nitem == 0 {
            return Err(CacheError::Config(
                "cuckoo_nitem must be greater than 0".to_string(),
            ));
        }
        if self.key_maxlen == 0 {
            return Err(CacheError::Config(
                "key_maxlen must be greater than 0".to_string(),
            ));
        }
        if self.key_maxlen > self.cuckoo_item_size {
            return Err(CacheError::Config(format!(
                "key_maxlen ({}) must not exceed cuckoo_item_size ({})",
                self.key_maxlen, self.cuckoo_item_size
            )));
        }
        if self.server_port == 0 {
            return Err(CacheError::Config(
                "server_port must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server_host, "0.0.0.0");
        assert_eq!(cfg.server_port, 11211);
        assert_eq!(cfg.cuckoo_item_size, 64);
        assert_eq!(cfg.cuckoo_nitem, 1_048_576);
        assert_eq!(cfg.cuckoo_policy, EvictionPolicy::Random);
        assert_eq!(cfg.key_maxlen, 250);
        assert!(cfg.stats_enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_partial_override_keeps_remaining_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "cuckoocache-test-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "server_port = 12000\ncuckoo_nitem = 10\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.server_port, 12000);
        assert_eq!(cfg.cuckoo_nitem, 10);
        assert_eq!(cfg.cuckoo_item_size, 64); // default retained
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let path = std::path::Path::new("/nonexistent/cuckoocache.toml");
        let err = Config::load(Some(path)).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_item_size() {
        let mut cfg = Config::default();
        cfg.cuckoo_item_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_nitem() {
        let mut cfg = Config::default();
        cfg.cuckoo_nitem = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_key_maxlen_over_item_size() {
        let mut cfg = Config::default();
        cfg.key_maxlen = cfg.cuckoo_item_size + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.server_port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_applies_on_top_of_defaults() {
        std::env::set_var("CUCKOOCACHE_PORT", "9999");
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.server_port, 9999);
        std::env::remove_var("CUCKOOCACHE_PORT");
    }
}

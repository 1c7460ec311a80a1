//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::{LumenError, Result};

/// Largest block size; the CUDA reductions stage partials in a 1024-slot shared array.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Tuning knobs for one [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Threads per block for 1-D launches. Power of two, at most 1024.
    pub block_size: usize,

    /// Element count at which the host backend splits a kernel across rayon.
    pub par_threshold: usize,

    /// Cap on live bytes for the host backend; `None` is unbounded.
    pub memory_limit_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            par_threshold: 8192,
            memory_limit_bytes: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LUMEN_BLOCK_SIZE`, `LUMEN_PAR_THRESHOLD` and
    /// `LUMEN_MEMORY_LIMIT` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_usize("LUMEN_BLOCK_SIZE")? {
            config.block_size = v;
        }
        if let Some(v) = env_usize("LUMEN_PAR_THRESHOLD")? {
            config.par_threshold = v;
        }
        if let Some(v) = env_usize("LUMEN_MEMORY_LIMIT")? {
            config.memory_limit_bytes = Some(v);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_par_threshold(mut self, par_threshold: usize) -> Self {
        self.par_threshold = par_threshold;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() || self.block_size > MAX_BLOCK_SIZE {
            return Err(LumenError::Config(format!(
                "block_size must be a power of two in 1..={}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.par_threshold == 0 {
            return Err(LumenError::Config("par_threshold must be non-zero".into()));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| LumenError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(LumenError::Config(format!("{}: {}", key, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.block_size, 256);
        assert_eq!(config.par_threshold, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_block_size() {
        for bad in [0, 3, 2048] {
            let config = EngineConfig::default().with_block_size(bad);
            assert!(matches!(config.validate(), Err(LumenError::Config(_))), "{}", bad);
        }
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"block_size": 128}"#).unwrap();
        assert_eq!(config.block_size, 128);
        assert_eq!(config.par_threshold, 8192);
        assert_eq!(config.memory_limit_bytes, None);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("LUMEN_PAR_THRESHOLD", "64");
        let config = EngineConfig::from_env().unwrap();
        std::env::remove_var("LUMEN_PAR_THRESHOLD");
        assert_eq!(config.par_threshold, 64);
    }
}

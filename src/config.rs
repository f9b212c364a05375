use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for an `AuthorizationPipeline`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of MPC participants (default: 3, at least 2).
    pub participants: usize,
    /// MPC session timeout in milliseconds (default: 5000).
    pub session_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            participants: 3,
            session_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.participants < 2 {
            return Err(Error::InvalidConfig(format!(
                "participants must be at least 2, got {}",
                self.participants
            )));
        }
        if self.session_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "session_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

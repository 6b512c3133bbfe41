//! Runtime configuration for the retriever.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pacing::Pacing;

/// Tunables shared by every run. Read-only once the pipeline is built;
/// the only state shared across concurrent requests besides the session pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrieverConfig {
    /// Budget for one page navigation.
    pub nav_timeout_ms: u64,
    /// Budget for one adaptive-locator call (all candidates together).
    pub locate_timeout_ms: u64,
    /// Budget for one capture attempt.
    pub capture_timeout_ms: u64,
    /// How long to wait for a spawned window/tab after a UI action.
    pub popup_wait_ms: u64,
    /// Budget for direct HTTP fetches.
    pub http_timeout_ms: u64,
    /// Politeness jitter between UI actions, lower bound.
    pub jitter_min_ms: u64,
    /// Politeness jitter between UI actions, upper bound.
    pub jitter_max_ms: u64,
    /// Maximum concurrently open browser sessions across all requests.
    pub max_sessions: usize,
    /// Override the HTTP user-agent (defaults to a desktop Chrome string).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            nav_timeout_ms: 30_000,
            locate_timeout_ms: 10_000,
            capture_timeout_ms: 45_000,
            popup_wait_ms: 8_000,
            http_timeout_ms: 20_000,
            jitter_min_ms: 400,
            jitter_max_ms: 1_600,
            max_sessions: 2,
            user_agent: None,
        }
    }
}

impl RetrieverConfig {
    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(ConfigError::JitterBounds {
                min_ms: self.jitter_min_ms,
                max_ms: self.jitter_max_ms,
            });
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::ZeroSessions);
        }
        for (name, value) in [
            ("nav_timeout_ms", self.nav_timeout_ms),
            ("locate_timeout_ms", self.locate_timeout_ms),
            ("capture_timeout_ms", self.capture_timeout_ms),
            ("popup_wait_ms", self.popup_wait_ms),
            ("http_timeout_ms", self.http_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout { name });
            }
        }
        Ok(())
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(self.jitter_min_ms, self.jitter_max_ms)
    }
}

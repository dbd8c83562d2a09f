//! Agent configuration
//!
//! Usage limits come from `KUBECC_AGENT_*` variables so an agent and a
//! consumer daemon on the same host can be tuned separately.

use std::path::PathBuf;
use std::str::FromStr;

use kubecc_core::UsageLimits;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Loads `.env` from the working directory or its parents, if present.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "Loaded .env file");
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            warn!(error = %e, "Failed to load .env file");
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub usage_limits: UsageLimits,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue { name, value })
                })
                .transpose()
        }

        let mut limits = UsageLimits::default();
        if let Some(limit) = parse(&lookup, "KUBECC_AGENT_CONCURRENT_PROCESS_LIMIT")? {
            limits.concurrent_process_limit = limit;
        }
        if let Some(m) = parse(&lookup, "KUBECC_AGENT_QUEUE_PRESSURE_MULTIPLIER")? {
            limits.queue_pressure_multiplier = m;
        }
        if let Some(m) = parse(&lookup, "KUBECC_AGENT_QUEUE_REJECT_MULTIPLIER")? {
            limits.queue_reject_multiplier = m;
        }
        limits.validate()?;
        Ok(Self {
            usage_limits: limits,
        })
    }

    pub fn with_usage_limits(mut self, limits: UsageLimits) -> Self {
        self.usage_limits = limits;
        self
    }
}

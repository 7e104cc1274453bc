//! Pool Status

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Operator-visible pool status
///
/// `Offline` is the initial state and the only one from which a pool may
/// be deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    #[default]
    Offline,
    Healthy,
    Degraded,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Offline => "offline",
            PoolStatus::Healthy => "healthy",
            PoolStatus::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "offline" => Ok(PoolStatus::Offline),
            "healthy" => Ok(PoolStatus::Healthy),
            "degraded" => Ok(PoolStatus::Degraded),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

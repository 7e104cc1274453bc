//! Pool Patch
//!
//! Partial updates of a pool's name, status and format.

use super::lifecycle::{sanitize_name, Pool};
use super::status::PoolStatus;
use crate::error::Result;
use crate::system::validate_format;
use serde::{Deserialize, Serialize};

/// Requested changes; absent or empty fields leave the pool untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolPatch {
    pub name: Option<String>,
    pub status: Option<String>,
    pub format: Option<String>,
}

/// A patch whose fields have all been checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedPatch {
    pub name: Option<String>,
    pub status: Option<PoolStatus>,
    pub format: Option<String>,
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.trim().is_empty())
}

impl PoolPatch {
    pub fn validate(&self) -> Result<ValidatedPatch> {
        let name = non_empty(&self.name).map(sanitize_name).transpose()?;
        let status = non_empty(&self.status)
            .map(str::parse::<PoolStatus>)
            .transpose()?;
        let format = non_empty(&self.format)
            .map(|f| {
                let f = f.trim();
                validate_format(f).map(|_| f.to_string())
            })
            .transpose()?;

        Ok(ValidatedPatch {
            name,
            status,
            format,
        })
    }
}

impl ValidatedPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.status.is_none() && self.format.is_none()
    }

    /// Return `pool` with the patch applied
    pub fn apply(&self, pool: &Pool) -> Pool {
        let mut patched = pool.clone();
        if let Some(name) = &self.name {
            patched.name = name.clone();
        }
        if let Some(status) = self.status {
            patched.status = status;
        }
        if let Some(format) = &self.format {
            patched.format = format.clone();
        }
        patched
    }
}

//! Runner records: the durable identity of a run.
//!
//! A runner pins a name to a database file and an endpoint list, so the same
//! runner can be re-executed later against the same cache.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Path of the SQLite file holding this runner's ledger and cache.
    /// Empty means the standard per-runner path under the databases dir.
    #[serde(default)]
    pub database_file: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub created_date: String,
}

impl RunnerRecord {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("runner name is empty"));
        }
        if self.endpoints.is_empty() {
            return Err(CoreError::validation(format!(
                "runner {} names no endpoints",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_required() -> anyhow::Result<()> {
        let ok: RunnerRecord = serde_json::from_str(
            r#"{"name": "nightly", "database_file": "databases/nightly.db", "endpoints": ["gpt-4o"]}"#,
        )?;
        ok.validate()?;

        let bare: RunnerRecord = serde_json::from_str(
            r#"{"name": "nightly", "database_file": "x.db", "endpoints": []}"#,
        )?;
        assert!(bare.validate().is_err());
        Ok(())
    }
}

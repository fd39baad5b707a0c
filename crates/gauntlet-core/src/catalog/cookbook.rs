//! Cookbook records: named, ordered bundles of recipes.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookbook {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub recipes: Vec<String>,
    #[serde(default)]
    pub created_date: String,
}

impl Cookbook {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("cookbook name is empty"));
        }
        if self.recipes.is_empty() {
            return Err(CoreError::validation(format!(
                "cookbook {} names no recipes",
                self.name
            )));
        }
        Ok(())
    }
}

//! The catalog: endpoints, recipes, cookbooks, datasets, prompt templates
//! and runners, stored as JSON records addressed by slug id.

pub mod cookbook;
pub mod dataset;
pub mod endpoint;
pub mod recipe;
pub mod runner;
pub mod slug;
pub mod store;
pub mod template;

pub use cookbook::Cookbook;
pub use dataset::{DatasetExample, DatasetHandle, DatasetMeta};
pub use endpoint::EndpointSpec;
pub use recipe::{GradeRange, GradingScale, Recipe};
pub use runner::RunnerRecord;
pub use slug::slugify;
pub use store::CatalogStore;
pub use template::{CompiledTemplate, PromptTemplate};

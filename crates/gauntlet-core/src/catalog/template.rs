//! Prompt template records and their compiled form.

use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// A stored prompt template with a `{prompt}` placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub created_date: String,
}

impl PromptTemplate {
    pub fn validate(&self) -> CoreResult<()> {
        if self.template.trim().is_empty() {
            return Err(CoreError::validation(format!(
                "prompt template {} is empty",
                self.name
            )));
        }
        Ok(())
    }

    /// Compile for rendering.
    pub fn compile(&self) -> CoreResult<CompiledTemplate> {
        CompiledTemplate::new(&self.id, &self.template)
    }
}

/// Catalog templates write the placeholder as bare `{prompt}`; full Jinja
/// templates spell it `{{ prompt }}`. Normalize the short form, leaving real
/// Jinja templates untouched.
fn normalize_placeholder(template: &str) -> String {
    if template.contains("{{") {
        template.to_string()
    } else {
        template.replace("{prompt}", "{{ prompt }}")
    }
}

/// A template parsed once and rendered many times.
#[derive(Debug)]
pub struct CompiledTemplate {
    id: String,
    env: Environment<'static>,
}

impl CompiledTemplate {
    pub fn new(id: &str, template: &str) -> CoreResult<Self> {
        let mut env = Environment::new();
        env.add_template_owned(id.to_string(), normalize_placeholder(template))?;
        Ok(Self {
            id: id.to_string(),
            env,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Substitute the dataset example's input for `prompt`.
    pub fn render(&self, input: &str) -> CoreResult<String> {
        let tmpl = self.env.get_template(&self.id)?;
        let rendered = tmpl.render(context! { prompt => input })?;
        Ok(rendered)
    }
}

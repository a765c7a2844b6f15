use minijinja::{context, Environment};
use tracing::debug;

use super::LlmError;
use crate::db::introspect::SchemaDescription;

const TEMPLATE_NAME: &str = "text_to_sql.txt";

/// Renders the text-to-SQL instruction sent to every backend.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, LlmError> {
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, include_str!("../../templates/text_to_sql.txt"))
            .map_err(|e| LlmError::PromptError(e.to_string()))?;
        Ok(Self { env })
    }

    pub fn render(&self, question: &str, schema: &SchemaDescription) -> Result<String, LlmError> {
        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| LlmError::PromptError(e.to_string()))?;

        let prompt = template
            .render(context! {
                schema => describe_schema(schema),
                question => question,
            })
            .map_err(|e| LlmError::PromptError(e.to_string()))?;

        debug!("Prepared LLM prompt: {}", prompt);
        Ok(prompt)
    }
}

/// One `table(col1, col2)` line per table.
pub fn describe_schema(schema: &SchemaDescription) -> String {
    schema
        .tables()
        .map(|(table, columns)| format!("{}({})", table, columns.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

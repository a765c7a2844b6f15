use serde::{Deserialize, Serialize};

/// A statement extracted from one model response, with the question it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub question: String,
    pub sql: String,
}

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)```sql|```").unwrap());

// A verb up to the first semicolon, across lines
static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)(SELECT|INSERT|UPDATE|DELETE)[^;]+;").unwrap());

/// Pulls a single SQL statement out of free-form model output.
pub fn extract_sql(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    let cleaned = FENCE.replace_all(raw, "");
    let cleaned = cleaned.trim();

    if let Some(m) = STATEMENT.find(cleaned) {
        let sql = m.as_str().trim().to_string();
        info!("Extracted SQL statement from model output");
        debug!("Extracted SQL: {}", sql);
        return Some(sql);
    }

    let line = cleaned
        .split('\n')
        .find(|line| line.to_uppercase().starts_with("SELECT"))
        .map(str::to_string);

    match &line {
        Some(sql) => debug!("Extracted SQL using line scanning: {}", sql),
        None => info!("Could not extract SQL from model output"),
    }
    line
}

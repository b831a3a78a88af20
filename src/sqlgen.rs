//! SQL statement synthesis from natural language plus retrieved context.
//!
//! The generated statement is opaque to the pipeline: no structural
//! validation happens here. What this module does guarantee is that a
//! statement always comes back — terminal generation errors and retry
//! exhaustion degrade to literal sentinel statements that select a constant
//! error string, so failure detection moves downstream to "the returned
//! rows are the sentinel", which the conversational surface can narrate.

use serde_json::Value;
use std::sync::Arc;

use crate::chroma::RetrievedDocument;
use crate::generation::{strip_code_fences, TextGenerator};
use crate::retry::{RetryOutcome, RetryPolicy};

/// Sentinel returned when generation fails with a non-retryable error.
pub const SQL_ERROR_SENTINEL: &str = "SELECT 'An error occurred during SQL generation';";

/// Sentinel returned when every generation attempt failed transiently.
pub const SQL_EXHAUSTED_SENTINEL: &str = "SELECT 'Failed to generate SQL after multiple retries';";

/// How a [`GeneratedSql`] came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOrigin {
    /// Produced by the model.
    Generated,
    /// Terminal generation error; `sql` is [`SQL_ERROR_SENTINEL`].
    TerminalFallback,
    /// Retry budget spent; `sql` is [`SQL_EXHAUSTED_SENTINEL`].
    RetriesExhausted,
}

/// A single executable SQL statement, tagged with its provenance.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub origin: SqlOrigin,
}

impl GeneratedSql {
    /// Whether this statement is a degradation sentinel rather than a
    /// model-produced query.
    pub fn is_fallback(&self) -> bool {
        self.origin != SqlOrigin::Generated
    }
}

/// The two-table schema description shown to the model.
const POSTGRES_SCHEMA: &str = r#"You have access to a PostgreSQL database with two tables:

1. `"Average_Ocean_Profiles"`: historical surface-level data for the Indian Ocean, Bay of Bengal, and Arabian Sea.
   Columns:
   - `"TIME"` (date): The date of the measurement.
   - `grid_id` (text): A unique identifier for the geographical grid cell.
   - `latitude` (float): The center latitude of the grid cell.
   - `longitude` (float): The center longitude of the grid cell.
   - `avg_temperature` (float): The average temperature for the grid cell on that day.
   - `avg_salinity` (float): The average salinity for the grid cell on that day.
   - `argo_float_ids` (text): IDs of the Argo floats that contributed to the average.

2. `argo_depth_ocean_profiles`: historical depth-wise profiles for the same regions.
   Columns:
   - `time_period` (date): The date of the measurement.
   - `grid_id` (text): A unique identifier for the geographical grid cell.
   - `depth` (integer): The depth in meters, with possible values of 10, 100, 200, 500, or 1000.
   - `latitude` (float): The center latitude of the grid cell.
   - `longitude` (float): The center longitude of the grid cell.
   - `avg_temperature` (float): The average temperature at that depth.
   - `avg_salinity` (float): The average salinity at that depth."#;

/// Turns a user query plus retrieved context into one SQL statement.
pub struct SqlSynthesizer {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl SqlSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    /// Generate a statement for `user_query`, never failing: degradations
    /// come back as tagged sentinel statements.
    pub async fn synthesize(
        &self,
        user_query: &str,
        retrieved_docs: &[RetrievedDocument],
    ) -> GeneratedSql {
        let prompt = build_sql_prompt(user_query, retrieved_docs);

        let outcome = self
            .policy
            .invoke(|| self.generator.generate(&prompt))
            .await;

        match outcome {
            RetryOutcome::Success(text) => {
                let sql = strip_code_fences(&text);
                tracing::info!(%sql, "generated SQL statement");
                GeneratedSql {
                    sql,
                    origin: SqlOrigin::Generated,
                }
            }
            RetryOutcome::Terminal { error } => {
                tracing::warn!(%error, "SQL generation failed, returning sentinel");
                GeneratedSql {
                    sql: SQL_ERROR_SENTINEL.to_string(),
                    origin: SqlOrigin::TerminalFallback,
                }
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(attempts, %last_error, "SQL generation retries exhausted");
                GeneratedSql {
                    sql: SQL_EXHAUSTED_SENTINEL.to_string(),
                    origin: SqlOrigin::RetriesExhausted,
                }
            }
        }
    }
}

fn build_sql_prompt(user_query: &str, retrieved_docs: &[RetrievedDocument]) -> String {
    let context = serde_json::to_string_pretty(
        &retrieved_docs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "document": d.document,
                    "metadata": d.metadata,
                    "distance": d.distance,
                })
            })
            .collect::<Vec<Value>>(),
    )
    .unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"You are an expert PostgreSQL query writer. Generate a precise SQL query to retrieve data based on a user's question and some relevant context.

**Database Schema:**
{schema}

**User Query:**
"{query}"

**Relevant Context from a vector search (use this for location and time clues):**
{context}

**Instructions:**
1. Table selection:
   - If the user's query mentions "depth", "profiles", or specific depth levels (e.g., "at 100m"), you MUST query the `argo_depth_ocean_profiles` table.
   - Otherwise, for general or surface-level queries, you MUST query the `"Average_Ocean_Profiles"` table.
2. Filtering:
   - Use the date and location from the user query as the primary source for WHERE clause filters. Use the relevant context as supplementary information, for example to identify specific grid_ids.
   - For `"Average_Ocean_Profiles"`, filter on the `"TIME"` column. For `argo_depth_ocean_profiles`, filter on the `time_period` column.
3. Select only the columns most relevant to answering the query.
4. Output a single, complete, syntactically correct PostgreSQL query with no explanations, markdown formatting, or anything other than the SQL itself."#,
        schema = POSTGRES_SCHEMA,
        query = user_query,
        context = context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> RetrievedDocument {
        RetrievedDocument {
            document: text.to_string(),
            metadata: serde_json::Map::new(),
            distance: 0.25,
        }
    }

    #[test]
    fn test_prompt_contains_both_tables_and_context() {
        let docs = vec![doc("An Argo float measured 25.1°C at 13.0N, 61.0E")];
        let prompt = build_sql_prompt("average temperature near 13N 61E", &docs);
        assert!(prompt.contains("Average_Ocean_Profiles"));
        assert!(prompt.contains("argo_depth_ocean_profiles"));
        assert!(prompt.contains("13.0N, 61.0E"));
        assert!(prompt.contains("average temperature near 13N 61E"));
    }

    #[test]
    fn test_prompt_states_table_selection_rule() {
        let prompt = build_sql_prompt("salinity at 100m depth", &[]);
        // Depth vocabulary routes to the depth-resolved table.
        assert!(prompt.contains("mentions \"depth\""));
        assert!(prompt.contains("time_period"));
        assert!(prompt.contains("\"TIME\""));
    }

    #[test]
    fn test_sentinels_are_single_statements() {
        assert!(SQL_ERROR_SENTINEL.starts_with("SELECT '"));
        assert!(SQL_EXHAUSTED_SENTINEL.starts_with("SELECT '"));
        assert_ne!(SQL_ERROR_SENTINEL, SQL_EXHAUSTED_SENTINEL);
    }

    #[test]
    fn test_fallback_tagging() {
        let generated = GeneratedSql {
            sql: "SELECT 1;".to_string(),
            origin: SqlOrigin::Generated,
        };
        assert!(!generated.is_fallback());

        let sentinel = GeneratedSql {
            sql: SQL_EXHAUSTED_SENTINEL.to_string(),
            origin: SqlOrigin::RetriesExhausted,
        };
        assert!(sentinel.is_fallback());
    }
}

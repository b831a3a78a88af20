//! Final-answer synthesis.
//!
//! The last pipeline stage turns the user's question and the rows the
//! generated SQL produced into a Markdown answer. One generation attempt,
//! no retry: the conversational surface must always produce text, so any
//! failure degrades to a fixed apology.

use std::sync::Arc;

use crate::generation::{strip_code_fences, TextGenerator};
use crate::store::Row;

/// Returned whenever answer generation fails.
pub const APOLOGY: &str =
    "I'm sorry, but I encountered an error while trying to formulate a final response.";

pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Synthesize the final answer; never fails.
    pub async fn synthesize(&self, user_query: &str, sql_results: &[Row]) -> String {
        let prompt = build_answer_prompt(user_query, sql_results);

        match self.generator.generate(&prompt).await {
            Ok(text) => strip_code_fences(&text),
            Err(e) => {
                tracing::warn!(error = %e, "answer synthesis failed, returning apology");
                APOLOGY.to_string()
            }
        }
    }
}

fn build_answer_prompt(user_query: &str, sql_results: &[Row]) -> String {
    let results =
        serde_json::to_string_pretty(sql_results).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"You are an expert oceanographer's assistant. Synthesize the database results below into a comprehensive, natural language answer to the user's question.

**User's Original Question:**
"{query}"

**Precise Data from the Database:**
{results}

**Instructions:**
1. Formulate a concise, easy-to-understand answer that directly addresses the question.
2. Use Markdown formatting: bold key terms, depths, and numerical values; bullet points for key findings; subheadings to structure by depth or location.
3. If the data shows specific numbers or trends, mention them.
4. If the data is empty or inconclusive, state that clearly.
5. Do not just list the data; explain what it means in the context of the question.

**Final Answer:**"#,
        query = user_query,
        results = results,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_embeds_rows_and_question() {
        let mut row = Row::new();
        row.insert("avg_temperature".to_string(), json!(25.1));
        row.insert("time".to_string(), json!("2023-01-01"));

        let prompt = build_answer_prompt("how warm was it?", &[row]);
        assert!(prompt.contains("how warm was it?"));
        assert!(prompt.contains("25.1"));
        assert!(prompt.contains("2023-01-01"));
    }

    #[test]
    fn test_prompt_with_empty_rows() {
        let prompt = build_answer_prompt("anything?", &[]);
        assert!(prompt.contains("[]"));
    }
}

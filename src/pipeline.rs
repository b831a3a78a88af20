//! The conversational RAG orchestrator.
//!
//! One strictly sequential chain per request: filter synthesis → vector
//! retrieval → SQL synthesis → tolerant execution → answer synthesis →
//! response assembly. Each step runs to completion before the next begins,
//! and the pipeline holds no cross-request state. All collaborators are
//! injected trait-object handles; nothing here is a process-wide global.
//!
//! Failure policy: generation steps degrade to safe fallbacks (empty
//! filter, sentinel SQL, apology answer) rather than aborting; the only
//! hard error below the transport layer is an empty retrieval result,
//! which the HTTP surface reports as "not found".

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::chroma::{RetrievedDocument, VectorSearcher};
use crate::filter::FilterSynthesizer;
use crate::generation::TextGenerator;
use crate::retry::RetryPolicy;
use crate::sqlgen::SqlSynthesizer;
use crate::store::{Row, SqlExecutor};
use crate::synthesis::AnswerSynthesizer;

/// The structured answer returned by `POST /query`.
#[derive(Debug, Serialize)]
pub struct PipelineResponse {
    pub user_query: String,
    pub final_answer: String,
    pub retrieved_docs: Vec<RetrievedDocument>,
    pub generated_sql: String,
    pub sql_results: Vec<Row>,
}

pub struct Pipeline {
    filter: FilterSynthesizer,
    sqlgen: SqlSynthesizer,
    answer: AnswerSynthesizer,
    searcher: Arc<dyn VectorSearcher>,
    executor: Arc<dyn SqlExecutor>,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        searcher: Arc<dyn VectorSearcher>,
        executor: Arc<dyn SqlExecutor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            filter: FilterSynthesizer::new(generator.clone(), policy.clone()),
            sqlgen: SqlSynthesizer::new(generator.clone(), policy),
            answer: AnswerSynthesizer::new(generator),
            searcher,
            executor,
        }
    }

    /// Run the full pipeline for one user query.
    ///
    /// Errors only when retrieval finds no documents (surfaced as "not
    /// found") or the vector store itself fails; every other step degrades
    /// to its documented fallback and the chain keeps going.
    pub async fn run(&self, user_query: &str, top_k: usize) -> Result<PipelineResponse> {
        tracing::info!(%user_query, top_k, "running retrieval stage");
        let filter = self.filter.synthesize(user_query).await;
        let retrieved_docs = self.searcher.query(user_query, top_k, &filter).await?;

        if retrieved_docs.is_empty() {
            bail!("no relevant documents found in the vector database");
        }
        tracing::info!(count = retrieved_docs.len(), "retrieved documents");

        tracing::info!("running SQL generation stage");
        let generated = self.sqlgen.synthesize(user_query, &retrieved_docs).await;

        let sql_results = self.executor.fetch_tolerant(&generated.sql).await;

        tracing::info!("running answer synthesis stage");
        let final_answer = self.answer.synthesize(user_query, &sql_results).await;

        Ok(PipelineResponse {
            user_query: user_query.to_string(),
            final_answer,
            retrieved_docs,
            generated_sql: generated.sql,
            sql_results,
        })
    }
}

//! Vector-store metadata filters and their synthesis from natural language.
//!
//! A [`Filter`] is a boolean-condition tree over the fixed profile-metadata
//! schema, matching the Chroma `where` document format. The tree only holds
//! single-operator conditions: a range over one field is always two sibling
//! conditions under `$and`. A generated document that packs two operators
//! into one field entry (`{"temperature": {"$gte": 10, "$lte": 20}}`) would
//! silently drop an operator at the store, so [`Filter::parse`] rejects it
//! outright.
//!
//! Synthesis is widen-not-fail: any generation or parse failure degrades to
//! the empty filter, which consumers treat as "no constraint". A missing
//! filter costs retrieval precision, never availability.

use anyhow::{bail, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::generation::{strip_code_fences, TextGenerator};
use crate::retry::{RetryOutcome, RetryPolicy};

// ============ Filter model ============

/// Comparison operator on a single metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            _ => None,
        }
    }

    fn as_key(&self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

/// A single-operator condition on one metadata field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

/// A node of the boolean-condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Cond(Condition),
}

/// A complete vector-store filter; `empty` means "no constraint".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    root: Option<FilterNode>,
}

impl Filter {
    pub fn empty() -> Self {
        Self { root: None }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Parse a generated JSON document into a filter.
    ///
    /// `{}` parses to the empty filter. A field document with more than one
    /// operator entry is rejected: ranges must arrive as sibling conditions.
    pub fn parse(value: &Value) -> Result<Self> {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => bail!("filter must be a JSON object, got: {}", value),
        };
        if obj.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self {
            root: Some(parse_node(value)?),
        })
    }

    /// Serialize back to the store's `where` document format; `None` when
    /// empty, so callers can omit the key entirely.
    pub fn to_where(&self) -> Option<Value> {
        self.root.as_ref().map(node_to_value)
    }
}

fn parse_node(value: &Value) -> Result<FilterNode> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("filter node must be an object, got: {}", value))?;

    if obj.len() != 1 {
        bail!(
            "filter node must have exactly one key (wrap multiple conditions in $and): {}",
            value
        );
    }

    let (key, inner) = obj.iter().next().unwrap();

    match key.as_str() {
        "$and" | "$or" => {
            let children = inner
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("{} must hold an array", key))?;
            if children.is_empty() {
                bail!("{} must not be empty", key);
            }
            let nodes = children.iter().map(parse_node).collect::<Result<Vec<_>>>()?;
            Ok(if key == "$and" {
                FilterNode::And(nodes)
            } else {
                FilterNode::Or(nodes)
            })
        }
        field if field.starts_with('$') => bail!("unknown filter operator: {}", field),
        field => parse_condition(field, inner),
    }
}

fn parse_condition(field: &str, value: &Value) -> Result<FilterNode> {
    match value {
        Value::Object(ops) => {
            if ops.len() > 1 {
                // Two operators in one field document would silently drop
                // one at the store; the range rule demands siblings.
                bail!(
                    "field '{}' carries {} operators; a range must be two sibling conditions",
                    field,
                    ops.len()
                );
            }
            let (op_key, op_value) = ops
                .iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("field '{}' has an empty condition", field))?;
            let op = CompareOp::from_key(op_key)
                .ok_or_else(|| anyhow::anyhow!("unknown operator '{}' on field '{}'", op_key, field))?;
            Ok(FilterNode::Cond(Condition {
                field: field.to_string(),
                op,
                value: op_value.clone(),
            }))
        }
        // Bare scalar is shorthand for equality.
        Value::Null | Value::Array(_) => bail!("field '{}' has an invalid value: {}", field, value),
        scalar => Ok(FilterNode::Cond(Condition {
            field: field.to_string(),
            op: CompareOp::Eq,
            value: scalar.clone(),
        })),
    }
}

fn node_to_value(node: &FilterNode) -> Value {
    match node {
        FilterNode::And(children) => {
            serde_json::json!({ "$and": children.iter().map(node_to_value).collect::<Vec<_>>() })
        }
        FilterNode::Or(children) => {
            serde_json::json!({ "$or": children.iter().map(node_to_value).collect::<Vec<_>>() })
        }
        FilterNode::Cond(cond) => {
            let mut op_doc = serde_json::Map::new();
            op_doc.insert(cond.op.as_key().to_string(), cond.value.clone());
            let mut doc = serde_json::Map::new();
            doc.insert(cond.field.clone(), Value::Object(op_doc));
            Value::Object(doc)
        }
    }
}

// ============ Synthesis ============

/// Metadata fields the vector store indexes, as shown to the model.
const METADATA_SCHEMA: &str = "\
- `latitude` (float): Center latitude of the grid cell.
- `longitude` (float): Center longitude of the grid cell.
- `year` (int): The year of the measurement.
- `month` (int): The month of the measurement (1-12).
- `day` (int): The day of the measurement (1-31).
- `temperature` (float): The average temperature in degrees Celsius.
- `salinity` (float): The average salinity in PSU.
- `depth` (int): The measurement depth in meters (only for 3D data).
- `float_ids` (str): Comma-separated string of contributing float IDs.";

/// Bounding boxes for named regions the model should recognize.
const GEO_KNOWLEDGE: &str = "\
- \"equator\": a latitude range from -10 to 10.
- \"Arabian Sea\": a latitude range from 8 to 25 AND a longitude range from 50 to 75.
- \"Bay of Bengal\": a latitude range from 5 to 22 AND a longitude range from 80 to 95.
- \"Indian Ocean\": a general latitude range from -20 to 30 AND a longitude range from 30 to 120.";

/// Turns a natural-language query into a metadata [`Filter`] via a
/// schema-constrained generation call under retry.
pub struct FilterSynthesizer {
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl FilterSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    /// Generate a filter for `user_query`.
    ///
    /// Returns the empty filter on unparseable output, terminal generation
    /// errors, and retry exhaustion alike.
    pub async fn synthesize(&self, user_query: &str) -> Filter {
        let prompt = build_filter_prompt(user_query);

        let outcome = self
            .policy
            .invoke(|| self.generator.generate(&prompt))
            .await;

        let text = match outcome {
            RetryOutcome::Success(text) => text,
            RetryOutcome::Terminal { error } => {
                tracing::warn!(%error, "filter generation failed, proceeding unfiltered");
                return Filter::empty();
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    attempts,
                    %last_error,
                    "filter generation retries exhausted, proceeding unfiltered"
                );
                return Filter::empty();
            }
        };

        match parse_generated_filter(&text) {
            Ok(filter) => {
                tracing::info!(filter = ?filter.to_where(), "generated metadata filter");
                filter
            }
            Err(e) => {
                tracing::warn!(error = %e, raw = %text, "unparseable filter, proceeding unfiltered");
                Filter::empty()
            }
        }
    }
}

fn parse_generated_filter(text: &str) -> Result<Filter> {
    let stripped = strip_code_fences(text);
    let value: Value = serde_json::from_str(&stripped)?;
    Filter::parse(&value)
}

fn build_filter_prompt(user_query: &str) -> String {
    format!(
        r#"You are an expert at creating metadata filters for a vector database of ocean profiles. Analyze the user's query and produce a valid 'where' filter as a JSON object.

**Metadata Schema:**
{schema}

**User Query:**
"{query}"

**Geographical Knowledge Base:**
Use these latitude and longitude boundaries when the user mentions a named location:
{geo}

**CRITICAL RULE FOR RANGES:**
When filtering a single field on a range (e.g., "temperature between 10 and 20"), you MUST create two separate dictionary entries inside an `$and` list.
- CORRECT: {{"$and": [{{"temperature": {{"$gte": 10}}}}, {{"temperature": {{"$lte": 20}}}}]}}
- INCORRECT: {{"$and": [{{"temperature": {{"$gte": 10, "$lte": 20}}}}]}}

**OTHER RULES:**
1. For a location box, combine all latitude and longitude conditions into a single `$and` list.
2. For a time filter (e.g., "in March 2023"), use `$and` with `year` and `month`.
3. For a single threshold (e.g., "temperature above 20 degrees"), use one operator such as `$gte` or `$lt`.
4. If no filters can be extracted, return an empty JSON object: {{}}.

Return ONLY the JSON object, with no other text or explanations."#,
        schema = METADATA_SCHEMA,
        query = user_query,
        geo = GEO_KNOWLEDGE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_empty_filter() {
        let filter = Filter::parse(&serde_json::json!({})).unwrap();
        assert!(filter.is_empty());
        assert_eq!(filter.to_where(), None);
    }

    #[test]
    fn test_single_condition_roundtrip() {
        let doc = serde_json::json!({ "temperature": { "$gte": 20.0 } });
        let filter = Filter::parse(&doc).unwrap();
        assert_eq!(filter.to_where().unwrap(), doc);
    }

    #[test]
    fn test_bare_scalar_is_equality() {
        let filter = Filter::parse(&serde_json::json!({ "year": 2023 })).unwrap();
        assert_eq!(
            filter.to_where().unwrap(),
            serde_json::json!({ "year": { "$eq": 2023 } })
        );
    }

    #[test]
    fn test_range_as_siblings_accepted() {
        let doc = serde_json::json!({
            "$and": [
                { "temperature": { "$gte": 10 } },
                { "temperature": { "$lte": 20 } },
            ]
        });
        let filter = Filter::parse(&doc).unwrap();
        assert_eq!(filter.to_where().unwrap(), doc);
    }

    #[test]
    fn test_two_operators_in_one_entry_rejected() {
        let doc = serde_json::json!({
            "$and": [{ "temperature": { "$gte": 10, "$lte": 20 } }]
        });
        let err = Filter::parse(&doc).unwrap_err();
        assert!(err.to_string().contains("sibling"));
    }

    #[test]
    fn test_location_box() {
        // Arabian Sea: four sibling conditions under one $and.
        let doc = serde_json::json!({
            "$and": [
                { "latitude": { "$gte": 8 } },
                { "latitude": { "$lte": 25 } },
                { "longitude": { "$gte": 50 } },
                { "longitude": { "$lte": 75 } },
            ]
        });
        let filter = Filter::parse(&doc).unwrap();
        match filter.to_where().unwrap() {
            Value::Object(obj) => {
                let and = obj.get("$and").unwrap().as_array().unwrap();
                assert_eq!(and.len(), 4);
            }
            other => panic!("expected object, got {}", other),
        }
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let doc = serde_json::json!({ "temperature": { "$near": 20 } });
        assert!(Filter::parse(&doc).is_err());
    }

    #[test]
    fn test_multiple_top_level_fields_rejected() {
        let doc = serde_json::json!({
            "year": { "$eq": 2023 },
            "month": { "$eq": 3 },
        });
        assert!(Filter::parse(&doc).is_err());
    }

    #[test]
    fn test_parse_generated_filter_strips_fences() {
        let text = "```json\n{\"depth\": {\"$eq\": 100}}\n```";
        let filter = parse_generated_filter(text).unwrap();
        assert_eq!(
            filter.to_where().unwrap(),
            serde_json::json!({ "depth": { "$eq": 100 } })
        );
    }

    #[test]
    fn test_parse_generated_filter_malformed() {
        assert!(parse_generated_filter("not json at all").is_err());
    }

    #[test]
    fn test_prompt_names_every_field() {
        let prompt = build_filter_prompt("warm water near the equator");
        for field in [
            "latitude",
            "longitude",
            "year",
            "month",
            "day",
            "temperature",
            "salinity",
            "depth",
            "float_ids",
        ] {
            assert!(prompt.contains(field), "prompt missing field {}", field);
        }
        assert!(prompt.contains("Arabian Sea"));
        assert!(prompt.contains("warm water near the equator"));
    }
}

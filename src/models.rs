/// Domain types shared by the retrieval pipeline.
///
/// A `MetadataRecord` describes one analytics asset (a report or a metric).
/// Records are owned by the vector store and are read-only at query time;
/// everything else here is created per query and dropped after the response.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder rendered for metadata fields a record does not carry.
pub const MISSING_FIELD: &str = "N/A";

// ── Record type ──────────────────────────────────────────────────────

/// Kind of analytics asset a metadata record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Report,
    Metric,
}

impl RecordType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Metric => "metric",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "metric" => Ok(Self::Metric),
            other => Err(format!("unknown record type: {other} (expected report or metric)")),
        }
    }
}

// ── Query ────────────────────────────────────────────────────────────

/// A single user question with optional narrowing filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub domain: Option<String>,
    pub record_type: Option<RecordType>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domain: None,
            record_type: None,
        }
    }

    /// Restrict retrieval to records of the given business domain.
    ///
    /// Blank domains are treated as "no filter".
    #[must_use]
    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }

    #[must_use]
    pub fn with_record_type(mut self, record_type: Option<RecordType>) -> Self {
        self.record_type = record_type;
        self
    }
}

// ── Stored records ───────────────────────────────────────────────────

/// A stored description of an analytics asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: String,
    pub page_content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl MetadataRecord {
    pub fn new(id: impl Into<String>, page_content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            page_content: page_content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style helper used when constructing records by hand.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// String value of a metadata field, if present and non-null.
    ///
    /// Arrays (as used for `tags`) are joined with `", "`.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            other => Some(other.to_string()),
        }
    }

    /// Like [`field`](Self::field) but falls back to [`MISSING_FIELD`].
    #[must_use]
    pub fn field_or_missing(&self, key: &str) -> String {
        self.field(key)
            .unwrap_or_else(|| MISSING_FIELD.to_string())
    }

    #[must_use]
    pub fn record_type(&self) -> Option<RecordType> {
        self.field("type").and_then(|t| t.parse().ok())
    }

    #[must_use]
    pub fn domain(&self) -> Option<String> {
        self.field("domain")
    }
}

// ── Per-query results ────────────────────────────────────────────────

/// A record returned by similarity search, with its score and 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMatch {
    #[serde(flatten)]
    pub record: MetadataRecord,
    pub score: f64,
    pub rank: usize,
}

/// How the answer text of an [`AnswerResult`] came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// The language model produced the answer from retrieved context.
    Answered,
    /// Retrieval found nothing; the model was not called.
    NoMatches,
    /// Retrieval succeeded but the language model failed.
    Unavailable,
}

pub const NO_MATCHES_ANSWER: &str =
    "No relevant analytics metadata was found for this question, so it cannot be answered from the catalog.";

pub const UNAVAILABLE_ANSWER: &str = "Answer unavailable: the language model could not be reached. \
     The matching metadata records are listed below.";

/// Final response of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub matches: Vec<RetrievedMatch>,
    pub num_matches: usize,
    pub status: AnswerStatus,
}

impl AnswerResult {
    #[must_use]
    pub fn answered(answer: String, matches: Vec<RetrievedMatch>) -> Self {
        let num_matches = matches.len();
        Self {
            answer,
            matches,
            num_matches,
            status: AnswerStatus::Answered,
        }
    }

    #[must_use]
    pub fn no_matches() -> Self {
        Self {
            answer: NO_MATCHES_ANSWER.to_string(),
            matches: Vec::new(),
            num_matches: 0,
            status: AnswerStatus::NoMatches,
        }
    }

    /// Sentinel result for a generation failure after successful retrieval.
    #[must_use]
    pub fn unavailable(matches: Vec<RetrievedMatch>) -> Self {
        let num_matches = matches.len();
        Self {
            answer: UNAVAILABLE_ANSWER.to_string(),
            matches,
            num_matches,
            status: AnswerStatus::Unavailable,
        }
    }
}

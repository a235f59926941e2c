//! Data schemas for the wallet harvester.
//!
//! Request bodies sent to the search index, the response envelope it returns,
//! and the hit type that flows through the join and ends up in artifacts.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Fields of a transaction a wallet can appear in
pub const ROLE_FIELDS: [&str; 3] = ["sender", "receiver", "receivers"];

/// Source flags marking a transaction as having related auxiliary records
pub const RELATED_DATA_FLAGS: [&str; 3] = ["hasScResults", "hasOperations", "hasLogs"];

/// Foreign key carried by smart contract results and logs
pub const ORIGINAL_TX_HASH: &str = "originalTxHash";

/// Field the merged auxiliary records are attached under, inside `_source`
pub const EVENTS_FIELD: &str = "events";

// ============================================================================
// PART A: Queries
// ============================================================================

/// Search request body. Built once through one of the constructors and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Query(Value);

impl Query {
    /// Every transaction the wallet takes part in, newest first
    pub fn wallet_transactions(wallet: &str) -> Self {
        let should: Vec<Value> = ROLE_FIELDS
            .iter()
            .map(|field| json!({ "match": { *field: wallet } }))
            .collect();

        Self(json!({
            "query": { "bool": { "should": should } },
            "sort": [{ "timestamp": { "order": "desc" } }],
            "track_total_hits": true
        }))
    }

    /// Records whose `field` is one of `values`
    pub fn terms(field: &str, values: &[String]) -> Self {
        Self(json!({
            "query": { "bool": { "should": [{ "terms": { field: values } }] } },
            "track_total_hits": true
        }))
    }

    /// Body of a `/_search/scroll` continuation request
    pub fn scroll_continuation(keep_alive: &str, scroll_id: &str) -> Self {
        Self(json!({ "scroll": keep_alive, "scroll_id": scroll_id }))
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }
}

// ============================================================================
// PART B: Response envelope
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// Cursor for the next page, present when scrolling was requested
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,

    pub hits: HitsEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub total: Option<TotalHits>,

    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TotalHits {
    pub value: u64,
}

impl SearchResponse {
    pub fn total_hits(&self) -> Option<u64> {
        self.hits.total.map(|t| t.value)
    }
}

// ============================================================================
// PART C: Hits
// ============================================================================

/// One document returned by the index: a transaction, a smart contract
/// result, or a log entry.
///
/// Metadata other than `_id` and `_source` (`_index`, `_score`, `sort`, ...)
/// is kept so the artifact carries the hit exactly as received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,

    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

impl Hit {
    /// Truthiness of a source flag; absent and non-boolean count as false
    pub fn flag(&self, name: &str) -> bool {
        self.source
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether the transaction has smart contract results, operations or logs
    pub fn has_related_data(&self) -> bool {
        RELATED_DATA_FLAGS.iter().any(|flag| self.flag(flag))
    }

    pub fn foreign_key(&self, field: &str) -> Option<&str> {
        self.source.get(field).and_then(Value::as_str)
    }

    #[cfg(test)]
    pub fn events(&self) -> Option<&Vec<Value>> {
        self.source.get(EVENTS_FIELD).and_then(Value::as_array)
    }

    /// Append auxiliary records to `_source.events`, keeping anything already
    /// attached in front.
    pub fn attach_events<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut events = events.into_iter().peekable();
        if events.peek().is_none() {
            return;
        }

        match self.source.get_mut(EVENTS_FIELD) {
            Some(Value::Array(existing)) => existing.extend(events),
            _ => {
                self.source
                    .insert(EVENTS_FIELD.to_string(), Value::Array(events.collect()));
            }
        }
    }
}

impl From<Hit> for Value {
    fn from(hit: Hit) -> Self {
        let mut object = Map::with_capacity(hit.meta.len() + 2);
        object.insert("_id".to_string(), Value::String(hit.id));
        object.insert("_source".to_string(), Value::Object(hit.source));
        object.extend(hit.meta);
        Value::Object(object)
    }
}

// ============================================================================
// PART D: Harvest results
// ============================================================================

/// Why a wallet ended with an ignored marker instead of a data artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoTransactions,
    TooManyHits { total: u64 },
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::NoTransactions => write!(f, "no transactions"),
            IgnoreReason::TooManyHits { total } => write!(f, "{} hits over ceiling", total),
        }
    }
}

/// Successful end of one wallet's harvest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// A merged artifact was written
    Harvested { records: usize, path: PathBuf },
    /// An ignored marker was written
    Ignored { reason: IgnoreReason },
}

//! Fetching auxiliary records and grouping them by the transaction they belong to.

use crate::schemas::{Hit, Query};
use crate::search::{ScrollOutcome, SearchClient, SearchError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Record {id} has no string field {field}")]
    MissingForeignKey { id: String, field: String },

    #[error("Auxiliary query matched {total} records, over the ceiling")]
    ResultSetTooLarge { total: u64 },
}

/// Auxiliary records grouped by the primary identifier they reference.
///
/// Each bucket keeps the order records arrived in. Built once and read-only
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinIndex {
    buckets: HashMap<String, Vec<Hit>>,
}

impl JoinIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Group `records` by `foreign_key`, dropping records that point outside `ids`.
    pub fn build(
        ids: &HashSet<&str>,
        records: Vec<Hit>,
        foreign_key: &str,
    ) -> Result<Self, JoinError> {
        let mut buckets: HashMap<String, Vec<Hit>> = HashMap::new();

        for record in records {
            let key = match record.foreign_key(foreign_key) {
                Some(key) => key.to_string(),
                None => {
                    return Err(JoinError::MissingForeignKey {
                        id: record.id,
                        field: foreign_key.to_string(),
                    })
                }
            };

            if !ids.contains(key.as_str()) {
                debug!("Record {} references unrequested {}, dropped", record.id, key);
                continue;
            }

            buckets.entry(key).or_default().push(record);
        }

        Ok(Self { buckets })
    }

    pub fn get(&self, id: &str) -> Option<&[Hit]> {
        self.buckets.get(id).map(Vec::as_slice)
    }

    /// Number of distinct primary identifiers with at least one record
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of records across all buckets
    pub fn record_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

/// Builds [`JoinIndex`]es through the shared search client
pub struct RelatedRecordJoiner {
    client: Arc<SearchClient>,
}

impl RelatedRecordJoiner {
    pub fn new(client: Arc<SearchClient>) -> Self {
        Self { client }
    }

    /// Fetch every record at `url` whose `foreign_key` is one of `ids` and
    /// group them by that key. An empty `ids` returns an empty index without
    /// touching the network.
    pub async fn build_index(
        &self,
        ids: &[String],
        url: &str,
        foreign_key: &str,
    ) -> Result<JoinIndex, JoinError> {
        if ids.is_empty() {
            return Ok(JoinIndex::empty());
        }

        let query = Query::terms(foreign_key, ids);
        let records = match self.client.scroll_all(url, &query).await? {
            ScrollOutcome::Complete(records) => records,
            ScrollOutcome::Skipped { total } => return Err(JoinError::ResultSetTooLarge { total }),
        };

        let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let index = JoinIndex::build(&requested, records, foreign_key)?;

        debug!(
            "Joined {} records onto {} of {} transactions from {}",
            index.record_count(),
            index.len(),
            ids.len(),
            url
        );

        Ok(index)
    }
}

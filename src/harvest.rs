//! Per-wallet harvest: fetch transactions, join their smart contract results
//! and logs, persist the merged list.

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::join::{JoinError, JoinIndex, RelatedRecordJoiner};
use crate::schemas::{HarvestOutcome, Hit, IgnoreReason, Query, ORIGINAL_TX_HASH};
use crate::search::{ScrollOutcome, SearchClient, SearchError, SearchIndex};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Join error: {0}")]
    Join(#[from] JoinError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Runs the whole fetch-join-persist cycle for one wallet at a time
pub struct EntityHarvester {
    client: Arc<SearchClient>,
    joiner: RelatedRecordJoiner,
    store: ArtifactStore,
}

impl EntityHarvester {
    pub fn new(client: Arc<SearchClient>, store: ArtifactStore) -> Self {
        let joiner = RelatedRecordJoiner::new(client.clone());
        Self {
            client,
            joiner,
            store,
        }
    }

    pub async fn harvest(&self, wallet: &str) -> Result<HarvestOutcome, HarvestError> {
        let url = self.client.search_url(SearchIndex::Transactions);
        let query = Query::wallet_transactions(wallet);

        let mut transactions = match self.client.scroll_all(&url, &query).await? {
            ScrollOutcome::Complete(hits) if !hits.is_empty() => hits,
            ScrollOutcome::Complete(_) => {
                return self.ignore(wallet, IgnoreReason::NoTransactions);
            }
            ScrollOutcome::Skipped { total } => {
                return self.ignore(wallet, IgnoreReason::TooManyHits { total });
            }
        };

        let ids: Vec<String> = transactions
            .iter()
            .filter(|tx| tx.has_related_data())
            .map(|tx| tx.id.clone())
            .collect();

        let (sc_results, logs) = if ids.is_empty() {
            (JoinIndex::empty(), JoinIndex::empty())
        } else {
            let sc_results = self
                .joiner
                .build_index(
                    &ids,
                    &self.client.search_url(SearchIndex::ScResults),
                    ORIGINAL_TX_HASH,
                )
                .await?;
            let logs = self
                .joiner
                .build_index(&ids, &self.client.search_url(SearchIndex::Logs), ORIGINAL_TX_HASH)
                .await?;
            (sc_results, logs)
        };

        debug!(
            "{}: {} transactions, {} with related data, {} sc results, {} logs",
            wallet,
            transactions.len(),
            ids.len(),
            sc_results.record_count(),
            logs.record_count()
        );

        merge_events(&mut transactions, &sc_results, &logs);

        let path = self.store.write_merged(wallet, &transactions)?;
        Ok(HarvestOutcome::Harvested {
            records: transactions.len(),
            path,
        })
    }

    fn ignore(&self, wallet: &str, reason: IgnoreReason) -> Result<HarvestOutcome, HarvestError> {
        self.store.write_ignored(wallet)?;
        info!("{} ignored: {}", wallet, reason);
        Ok(HarvestOutcome::Ignored { reason })
    }
}

/// Attach each transaction's smart contract results, then its logs, to
/// `_source.events`. Transaction order is left untouched.
pub fn merge_events(transactions: &mut [Hit], sc_results: &JoinIndex, logs: &JoinIndex) {
    for tx in transactions.iter_mut() {
        let related: Vec<Value> = sc_results
            .get(&tx.id)
            .into_iter()
            .chain(logs.get(&tx.id))
            .flatten()
            .cloned()
            .map(Value::from)
            .collect();
        tx.attach_events(related);
    }
}

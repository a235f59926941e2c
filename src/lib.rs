//! Wallet Harvester Library
//!
//! Bulk collection of every transaction a wallet took part in, from a
//! MultiversX-style search index, with the smart contract results and logs of
//! each transaction joined in.
//!
//! # Pipeline Stages
//!
//! 1. **Worklist** ([`orchestrator::discover_worklist`]): reads the wallet list, drops system
//!    addresses and wallets that already have an artifact
//! 2. **Harvest** ([`harvest::EntityHarvester`]): scrolls the wallet's transactions, joins
//!    smart contract results and logs ([`join`]), persists the merged list ([`artifacts`])
//! 3. **Run** ([`orchestrator::HarvestOrchestrator`]): fans wallets out over a bounded worker
//!    pool; every request shares one [`rate_limit::RateLimiter`]
//!
//! # Output Files
//!
//! - `<output_dir>/<wallet>.json`: transactions with `_source.events` attached
//! - `<output_dir>/ignored/<wallet>.txt`: marker for wallets with nothing to harvest
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wallet_harvester::artifacts::ArtifactStore;
//! use wallet_harvester::config::HarvesterConfig;
//! use wallet_harvester::harvest::EntityHarvester;
//! use wallet_harvester::search::SearchClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HarvesterConfig::load()?;
//!     let client = Arc::new(SearchClient::from_config(&config)?);
//!     let store = ArtifactStore::from_config(&config.paths);
//!     store.ensure_directories()?;
//!     let harvester = EntityHarvester::new(client, store);
//!     let outcome = harvester.harvest("erd1spyavw0956vq68xj8y4tenjpq2wd5a9p2c6j8gsz7ztyrnpxrruqzu66jx").await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod config;
pub mod harvest;
pub mod join;
pub mod orchestrator;
pub mod rate_limit;
pub mod schemas;
pub mod search;
pub mod wallet;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::HarvesterConfig;
pub use harvest::{EntityHarvester, HarvestError};
pub use orchestrator::{HarvestOrchestrator, RunReport};
pub use schemas::{HarvestOutcome, Hit};

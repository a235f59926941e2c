//! Worklist discovery and the bounded-concurrency harvest run.
//!
//! Wallets are dispatched one at a time as pool permits free up. Each wallet
//! runs in its own task, so an error or a panic only marks that wallet as
//! failed. A shutdown signal stops dispatch; wallets already in flight finish.

use crate::harvest::EntityHarvester;
use crate::schemas::HarvestOutcome;
use crate::wallet::{is_bech32_wallet, is_reserved, is_safe_identifier};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

// ============================================================================
// Worklist
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorklistOptions {
    pub reserved_prefix: String,
    pub shuffle: bool,
}

/// Wallets left to harvest, with the counts behind the filtering
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    pub wallets: Vec<String>,
    pub candidates: usize,
    pub already_processed: usize,
    pub reserved: usize,
    pub rejected: usize,
}

/// Read a newline-delimited wallet list; blank lines are skipped.
pub fn read_wallet_list(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Drop reserved addresses, already processed wallets, duplicates and
/// identifiers that cannot name a file. Shuffling only changes the order.
pub fn discover_worklist(
    candidates: Vec<String>,
    already_processed: &HashSet<String>,
    options: &WorklistOptions,
) -> Worklist {
    let mut worklist = Worklist {
        candidates: candidates.len(),
        ..Worklist::default()
    };

    worklist.already_processed = candidates
        .iter()
        .filter(|w| already_processed.contains(*w))
        .count();

    let percent = if worklist.candidates == 0 {
        0
    } else {
        (worklist.already_processed * 100 + worklist.candidates / 2) / worklist.candidates
    };
    info!(
        "Found {}/{} ({}%) wallets already processed",
        worklist.already_processed, worklist.candidates, percent
    );

    let mut seen = HashSet::new();
    let mut non_bech32 = 0usize;
    for wallet in candidates {
        if is_reserved(&wallet, &options.reserved_prefix) {
            worklist.reserved += 1;
            continue;
        }
        if already_processed.contains(&wallet) {
            continue;
        }
        if !is_safe_identifier(&wallet) {
            warn!("Skipping unusable wallet identifier {:?}", wallet);
            worklist.rejected += 1;
            continue;
        }
        if !seen.insert(wallet.clone()) {
            continue;
        }
        if !is_bech32_wallet(&wallet) {
            non_bech32 += 1;
        }
        worklist.wallets.push(wallet);
    }

    if non_bech32 > 0 {
        warn!("{} wallets are not bech32 addresses", non_bech32);
    }

    if options.shuffle {
        info!("Shuffling wallets");
        worklist.wallets.shuffle(&mut rand::thread_rng());
    }

    worklist
}

// ============================================================================
// Entity state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityState {
    Unprocessed,
    InFlight,
    Harvested { records: usize },
    Ignored,
    Failed { cause: String },
}

impl EntityState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityState::Harvested { .. } | EntityState::Ignored | EntityState::Failed { .. }
        )
    }
}

impl From<HarvestOutcome> for EntityState {
    fn from(outcome: HarvestOutcome) -> Self {
        match outcome {
            HarvestOutcome::Harvested { records, .. } => EntityState::Harvested { records },
            HarvestOutcome::Ignored { .. } => EntityState::Ignored,
        }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityState::Unprocessed => write!(f, "unprocessed"),
            EntityState::InFlight => write!(f, "in flight"),
            EntityState::Harvested { records } => write!(f, "harvested ({} transactions)", records),
            EntityState::Ignored => write!(f, "ignored"),
            EntityState::Failed { cause } => write!(f, "failed: {}", cause),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntity {
    pub wallet: String,
    pub cause: String,
}

/// Final state of every wallet handed to a run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    states: HashMap<String, EntityState>,
}

impl RunReport {
    fn new(wallets: &[String]) -> Self {
        Self {
            states: wallets
                .iter()
                .map(|w| (w.clone(), EntityState::Unprocessed))
                .collect(),
        }
    }

    fn dispatch(&mut self, wallet: &str) {
        self.states.insert(wallet.to_string(), EntityState::InFlight);
    }

    fn finish(&mut self, wallet: String, state: EntityState) {
        match self.states.get(&wallet) {
            Some(current) if current.is_terminal() => {
                warn!("{} already {}, ignoring {}", wallet, current, state);
            }
            _ => {
                self.states.insert(wallet, state);
            }
        }
    }

    pub fn state(&self, wallet: &str) -> Option<&EntityState> {
        self.states.get(wallet)
    }

    pub fn total(&self) -> usize {
        self.states.len()
    }

    pub fn harvested(&self) -> usize {
        self.count(|s| matches!(s, EntityState::Harvested { .. }))
    }

    pub fn ignored(&self) -> usize {
        self.count(|s| matches!(s, EntityState::Ignored))
    }

    /// Wallets never dispatched because of shutdown
    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, EntityState::Unprocessed))
    }

    /// Failed wallets sorted by identifier
    pub fn failed(&self) -> Vec<FailedEntity> {
        let mut failed: Vec<FailedEntity> = self
            .states
            .iter()
            .filter_map(|(wallet, state)| match state {
                EntityState::Failed { cause } => Some(FailedEntity {
                    wallet: wallet.clone(),
                    cause: cause.clone(),
                }),
                _ => None,
            })
            .collect();
        failed.sort_by(|a, b| a.wallet.cmp(&b.wallet));
        failed
    }

    fn count(&self, predicate: impl Fn(&EntityState) -> bool) -> usize {
        self.states.values().filter(|s| predicate(s)).count()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct HarvestOrchestrator {
    harvester: Arc<EntityHarvester>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
}

impl HarvestOrchestrator {
    pub fn new(harvester: Arc<EntityHarvester>, concurrency: usize) -> Self {
        let (_tx, shutdown) = watch::channel(false);
        Self {
            harvester,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    /// Stop dispatching new wallets once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn run(&self, worklist: Vec<String>) -> RunReport {
        let total = worklist.len();
        let mut report = RunReport::new(&worklist);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let progress = Arc::new(AtomicUsize::new(0));
        let mut tasks: JoinSet<(String, EntityState)> = JoinSet::new();
        let mut shutdown = self.shutdown.clone();
        let mut shutdown_open = true;
        let mut stopping = *shutdown.borrow_and_update();

        info!(
            "Harvesting {} wallets with {} workers",
            total, self.concurrency
        );

        for wallet in worklist {
            if stopping {
                break;
            }

            let permit = loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed(), if shutdown_open => match changed {
                        Ok(()) => {
                            if *shutdown.borrow_and_update() {
                                stopping = true;
                                break None;
                            }
                        }
                        Err(_) => shutdown_open = false,
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        record_joined(&mut report, joined);
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => break Some(permit),
                        Err(_) => break None,
                    },
                }
            };

            let Some(permit) = permit else {
                break;
            };

            report.dispatch(&wallet);

            let harvester = self.harvester.clone();
            let progress = progress.clone();
            tasks.spawn(async move {
                let _permit = permit;

                let target = wallet.clone();
                let state = match tokio::spawn(async move { harvester.harvest(&target).await }).await
                {
                    Ok(Ok(outcome)) => EntityState::from(outcome),
                    Ok(Err(e)) => EntityState::Failed {
                        cause: e.to_string(),
                    },
                    Err(e) => EntityState::Failed {
                        cause: format!("harvest task aborted: {}", e),
                    },
                };

                let done = progress.fetch_add(1, Ordering::SeqCst) + 1;
                match &state {
                    EntityState::Failed { .. } => warn!("[{}/{}] {} {}", done, total, wallet, state),
                    _ => info!("[{}/{}] {} {}", done, total, wallet, state),
                }

                (wallet, state)
            });
        }

        if stopping {
            info!(
                "Shutdown requested, waiting for {} in-flight wallets",
                tasks.len()
            );
        }

        while let Some(joined) = tasks.join_next().await {
            record_joined(&mut report, joined);
        }

        let failed = report.failed();
        info!(
            "Run complete: {} harvested, {} ignored, {} failed, {} not dispatched",
            report.harvested(),
            report.ignored(),
            failed.len(),
            report.cancelled()
        );
        for entity in &failed {
            warn!("Failed wallet {}: {}", entity.wallet, entity.cause);
        }

        report
    }
}

fn record_joined(
    report: &mut RunReport,
    joined: Result<(String, EntityState), tokio::task::JoinError>,
) {
    match joined {
        Ok((wallet, state)) => report.finish(wallet, state),
        // The outer task only awaits the inner one; it ends early only on runtime shutdown.
        Err(e) => warn!("Harvest worker ended abnormally: {}", e),
    }
}

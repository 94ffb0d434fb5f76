use crate::client::RedemptionClient;
use crate::models::Key;
use crate::network_client::NetworkError;
use crate::outcome::Outcome;
use crate::store::{persist_outcome, KeyStore, StoreError};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PAUSE_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum RunError {
    Network(NetworkError),
    Store(StoreError),
}

impl From<NetworkError> for RunError {
    fn from(err: NetworkError) -> Self {
        RunError::Network(err)
    }
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        RunError::Store(err)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Network(e) => write!(f, "{}", e),
            RunError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Network(e) => Some(e),
            RunError::Store(e) => Some(e),
        }
    }
}

/// How the run loop spaces out attempts.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Pause after this many attempted codes.
    pub batch_size: usize,
    pub batch_pause: Duration,
    /// Pause before retrying a rate-limited code.
    pub slowdown_pause: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            batch_size: 15,
            batch_pause: Duration::from_secs(60),
            slowdown_pause: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub redeemed: usize,
    pub expired: usize,
    /// The site asked to wait; remaining codes are left for the next run.
    pub try_later: bool,
    pub interrupted: bool,
}

/// Redeems stored records one at a time and writes the outcomes back.
pub struct Runner<'r, 'a> {
    client: &'r mut RedemptionClient<'a>,
    store: &'r mut dyn KeyStore,
    pacing: Pacing,
    stop: Arc<AtomicBool>,
}

impl<'r, 'a> Runner<'r, 'a> {
    pub fn new(client: &'r mut RedemptionClient<'a>, store: &'r mut dyn KeyStore) -> Self {
        Self {
            client,
            store,
            pacing: Pacing::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Flag checked between redemptions; setting it ends the run after the current code.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration` unless stopped first. Returns false when stopped.
    async fn pause(&self, duration: Duration) -> bool {
        let mut left = duration;
        while !left.is_zero() {
            if self.stopped() {
                return false;
            }
            let slice = left.min(PAUSE_SLICE);
            tokio::time::sleep(slice).await;
            left -= slice;
        }
        !self.stopped()
    }

    /// Redeems one record, retrying after a pause while the site rate-limits us, and
    /// persists the resulting flags.
    pub async fn redeem_one(&mut self, key: &mut Key) -> Result<Outcome, RunError> {
        loop {
            let outcome = self.client.redeem(key).await?;
            if outcome == Outcome::RateLimited {
                warn!("Too many requests. Waiting {:?} before retrying", self.pacing.slowdown_pause);
                if self.pause(self.pacing.slowdown_pause).await {
                    continue;
                }
            }
            persist_outcome(&mut *self.store, key, &outcome)?;
            info!("  {}", outcome.message(Some(&*key)));
            return Ok(outcome);
        }
    }

    /// Works through `keys` in order, honouring the batch pause and stopping on TryLater.
    pub async fn run(&mut self, keys: Vec<Key>) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        info!("Trying to redeem now.");

        for (num, mut key) in keys.into_iter().enumerate() {
            if self.stopped() {
                summary.interrupted = true;
                break;
            }
            if num > 0 && self.pacing.batch_size > 0 && num % self.pacing.batch_size == 0 {
                info!("Trying to prevent a 'too many requests'-block.");
                if !self.pause(self.pacing.batch_pause).await {
                    summary.interrupted = true;
                    break;
                }
            }

            let outcome = match self.redeem_one(&mut key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Redeeming {} failed: {}", key.code, e);
                    return Err(e);
                }
            };
            summary.attempted += 1;
            if outcome.marks_redeemed() {
                summary.redeemed += 1;
            }
            if outcome.marks_expired() {
                summary.expired += 1;
            }
            if outcome == Outcome::TryLater {
                summary.try_later = true;
                break;
            }
        }

        if !summary.try_later && !summary.interrupted {
            info!("No more keys left!");
        }
        Ok(summary)
    }
}

/// Inserts new records, ignoring ones already stored. Returns how many were new.
pub fn import_keys<S: KeyStore + ?Sized>(store: &mut S, keys: Vec<Key>) -> Result<usize, StoreError> {
    let mut added = 0;
    for key in keys {
        if store.create(key)? {
            added += 1;
        }
    }
    Ok(added)
}

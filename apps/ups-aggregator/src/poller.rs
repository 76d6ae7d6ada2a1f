use crate::error::{CycleError, FetchError};
use crate::powerpanel::{EquipmentNode, PowerPanelClient, SessionManager};
use crate::readings::extract_readings;
use crate::store::{write_batch, BatchAck, ReadingStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub nodes: usize,
    pub readings: usize,
    pub ack: BatchAck,
}

/// Polls the PowerPanel tree on a fixed interval and writes UPS readings to the store.
///
/// A poller runs at most once: [`Poller::start`] consumes it, and a stopped
/// loop cannot be resumed.
pub struct Poller<S> {
    client: PowerPanelClient,
    session: Arc<SessionManager>,
    store: S,
    interval: Duration,
    state: watch::Sender<PollerState>,
}

impl<S> Poller<S>
where
    S: ReadingStore + 'static,
{
    pub fn new(
        client: PowerPanelClient,
        session: Arc<SessionManager>,
        store: S,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            client,
            session,
            store,
            interval,
            state,
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn start(self, cancel: CancellationToken) -> PollerHandle {
        self.state.send_replace(PollerState::Running);
        let state = self.state.subscribe();
        let join = tokio::spawn(async move { self.run(cancel).await });
        PollerHandle { state, join }
    }

    async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "starting aggregator");
        // First cycle runs one full interval after start.
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("stopping aggregator");
                    break;
                }
                _ = ticker.tick() => {
                    let tick = Utc::now();
                    let span = tracing::info_span!("poll_cycle", tick = %tick);
                    match self.poll_once(tick).instrument(span).await {
                        Ok(outcome) => tracing::info!(
                            nodes = outcome.nodes,
                            readings = outcome.readings,
                            written = outcome.ack.written,
                            dropped = outcome.ack.dropped,
                            "poll cycle complete"
                        ),
                        Err(err) => tracing::error!(
                            stage = err.stage(),
                            error = %err,
                            "poll cycle failed; waiting for next tick"
                        ),
                    }
                }
            }
        }

        self.state.send_replace(PollerState::Stopped);
    }

    /// Runs one authenticate, fetch, extract, write pass stamped with `tick`.
    pub async fn poll_once(&self, tick: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        let nodes = self.fetch_tree().await?;
        let readings = extract_readings(&nodes, tick);
        let ack = write_batch(&self.store, &readings).await?;
        Ok(CycleOutcome {
            nodes: nodes.len(),
            readings: readings.len(),
            ack,
        })
    }

    async fn fetch_tree(&self) -> Result<Vec<EquipmentNode>, CycleError> {
        let token = self.session.ensure_valid_token().await?;
        match self.client.fetch_management_tree(&token).await {
            Ok(nodes) => Ok(nodes),
            Err(FetchError::Unauthorized(status)) => {
                tracing::warn!(status = %status, "management tree rejected token; retrying once");
                let token = self.session.force_refresh(&token).await?;
                Ok(self.client.fetch_management_tree(&token).await?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

pub struct PollerHandle {
    state: watch::Receiver<PollerState>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Waits for the loop to exit and returns its final state.
    pub async fn join(self) -> Result<PollerState, JoinError> {
        self.join.await?;
        let state = *self.state.borrow();
        Ok(state)
    }
}

//! Connection search
//!
//! A search tries to fill every free channel with a connected peer. Each slot
//! runs `acquire → configure → open` on the blocking pool, independently of
//! the others. Once every slot has been set up, one deadline is armed for the
//! whole batch. Slots that connect before it are reported and registered
//! right away; slots still searching when it passes are closed and released.
//! [`SearchCoordinator::cancel`] ends a running batch early, closing every
//! slot that has not connected yet.
//!
//! # Example
//!
//! ```rust,ignore
//! let coordinator = Arc::new(SearchCoordinator::new(pool, registry, config, event_tx));
//! if let Some(search) = coordinator.start_search() {
//!     let summary = search.await?;
//!     println!("{} connected", summary.connected);
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ant_protocol::{ChannelHandle, MessageFromAnt};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::{CloseReason, EventSender, LinkEvent, SearchSummary};
use crate::link::{run_event_pump, ChannelLink, LinkState, LinkUpdate, UpdateSender};
use crate::pool::ChannelResourcePool;
use crate::registry::LinkRegistry;

type OpenedSlot = (Arc<ChannelLink>, mpsc::UnboundedReceiver<MessageFromAnt>);

/// Runs search batches, one at a time
pub struct SearchCoordinator {
    pool: Arc<ChannelResourcePool>,
    registry: Arc<LinkRegistry>,
    config: LinkConfig,
    events: EventSender,
    in_progress: watch::Sender<bool>,
    cancelled: watch::Sender<bool>,
}

/// Resolves once `flag` reads true
async fn raised(flag: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the wait
    let _ = flag.wait_for(|raised| *raised).await;
}

impl SearchCoordinator {
    /// Create a coordinator that registers connected links in `registry`
    pub fn new(
        pool: Arc<ChannelResourcePool>,
        registry: Arc<LinkRegistry>,
        config: LinkConfig,
        events: EventSender,
    ) -> Self {
        Self {
            pool,
            registry,
            config,
            events,
            in_progress: watch::Sender::new(false),
            cancelled: watch::Sender::new(false),
        }
    }

    /// Whether a search is running
    pub fn is_searching(&self) -> bool {
        *self.in_progress.borrow()
    }

    /// Stop the running search and refuse new ones
    ///
    /// Slots that have not connected are closed with
    /// [`CloseReason::Shutdown`]. Returns once the running search, if any,
    /// has emitted `SearchFinished`.
    pub async fn cancel(&self) {
        self.cancelled.send_replace(true);
        let mut running = self.in_progress.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    /// Start a search batch
    ///
    /// Returns `None` if a search is already running or the coordinator has
    /// been cancelled. The returned task resolves once `SearchFinished` has
    /// been emitted.
    pub fn start_search(self: &Arc<Self>) -> Option<JoinHandle<SearchSummary>> {
        if *self.cancelled.borrow() {
            debug!("Search cancelled, not starting");
            return None;
        }
        let started = self.in_progress.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            true
        });
        if !started {
            debug!("Search already in progress");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.emit(LinkEvent::SearchStarted);
            let summary = this.run().await;
            info!(
                "Search finished: {} connected, {} timed out, {} failed, {} cancelled",
                summary.connected, summary.timed_out, summary.failed, summary.cancelled
            );
            this.emit(LinkEvent::SearchFinished { summary });
            this.in_progress.send_replace(false);
            summary
        }))
    }

    async fn run(&self) -> SearchSummary {
        let mut summary = SearchSummary::default();
        let mut cancelled = self.cancelled.subscribe();

        let pool = Arc::clone(&self.pool);
        let available = match tokio::task::spawn_blocking(move || pool.available_count()).await {
            Ok(Ok(count)) => count,
            Ok(Err(err)) => {
                self.report_error(&err);
                return summary;
            }
            Err(err) => {
                error!("Channel count task failed: {}", err);
                return summary;
            }
        };
        summary.available = available;

        if available == 0 {
            info!("No channels available");
            self.emit(LinkEvent::NoChannelsAvailable);
            return summary;
        }
        info!("Searching on {} channels", available);

        let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
        let mut pending = self.open_slots(available, outcome_tx, &mut summary).await;

        let deadline = Instant::now() + self.config.search_timeout();
        while !pending.is_empty() {
            tokio::select! {
                biased;

                update = outcomes.recv() => match update {
                    Some(LinkUpdate::Connected { handle }) => {
                        if let Some(link) = pending.remove(&handle) {
                            self.promote(link, &mut summary).await;
                        }
                    }
                    Some(LinkUpdate::Closed { handle, reason }) => {
                        if pending.remove(&handle).is_some() {
                            debug!("{} closed while searching: {}", handle, reason);
                            match reason {
                                CloseReason::SearchTimedOut => summary.timed_out += 1,
                                _ => summary.failed += 1,
                            }
                        }
                    }
                    Some(LinkUpdate::Value { .. }) => {}
                    None => break,
                },

                _ = raised(&mut cancelled) => {
                    info!("Search cancelled with {} slots pending", pending.len());
                    for (_, link) in pending.drain() {
                        link.close(CloseReason::Shutdown);
                        summary.cancelled += 1;
                    }
                }

                _ = sleep_until(deadline) => {
                    debug!("Search window closed with {} slots pending", pending.len());
                    for (_, link) in pending.drain() {
                        if link.expire_search() {
                            summary.timed_out += 1;
                        } else if link.state() == LinkState::Connected {
                            self.promote(link, &mut summary).await;
                        } else if link.close_reason() == Some(CloseReason::SearchTimedOut) {
                            summary.timed_out += 1;
                        } else {
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        summary
    }

    /// Set up every slot and start their event pumps
    async fn open_slots(
        &self,
        count: usize,
        outcome_tx: UpdateSender,
        summary: &mut SearchSummary,
    ) -> HashMap<ChannelHandle, Arc<ChannelLink>> {
        let mut slots = JoinSet::new();
        for _ in 0..count {
            let pool = Arc::clone(&self.pool);
            let config = self.config.clone();
            let outcome_tx = outcome_tx.clone();
            slots.spawn_blocking(move || open_slot(pool, config, outcome_tx));
        }
        drop(outcome_tx);

        let mut pending = HashMap::new();
        while let Some(result) = slots.join_next().await {
            match result {
                Ok(Ok((link, events))) => {
                    tokio::spawn(run_event_pump(Arc::clone(&link), events));
                    pending.insert(link.handle(), link);
                }
                Ok(Err(err)) => {
                    summary.failed += 1;
                    self.report_slot_error(&err);
                }
                Err(err) => {
                    summary.failed += 1;
                    error!("Search slot task failed: {}", err);
                }
            }
        }
        pending
    }

    async fn promote(&self, link: Arc<ChannelLink>, summary: &mut SearchSummary) {
        let handle = link.handle();
        summary.connected += 1;
        self.emit(LinkEvent::LinkConnected { handle });

        let registry = Arc::clone(&self.registry);
        let candidate = Arc::clone(&link);
        let added = tokio::task::spawn_blocking(move || registry.add(candidate))
            .await
            .unwrap_or(false);
        if !added {
            warn!("{} connected but could not be registered", handle);
            link.close(CloseReason::Evicted);
        }
    }

    fn report_slot_error(&self, err: &LinkError) {
        match err {
            LinkError::NoChannelAvailable => debug!("Search slot found no free channel"),
            LinkError::Transport(_) => self.report_error(err),
            LinkError::ConfigurationRejected(_) | LinkError::InvalidState { .. } => {
                error!("Search slot failed: {}", err)
            }
            LinkError::NoSuchLink(_) => debug!("Search slot failed: {}", err),
        }
    }

    fn report_error(&self, err: &LinkError) {
        warn!("Search failed: {}", err);
        self.emit(LinkEvent::Error {
            source: "Search".to_string(),
            message: err.to_string(),
        });
    }
}

impl std::fmt::Debug for SearchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("in_progress", &self.is_searching())
            .finish_non_exhaustive()
    }
}

/// Acquire, configure and open one channel
///
/// Any failure leaves the slot's handle released.
fn open_slot(
    pool: Arc<ChannelResourcePool>,
    config: LinkConfig,
    outcome_tx: UpdateSender,
) -> Result<OpenedSlot, LinkError> {
    let handle = pool.acquire()?;
    let link = Arc::new(ChannelLink::new(pool, handle, config));
    link.add_listener(outcome_tx);
    link.configure()?;

    let (sink, events) = mpsc::unbounded_channel();
    link.open(sink)?;
    Ok((link, events))
}

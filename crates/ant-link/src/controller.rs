//! Link controller
//!
//! Owns the pool, registry and search coordinator for one radio service and
//! exposes the operations a front end needs. Every call that reaches the
//! radio runs on the blocking pool; results and state changes come back on
//! the event channel returned by [`LinkController::new`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ant_link::{LinkConfig, LinkController, LinkEvent};
//! use ant_sim::SimulatedRadio;
//!
//! # async fn demo() {
//! let radio = Arc::new(SimulatedRadio::default());
//! let (controller, mut events) = LinkController::new(radio, LinkConfig::default());
//!
//! controller.start_search();
//! while let Some(event) = events.recv().await {
//!     if let LinkEvent::SearchFinished { summary } = event {
//!         println!("{} lights connected", summary.connected);
//!         break;
//!     }
//! }
//! controller.shutdown().await;
//! # }
//! ```

use std::sync::Arc;

use ant_protocol::codec::{encode_absolute, encode_relative};
use ant_protocol::{ChannelHandle, Intensity, RadioService, Reading, ServiceError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::{CloseReason, EventSender, LinkEvent, SearchSummary};
use crate::link::ChannelLink;
use crate::pool::ChannelResourcePool;
use crate::registry::LinkRegistry;
use crate::search::SearchCoordinator;

/// A registered link as seen from the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Position in the list
    pub index: usize,
    /// Channel handle
    pub handle: ChannelHandle,
    /// Last known value
    pub reading: Reading,
}

/// Front-end facing owner of every link on one radio service
pub struct LinkController {
    config: LinkConfig,
    pool: Arc<ChannelResourcePool>,
    registry: Arc<LinkRegistry>,
    coordinator: Arc<SearchCoordinator>,
    events: EventSender,
    registry_task: JoinHandle<()>,
}

impl LinkController {
    /// Create a controller and its event stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        service: Arc<dyn RadioService>,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(ChannelResourcePool::new(service));
        let (registry, updates) = LinkRegistry::new(events.clone());
        let registry = Arc::new(registry);
        let registry_task = tokio::spawn(Arc::clone(&registry).run(updates));
        let coordinator = Arc::new(SearchCoordinator::new(
            Arc::clone(&pool),
            Arc::clone(&registry),
            config.clone(),
            events.clone(),
        ));

        let controller = Self {
            config,
            pool,
            registry,
            coordinator,
            events,
            registry_task,
        };
        (controller, event_rx)
    }

    /// Active configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Channel pool
    pub fn pool(&self) -> &Arc<ChannelResourcePool> {
        &self.pool
    }

    /// Registered links
    pub fn registry(&self) -> &Arc<LinkRegistry> {
        &self.registry
    }

    /// Start a search batch, unless one is already running
    pub fn start_search(&self) -> Option<JoinHandle<SearchSummary>> {
        self.coordinator.start_search()
    }

    /// Whether a search is running
    pub fn is_searching(&self) -> bool {
        self.coordinator.is_searching()
    }

    /// Last known value of every registered link
    pub fn values(&self) -> Vec<Reading> {
        self.registry.current_values()
    }

    /// Look up the link at a list position
    pub fn selection(&self, index: usize) -> Option<Selection> {
        let link = self.registry.link_at(index)?;
        let reading = self.registry.reading_at(index)?;
        Some(Selection {
            index,
            handle: link.handle(),
            reading,
        })
    }

    async fn on_link<F>(&self, index: usize, op: F) -> Result<(), LinkError>
    where
        F: FnOnce(&ChannelLink) -> Result<(), LinkError> + Send + 'static,
    {
        let link = self
            .registry
            .link_at(index)
            .ok_or(LinkError::NoSuchLink(index))?;

        let result = tokio::task::spawn_blocking(move || op(link.as_ref()))
            .await
            .unwrap_or_else(|err| {
                Err(LinkError::Transport(ServiceError::Remote(format!(
                    "link task failed: {}",
                    err
                ))))
            });

        if let Err(err) = &result {
            if err.is_user_visible() {
                let _ = self.events.send(LinkEvent::Error {
                    source: "Link".to_string(),
                    message: err.to_string(),
                });
            }
        }
        result
    }

    /// Set a light's intensity with an acknowledged message
    pub async fn set_intensity(&self, index: usize, value: Intensity) -> Result<(), LinkError> {
        debug!("Setting link {} to {}", index, value.get());
        let frame = encode_absolute(value);
        self.on_link(index, move |link| link.send_acknowledged_value(&frame))
            .await
    }

    /// Set a light's intensity through the broadcast data
    pub async fn broadcast_intensity(
        &self,
        index: usize,
        value: Intensity,
    ) -> Result<(), LinkError> {
        debug!("Broadcasting {} to link {}", value.get(), index);
        let frame = encode_absolute(value);
        self.on_link(index, move |link| link.set_broadcast_value(&frame))
            .await
    }

    /// Move a light to `target` relative to its last reported value
    ///
    /// Falls back to an absolute set when the light has not reported a value.
    pub async fn step_intensity(&self, index: usize, target: Intensity) -> Result<(), LinkError> {
        let frame = match self.registry.reading_at(index) {
            Some(Reading::Known(current)) => encode_relative(Intensity::saturating(current), target),
            Some(Reading::Unknown) => {
                debug!("Link {} has no known value, setting absolute", index);
                encode_absolute(target)
            }
            None => return Err(LinkError::NoSuchLink(index)),
        };
        self.on_link(index, move |link| link.send_acknowledged_value(&frame))
            .await
    }

    /// Evict links whose channel is gone, returning how many were removed
    pub async fn validate(&self) -> usize {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || registry.validate())
            .await
            .unwrap_or_else(|err| {
                warn!("Validation task failed: {}", err);
                0
            })
    }

    /// Stop receiving radio messages for every link
    pub async fn suspend(&self) {
        let registry = Arc::clone(&self.registry);
        if let Err(err) = tokio::task::spawn_blocking(move || registry.suspend_all()).await {
            warn!("Suspend task failed: {}", err);
        }
    }

    /// Resume receiving radio messages for every link
    pub async fn resume(&self) {
        let registry = Arc::clone(&self.registry);
        if let Err(err) = tokio::task::spawn_blocking(move || registry.resume_all()).await {
            warn!("Resume task failed: {}", err);
        }
    }

    /// Cancel any running search, close every link and stop the registry
    pub async fn shutdown(self) {
        self.coordinator.cancel().await;
        info!("Shutting down {} links", self.registry.len());
        let registry = Arc::clone(&self.registry);
        if let Err(err) =
            tokio::task::spawn_blocking(move || registry.close_all(CloseReason::Shutdown)).await
        {
            warn!("Shutdown task failed: {}", err);
        }
        self.registry_task.abort();
    }
}

impl std::fmt::Debug for LinkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkController")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

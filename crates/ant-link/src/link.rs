//! Channel link state machine
//!
//! A [`ChannelLink`] owns one acquired channel from the moment it is handed
//! out by the pool until it is released. It configures and opens the channel,
//! consumes the radio's messages for it, tracks liveness, and tells its
//! listeners when it connects, when the peer's value changes and when it
//! closes.
//!
//! ```text
//! Acquired ──configure──▶ Configured ──open──▶ Searching ──data──▶ Connected
//!     │                       │                   │                   │
//!     └───────────────────────┴───── failure / timeout / close ──────┴──▶ Closed
//! ```
//!
//! All state lives behind one mutex per link. Service calls are made without
//! holding it, so messages for the link can be processed while a command is in
//! flight. Whichever transition takes the lock first wins: a search timer that
//! fires after the link connected finds it `Connected` and does nothing.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use ant_protocol::codec::{decode_value, is_update_frame};
use ant_protocol::{
    ChannelHandle, EventCode, EventSink, Frame, MessageFromAnt, Reading, UnknownValue,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::{CloseMode, LinkConfig};
use crate::error::LinkError;
use crate::events::CloseReason;
use crate::pool::ChannelResourcePool;

/// Lifecycle state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Channel acquired, nothing applied yet
    Acquired,
    /// Parameters applied
    Configured,
    /// Open and looking for a peer
    Searching,
    /// Receiving data from a peer
    Connected,
    /// Handle released; terminal
    Closed,
}

impl LinkState {
    /// Whether the channel is open on the radio
    pub fn is_open(self) -> bool {
        matches!(self, LinkState::Searching | LinkState::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkState::Acquired => "acquired",
            LinkState::Configured => "configured",
            LinkState::Searching => "searching",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// Notifications sent to a link's listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUpdate {
    /// The first broadcast from a peer arrived
    Connected {
        /// Link handle
        handle: ChannelHandle,
    },
    /// The peer reported a new intensity value
    Value {
        /// Link handle
        handle: ChannelHandle,
        /// Reported value
        value: u8,
    },
    /// The link closed and its handle was released
    Closed {
        /// Link handle
        handle: ChannelHandle,
        /// Why it closed
        reason: CloseReason,
    },
}

impl LinkUpdate {
    /// Handle of the link that sent this update
    pub fn handle(&self) -> ChannelHandle {
        match self {
            LinkUpdate::Connected { handle }
            | LinkUpdate::Value { handle, .. }
            | LinkUpdate::Closed { handle, .. } => *handle,
        }
    }
}

/// Sender half of a listener channel
pub type UpdateSender = mpsc::UnboundedSender<LinkUpdate>;

#[derive(Debug)]
struct LinkInner {
    state: LinkState,
    rx_failures: u32,
    last_payload: Option<Frame>,
    reading: Reading,
    close_reason: Option<CloseReason>,
    /// Installed sink, kept so the link can be resumed after a suspend
    sink: Option<EventSink>,
    listeners: Vec<UpdateSender>,
}

impl LinkInner {
    fn notify(&mut self, update: LinkUpdate) {
        self.listeners.retain(|tx| tx.send(update).is_ok());
    }

    /// Mark the link closed, returning the state it left
    fn begin_close(&mut self, reason: CloseReason) -> Option<LinkState> {
        if self.state == LinkState::Closed {
            return None;
        }
        let previous = self.state;
        self.state = LinkState::Closed;
        self.close_reason = Some(reason);
        self.sink = None;
        Some(previous)
    }
}

/// One acquired channel and the connection running over it
pub struct ChannelLink {
    handle: ChannelHandle,
    pool: Arc<ChannelResourcePool>,
    config: LinkConfig,
    inner: Mutex<LinkInner>,
}

impl ChannelLink {
    /// Wrap a freshly acquired handle
    pub fn new(pool: Arc<ChannelResourcePool>, handle: ChannelHandle, config: LinkConfig) -> Self {
        Self {
            handle,
            pool,
            config,
            inner: Mutex::new(LinkInner {
                state: LinkState::Acquired,
                rx_failures: 0,
                last_payload: None,
                reading: Reading::Unknown,
                close_reason: None,
                sink: None,
                listeners: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Channel handle owned by this link
    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    /// Last known value reported by the peer
    pub fn reading(&self) -> Reading {
        self.lock().reading
    }

    /// Why the link closed, once it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock().close_reason
    }

    /// Current run of consecutive receive failures
    pub fn rx_failures(&self) -> u32 {
        self.lock().rx_failures
    }

    /// Subscribe to this link's updates
    ///
    /// Listeners whose receiver has been dropped are pruned on the next
    /// update.
    pub fn add_listener(&self, tx: UpdateSender) {
        self.lock().listeners.push(tx);
    }

    /// Number of subscribed listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn require_state(&self, expected: LinkState, operation: &'static str) -> Result<(), LinkError> {
        let state = self.state();
        if state != expected {
            return Err(LinkError::InvalidState { operation, state });
        }
        Ok(())
    }

    /// Apply the channel parameters
    ///
    /// On failure the link closes and its handle is released.
    pub fn configure(&self) -> Result<(), LinkError> {
        self.require_state(LinkState::Acquired, "configure")?;

        if let Err(err) = self
            .pool
            .service()
            .configure(self.handle, &self.config.channel)
        {
            let err = LinkError::from_configure(err);
            match &err {
                LinkError::ConfigurationRejected(_) => {
                    error!("{}: {}", self.handle, err)
                }
                _ => warn!("Failed to configure {}: {}", self.handle, err),
            }
            self.close(CloseReason::ConfigureFailed);
            return Err(err);
        }

        let mut inner = self.lock();
        if inner.state == LinkState::Acquired {
            inner.state = LinkState::Configured;
        }
        debug!(
            "{} configured: device type {}, {} MHz, {:.2} Hz",
            self.handle,
            self.config.channel.device_type(),
            self.config.channel.frequency_mhz(),
            self.config.channel.message_rate_hz()
        );
        Ok(())
    }

    /// Install the event sink and open the channel
    ///
    /// The link is `Searching` once this returns. The search deadline is
    /// owned by the caller, which calls [`expire_search`](Self::expire_search)
    /// when it passes. On failure the link closes and its handle is released.
    pub fn open(&self, sink: EventSink) -> Result<(), LinkError> {
        self.require_state(LinkState::Configured, "open")?;
        let service = self.pool.service();

        if let Err(err) = service.set_event_sink(self.handle, Some(sink.clone())) {
            warn!("Failed to install event sink on {}: {}", self.handle, err);
            self.close(CloseReason::OpenFailed);
            return Err(LinkError::Transport(err));
        }

        let state = {
            let mut inner = self.lock();
            if inner.state == LinkState::Configured {
                inner.sink = Some(sink);
                inner.state = LinkState::Searching;
            }
            inner.state
        };
        if state != LinkState::Searching {
            // Closed while the sink was being installed
            if let Err(err) = service.set_event_sink(self.handle, None) {
                debug!("Failed to clear event sink on {}: {}", self.handle, err);
            }
            return Err(LinkError::InvalidState {
                operation: "open",
                state,
            });
        }

        if let Err(err) = service.open(self.handle) {
            warn!("Failed to open {}: {}", self.handle, err);
            self.close(CloseReason::OpenFailed);
            return Err(LinkError::Transport(err));
        }

        debug!("{} searching", self.handle);
        Ok(())
    }

    /// Process one message the radio delivered for this channel
    pub fn handle_message(&self, msg: MessageFromAnt) {
        let mut inner = self.lock();
        if !inner.state.is_open() {
            trace!("{} ignoring {:?} while {}", self.handle, msg, inner.state);
            return;
        }

        let close = match msg {
            MessageFromAnt::BroadcastData(frame) => {
                self.on_data(&mut inner, frame, true);
                None
            }
            MessageFromAnt::AcknowledgedData(frame) => {
                self.on_data(&mut inner, frame, false);
                None
            }
            MessageFromAnt::ChannelEvent(EventCode::RxFail) => {
                inner.rx_failures += 1;
                debug!(
                    "{} receive failure {}/{}",
                    self.handle,
                    inner.rx_failures,
                    self.config.rx_fail_threshold()
                );
                (inner.rx_failures >= self.config.rx_fail_threshold())
                    .then_some(CloseReason::ReceiveFailures)
            }
            MessageFromAnt::ChannelEvent(EventCode::RxSearchTimeout)
                if inner.state == LinkState::Searching =>
            {
                Some(CloseReason::SearchTimedOut)
            }
            MessageFromAnt::ChannelEvent(EventCode::ChannelClosed) => {
                Some(CloseReason::ClosedByRadio)
            }
            MessageFromAnt::ChannelEvent(code) => {
                trace!("{} event {:?}", self.handle, code);
                None
            }
            MessageFromAnt::ChannelDeath => Some(CloseReason::ChannelDeath),
        };

        if let Some(reason) = close {
            if let Some(previous) = inner.begin_close(reason) {
                drop(inner);
                self.finish_close(previous, reason);
            }
        }
    }

    fn on_data(&self, inner: &mut LinkInner, frame: Frame, broadcast: bool) {
        inner.rx_failures = 0;

        if inner.state == LinkState::Searching {
            if !broadcast {
                trace!("{} ignoring acknowledged data while searching", self.handle);
                return;
            }
            inner.state = LinkState::Connected;
            info!("{} connected", self.handle);
            inner.notify(LinkUpdate::Connected {
                handle: self.handle,
            });
        }

        if inner.last_payload == Some(frame) {
            return;
        }
        inner.last_payload = Some(frame);

        if !is_update_frame(frame.as_ref()) {
            trace!("{} ignoring page 0x{:02X}", self.handle, frame.page());
            return;
        }

        match decode_value(frame.as_ref()) {
            Err(UnknownValue) => debug!("{} reports unknown value", self.handle),
            Ok(value) if inner.reading != Reading::Known(value) => {
                inner.reading = Reading::Known(value);
                inner.notify(LinkUpdate::Value {
                    handle: self.handle,
                    value,
                });
            }
            Ok(_) => {}
        }
    }

    /// Search deadline handler
    ///
    /// Closes and releases the link if it is still searching and returns
    /// true. In any other state this does nothing and returns false.
    pub fn expire_search(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != LinkState::Searching {
            return false;
        }
        let Some(previous) = inner.begin_close(CloseReason::SearchTimedOut) else {
            return false;
        };
        drop(inner);
        debug!("{} search timed out", self.handle);
        self.finish_close(previous, CloseReason::SearchTimedOut);
        true
    }

    /// Close the link and release its handle
    ///
    /// Safe to call in any state and any number of times; only the first
    /// call has an effect. Service errors are logged.
    pub fn close(&self, reason: CloseReason) {
        let previous = self.lock().begin_close(reason);
        if let Some(previous) = previous {
            self.finish_close(previous, reason);
        }
    }

    fn finish_close(&self, previous: LinkState, reason: CloseReason) {
        let service = self.pool.service();
        let radio_gone = matches!(
            reason,
            CloseReason::ClosedByRadio | CloseReason::ChannelDeath
        );

        if self.config.close_mode == CloseMode::Hard && previous.is_open() && !radio_gone {
            if let Err(err) = service.close(self.handle) {
                warn!("Failed to close {}: {}", self.handle, err);
            }
        }
        if !radio_gone {
            if let Err(err) = service.set_event_sink(self.handle, None) {
                warn!("Failed to clear event sink on {}: {}", self.handle, err);
            }
        }
        self.pool.release(self.handle);

        info!("{} closed: {}", self.handle, reason);
        self.lock().notify(LinkUpdate::Closed {
            handle: self.handle,
            reason,
        });
    }

    /// Set the data broadcast to the peer every channel period
    pub fn set_broadcast_value(&self, frame: &Frame) -> Result<(), LinkError> {
        self.require_state(LinkState::Connected, "set broadcast data")?;
        self.pool
            .service()
            .send_broadcast(self.handle, frame)
            .map_err(|err| {
                warn!("Failed to set broadcast data on {}: {}", self.handle, err);
                LinkError::Transport(err)
            })
    }

    /// Send data the peer must acknowledge
    pub fn send_acknowledged_value(&self, frame: &Frame) -> Result<(), LinkError> {
        self.require_state(LinkState::Connected, "send acknowledged data")?;
        self.pool
            .service()
            .send_acknowledged(self.handle, frame)
            .map_err(|err| {
                warn!("Failed to send acknowledged data on {}: {}", self.handle, err);
                LinkError::Transport(err)
            })
    }

    /// Ask the radio whether the channel still exists
    ///
    /// Any error counts as not alive.
    pub fn is_alive(&self) -> bool {
        if self.state() == LinkState::Closed {
            return false;
        }
        match self.pool.service().request_status(self.handle) {
            Ok(state) => state.is_alive(),
            Err(err) => {
                debug!("Status request for {} failed: {}", self.handle, err);
                false
            }
        }
    }

    /// Stop receiving messages without closing the channel
    pub fn suspend(&self) -> Result<(), LinkError> {
        if !self.state().is_open() {
            return Ok(());
        }
        self.pool
            .service()
            .set_event_sink(self.handle, None)
            .map_err(LinkError::Transport)
    }

    /// Reinstall the event sink removed by [`suspend`](Self::suspend)
    pub fn resume(&self) -> Result<(), LinkError> {
        let sink = {
            let inner = self.lock();
            if !inner.state.is_open() {
                return Ok(());
            }
            inner.sink.clone()
        };
        match sink {
            Some(sink) => self
                .pool
                .service()
                .set_event_sink(self.handle, Some(sink))
                .map_err(LinkError::Transport),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ChannelLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ChannelLink")
            .field("handle", &self.handle)
            .field("state", &inner.state)
            .field("reading", &inner.reading)
            .finish_non_exhaustive()
    }
}

/// Feed a link the messages arriving on its event sink
///
/// Runs until the link closes or the sender side is dropped.
pub async fn run_event_pump(
    link: Arc<ChannelLink>,
    mut events: mpsc::UnboundedReceiver<MessageFromAnt>,
) {
    while let Some(msg) = events.recv().await {
        link.handle_message(msg);
        if link.state() == LinkState::Closed {
            break;
        }
    }
    debug!("Event pump for {} stopped", link.handle());
}

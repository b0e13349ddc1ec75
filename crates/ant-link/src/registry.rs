//! Registry of connected links
//!
//! The registry is the list the observer renders: every connected link in
//! the order it connected, each with the last value its peer reported. Links
//! report to the registry through the update channel handed out by
//! [`LinkRegistry::new`]; [`LinkRegistry::run`] drains it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ant_protocol::{ChannelHandle, Reading};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{CloseReason, EventSender, LinkEvent};
use crate::link::{ChannelLink, LinkState, LinkUpdate, UpdateSender};

struct Entry {
    link: Arc<ChannelLink>,
    reading: Reading,
}

/// Ordered set of live links and their last known values
pub struct LinkRegistry {
    entries: Mutex<Vec<Entry>>,
    /// Set by `close_all` while holding the entries lock
    closed: AtomicBool,
    updates: UpdateSender,
    events: EventSender,
}

impl LinkRegistry {
    /// Create an empty registry
    ///
    /// The returned receiver carries the updates of every registered link and
    /// must be passed to [`run`](Self::run).
    pub fn new(events: EventSender) -> (Self, mpsc::UnboundedReceiver<LinkUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let registry = Self {
            entries: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            updates,
            events,
        };
        (registry, updates_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: LinkEvent) {
        // The observer going away is not our problem
        let _ = self.events.send(event);
    }

    fn publish(&self, entries: &[Entry]) {
        let handles = entries.iter().map(|e| e.link.handle()).collect();
        let values = entries.iter().map(|e| e.reading).collect();
        self.emit(LinkEvent::ListChanged { handles });
        self.emit(LinkEvent::ValuesChanged { values });
    }

    /// Register a connected link
    ///
    /// The link is only inserted if the radio reports its channel alive and
    /// [`close_all`](Self::close_all) has not run. Returns whether it was
    /// inserted.
    pub fn add(&self, link: Arc<ChannelLink>) -> bool {
        if !link.is_alive() {
            debug!("Not registering {}: channel not alive", link.handle());
            return false;
        }

        let mut entries = self.lock();
        if self.closed.load(Ordering::Acquire) {
            debug!("Not registering {}: registry closed", link.handle());
            return false;
        }
        if entries.iter().any(|e| e.link.handle() == link.handle()) {
            warn!("{} is already registered", link.handle());
            return false;
        }

        link.add_listener(self.updates.clone());
        // A close that raced the listener hand-off would never reach us
        if link.state() == LinkState::Closed {
            debug!("Not registering {}: closed during registration", link.handle());
            return false;
        }

        info!("Registered {} at position {}", link.handle(), entries.len());
        entries.push(Entry {
            reading: link.reading(),
            link,
        });
        self.publish(&entries);
        true
    }

    /// Remove a link that has closed
    ///
    /// Closes and releases the link if that has not happened yet. Returns
    /// whether the link was registered.
    pub fn on_link_closed(&self, handle: ChannelHandle, reason: CloseReason) -> bool {
        let removed = {
            let mut entries = self.lock();
            let Some(index) = entries.iter().position(|e| e.link.handle() == handle) else {
                return false;
            };
            let entry = entries.remove(index);
            self.emit(LinkEvent::LinkClosed { handle, reason });
            self.publish(&entries);
            entry
        };

        removed.link.close(reason);
        info!("Removed {} ({})", handle, reason);
        true
    }

    fn on_value(&self, handle: ChannelHandle, value: u8) {
        let mut entries = self.lock();
        let Some(entry) = entries.iter_mut().find(|e| e.link.handle() == handle) else {
            return;
        };
        if entry.reading == Reading::Known(value) {
            return;
        }
        entry.reading = Reading::Known(value);
        let values = entries.iter().map(|e| e.reading).collect();
        self.emit(LinkEvent::ValuesChanged { values });
    }

    /// Apply one link update
    pub fn apply(&self, update: LinkUpdate) {
        match update {
            LinkUpdate::Value { handle, value } => self.on_value(handle, value),
            LinkUpdate::Closed { handle, reason } => {
                self.on_link_closed(handle, reason);
            }
            LinkUpdate::Connected { .. } => {}
        }
    }

    /// Drain link updates until the channel closes
    pub async fn run(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<LinkUpdate>) {
        while let Some(update) = updates.recv().await {
            self.apply(update);
        }
        debug!("Registry update loop stopped");
    }

    /// Last known value of every link, in registration order
    pub fn current_values(&self) -> Vec<Reading> {
        self.lock().iter().map(|e| e.reading).collect()
    }

    /// Handles of every link, in registration order
    pub fn handles(&self) -> Vec<ChannelHandle> {
        self.lock().iter().map(|e| e.link.handle()).collect()
    }

    /// Link at a display position
    pub fn link_at(&self, index: usize) -> Option<Arc<ChannelLink>> {
        self.lock().get(index).map(|e| Arc::clone(&e.link))
    }

    /// Last known value at a display position
    pub fn reading_at(&self, index: usize) -> Option<Reading> {
        self.lock().get(index).map(|e| e.reading)
    }

    /// Number of registered links
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no link is registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn links(&self) -> Vec<Arc<ChannelLink>> {
        self.lock().iter().map(|e| Arc::clone(&e.link)).collect()
    }

    /// Evict every link whose channel is no longer alive
    ///
    /// Returns the number of links removed.
    pub fn validate(&self) -> usize {
        let dead: Vec<_> = self
            .links()
            .into_iter()
            .filter(|link| !link.is_alive())
            .collect();

        let mut evicted = 0;
        for link in dead {
            warn!("{} is no longer alive", link.handle());
            if self.on_link_closed(link.handle(), CloseReason::Evicted) {
                evicted += 1;
            }
        }
        evicted
    }

    /// Detach every link from its event sink (e.g. while paused)
    pub fn suspend_all(&self) {
        for link in self.links() {
            if let Err(err) = link.suspend() {
                warn!("Failed to suspend {}: {}", link.handle(), err);
            }
        }
    }

    /// Reattach every link to its event sink
    pub fn resume_all(&self) {
        for link in self.links() {
            if let Err(err) = link.resume() {
                warn!("Failed to resume {}: {}", link.handle(), err);
            }
        }
    }

    /// Close and remove every link
    ///
    /// The registry accepts no links afterwards.
    pub fn close_all(&self, reason: CloseReason) {
        let drained: Vec<Entry> = {
            let mut entries = self.lock();
            self.closed.store(true, Ordering::Release);
            if entries.is_empty() {
                return;
            }
            let drained = entries.drain(..).collect();
            self.publish(&entries);
            drained
        };

        for entry in drained {
            entry.link.close(reason);
            self.emit(LinkEvent::LinkClosed {
                handle: entry.link.handle(),
                reason,
            });
        }
    }
}

impl std::fmt::Debug for LinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRegistry")
            .field("handles", &self.handles())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::pool::ChannelResourcePool;
    use ant_protocol::{EventCode, Frame, MessageFromAnt};
    use ant_sim::{SimulatedRadio, VirtualPeer};

    struct Fixture {
        radio: Arc<SimulatedRadio>,
        pool: Arc<ChannelResourcePool>,
        registry: LinkRegistry,
        updates: mpsc::UnboundedReceiver<LinkUpdate>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        sinks: Vec<mpsc::UnboundedReceiver<MessageFromAnt>>,
    }

    impl Fixture {
        fn new(peers: &[(u16, u8)]) -> Self {
            let mut radio = SimulatedRadio::new(4);
            for &(device, intensity) in peers {
                radio = radio.with_peer(
                    VirtualPeer::new(format!("Lamp {}", device), device)
                        .with_intensity(Some(intensity)),
                );
            }
            let radio = Arc::new(radio);
            let pool = Arc::new(ChannelResourcePool::new(radio.clone()));
            let (event_tx, events) = mpsc::unbounded_channel();
            let (registry, updates) = LinkRegistry::new(event_tx);
            Self {
                radio,
                pool,
                registry,
                updates,
                events,
                sinks: Vec::new(),
            }
        }

        /// Open a link and feed it the radio's first messages
        fn connect(&mut self) -> Arc<ChannelLink> {
            let handle = self.pool.acquire().unwrap();
            let link = Arc::new(ChannelLink::new(
                self.pool.clone(),
                handle,
                LinkConfig::default(),
            ));
            link.configure().unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            link.open(tx).unwrap();
            while let Ok(msg) = rx.try_recv() {
                link.handle_message(msg);
            }
            self.sinks.push(rx);
            link
        }

        fn apply_updates(&mut self) {
            while let Ok(update) = self.updates.try_recv() {
                self.registry.apply(update);
            }
        }

        fn drain_events(&mut self) -> Vec<LinkEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[test]
    fn test_add_keeps_insertion_order() {
        let mut fx = Fixture::new(&[(1, 10), (2, 20)]);
        let a = fx.connect();
        let b = fx.connect();

        assert!(fx.registry.add(a.clone()));
        assert!(fx.registry.add(b.clone()));
        assert_eq!(fx.registry.handles(), vec![a.handle(), b.handle()]);
        assert_eq!(
            fx.registry.current_values(),
            vec![Reading::Known(10), Reading::Known(20)]
        );

        let events = fx.drain_events();
        assert_eq!(
            events.last(),
            Some(&LinkEvent::ValuesChanged {
                values: vec![Reading::Known(10), Reading::Known(20)]
            })
        );
        assert!(events.contains(&LinkEvent::ListChanged {
            handles: vec![a.handle()]
        }));
    }

    #[test]
    fn test_add_rejects_dead_link() {
        let mut fx = Fixture::new(&[(1, 10)]);
        let link = fx.connect();
        fx.radio.kill_channel(link.handle());

        assert!(!fx.registry.add(link));
        assert!(fx.registry.is_empty());
        assert!(fx.drain_events().is_empty());
    }

    #[test]
    fn test_add_twice_rejected() {
        let mut fx = Fixture::new(&[(1, 10)]);
        let link = fx.connect();
        assert!(fx.registry.add(link.clone()));
        assert!(!fx.registry.add(link));
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_value_updates_flow_into_registry() {
        let mut fx = Fixture::new(&[(1, 10)]);
        let link = fx.connect();
        fx.registry.add(link.clone());
        fx.drain_events();

        link.handle_message(MessageFromAnt::BroadcastData(Frame::update(Some(64))));
        fx.apply_updates();

        assert_eq!(fx.registry.current_values(), vec![Reading::Known(64)]);
        assert_eq!(
            fx.drain_events(),
            vec![LinkEvent::ValuesChanged {
                values: vec![Reading::Known(64)]
            }]
        );
    }

    #[test]
    fn test_closed_link_removed_and_released_once() {
        let mut fx = Fixture::new(&[(1, 10), (2, 20)]);
        let a = fx.connect();
        let b = fx.connect();
        fx.registry.add(a.clone());
        fx.registry.add(b.clone());
        fx.drain_events();

        for _ in 0..5 {
            a.handle_message(MessageFromAnt::ChannelEvent(EventCode::RxFail));
        }
        fx.apply_updates();

        assert_eq!(fx.registry.handles(), vec![b.handle()]);
        assert_eq!(fx.radio.release_count(a.handle()), 1);

        let events = fx.drain_events();
        assert_eq!(
            events[0],
            LinkEvent::LinkClosed {
                handle: a.handle(),
                reason: CloseReason::ReceiveFailures
            }
        );
        assert!(events.contains(&LinkEvent::ValuesChanged {
            values: vec![Reading::Known(20)]
        }));
    }

    #[test]
    fn test_on_link_closed_releases_open_link() {
        let mut fx = Fixture::new(&[(1, 10)]);
        let link = fx.connect();
        fx.registry.add(link.clone());

        assert!(fx
            .registry
            .on_link_closed(link.handle(), CloseReason::Requested));
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(fx.radio.release_count(link.handle()), 1);
        assert!(!fx
            .registry
            .on_link_closed(link.handle(), CloseReason::Requested));
    }

    #[test]
    fn test_validate_evicts_dead_links() {
        let mut fx = Fixture::new(&[(1, 10), (2, 20)]);
        let a = fx.connect();
        let b = fx.connect();
        fx.registry.add(a.clone());
        fx.registry.add(b.clone());

        fx.radio.kill_channel(b.handle());
        assert_eq!(fx.registry.validate(), 1);
        assert_eq!(fx.registry.handles(), vec![a.handle()]);
        assert_eq!(b.close_reason(), Some(CloseReason::Evicted));
        assert_eq!(fx.radio.release_count(b.handle()), 1);
    }

    #[test]
    fn test_suspend_and_resume_all() {
        let mut fx = Fixture::new(&[(1, 10)]);
        let link = fx.connect();
        fx.registry.add(link.clone());

        fx.registry.suspend_all();
        assert!(!fx.radio.has_event_sink(link.handle()));

        fx.registry.resume_all();
        assert!(fx.radio.has_event_sink(link.handle()));
    }

    #[test]
    fn test_close_all() {
        let mut fx = Fixture::new(&[(1, 10), (2, 20)]);
        let a = fx.connect();
        let b = fx.connect();
        fx.registry.add(a.clone());
        fx.registry.add(b.clone());
        fx.drain_events();

        fx.registry.close_all(CloseReason::Shutdown);
        fx.apply_updates();

        assert!(fx.registry.is_empty());
        assert_eq!(fx.pool.held_count(), 0);
        let closed = fx
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, LinkEvent::LinkClosed { .. }))
            .count();
        assert_eq!(closed, 2);
    }

    #[test]
    fn test_add_after_close_all_rejected() {
        let mut fx = Fixture::new(&[(1, 10)]);
        fx.registry.close_all(CloseReason::Shutdown);

        let late = fx.connect();
        assert!(!fx.registry.add(late.clone()));
        assert!(fx.registry.is_empty());
        assert_eq!(late.listener_count(), 0);
    }

    #[test]
    fn test_link_at() {
        let mut fx = Fixture::new(&[(1, 10)]);
        let link = fx.connect();
        fx.registry.add(link.clone());

        assert_eq!(fx.registry.link_at(0).map(|l| l.handle()), Some(link.handle()));
        assert_eq!(fx.registry.reading_at(0), Some(Reading::Known(10)));
        assert!(fx.registry.link_at(1).is_none());
    }
}

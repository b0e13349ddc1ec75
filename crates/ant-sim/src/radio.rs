//! Simulated radio service
//!
//! Implements [`RadioService`] over an in-memory channel table. Opening a
//! channel binds the first free virtual peer the channel's id filter finds;
//! the peer's update page is delivered immediately, as a real master would
//! within its first channel period. A channel with no peer to find stays
//! searching until it is closed or released.
//!
//! Faults can be injected per operation to exercise error paths, and every
//! release is counted so tests can check that no handle is released twice.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use ant_protocol::{
    ChannelHandle, ChannelParameters, ChannelState, EventCode, EventSink, Frame, MessageFromAnt,
    NotAvailableReason, RadioService, ServiceError,
};
use tracing::{debug, info, warn};

use crate::peer::VirtualPeer;

/// Response code for a command issued in the wrong channel state
pub const CHANNEL_IN_WRONG_STATE: u8 = 0x15;
/// Response code for a command on a channel that does not exist
pub const INVALID_CHANNEL: u8 = 0x28;

/// Default number of channels on the simulated radio
pub const DEFAULT_CAPACITY: usize = 8;

/// Service operations that faults can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// `channels_available`
    Count,
    /// `acquire_channel`
    Acquire,
    /// `configure`
    Configure,
    /// `open`
    Open,
    /// `close`
    Close,
    /// `set_event_sink`
    SetSink,
    /// `send_broadcast` and `send_acknowledged`
    Send,
    /// `request_status`
    Status,
}

#[derive(Debug)]
struct SimChannel {
    state: ChannelState,
    params: Option<ChannelParameters>,
    sink: Option<EventSink>,
    peer: Option<VirtualPeer>,
    broadcast: Option<Frame>,
    acknowledged: Vec<Frame>,
}

impl SimChannel {
    fn new() -> Self {
        Self {
            state: ChannelState::Unassigned,
            params: None,
            sink: None,
            peer: None,
            broadcast: None,
            acknowledged: Vec::new(),
        }
    }

    fn emit(&self, handle: ChannelHandle, msg: MessageFromAnt) -> bool {
        match &self.sink {
            Some(sink) => sink.send(msg).is_ok(),
            None => {
                debug!("Dropping {:?} for {}: no event sink", msg, handle);
                false
            }
        }
    }
}

#[derive(Debug)]
struct SimState {
    capacity: usize,
    next_handle: u32,
    channels: BTreeMap<ChannelHandle, SimChannel>,
    /// Peers not currently bound to a channel
    peers: Vec<VirtualPeer>,
    one_shot_faults: HashMap<SimOp, VecDeque<ServiceError>>,
    persistent_faults: HashMap<SimOp, ServiceError>,
    /// Report zero free channels from `channels_available` regardless of state
    count_reports_zero: bool,
    /// Emit `RxSearchTimeout` when an opened channel finds no peer
    hardware_search_timeout: bool,
    release_counts: HashMap<ChannelHandle, usize>,
    acquire_calls: usize,
}

impl SimState {
    fn take_fault(&mut self, op: SimOp) -> Option<ServiceError> {
        if let Some(err) = self
            .one_shot_faults
            .get_mut(&op)
            .and_then(|queue| queue.pop_front())
        {
            return Some(err);
        }
        self.persistent_faults.get(&op).cloned()
    }

    fn check(&mut self, op: SimOp) -> Result<(), ServiceError> {
        match self.take_fault(op) {
            Some(err) => {
                debug!("Injected fault on {:?}: {}", op, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn channel_mut(
        &mut self,
        handle: ChannelHandle,
        command: &'static str,
    ) -> Result<&mut SimChannel, ServiceError> {
        self.channels
            .get_mut(&handle)
            .ok_or(ServiceError::CommandFailed {
                command,
                code: INVALID_CHANNEL,
            })
    }

    fn unbind_peer(&mut self, handle: ChannelHandle) {
        if let Some(peer) = self.channels.get_mut(&handle).and_then(|c| c.peer.take()) {
            debug!("Peer {} unbound from {}", peer.name(), handle);
            self.peers.push(peer);
        }
    }
}

/// In-memory radio service with virtual peers
#[derive(Debug)]
pub struct SimulatedRadio {
    state: Mutex<SimState>,
}

impl SimulatedRadio {
    /// Create a radio with `capacity` channels and no peers
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SimState {
                capacity,
                next_handle: 1,
                channels: BTreeMap::new(),
                peers: Vec::new(),
                one_shot_faults: HashMap::new(),
                persistent_faults: HashMap::new(),
                count_reports_zero: false,
                hardware_search_timeout: false,
                release_counts: HashMap::new(),
                acquire_calls: 0,
            }),
        }
    }

    /// Add a peer within radio range
    pub fn with_peer(self, peer: VirtualPeer) -> Self {
        self.add_peer(peer);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bring a peer within range
    pub fn add_peer(&self, peer: VirtualPeer) {
        info!("Virtual peer {} in range", peer.name());
        self.lock().peers.push(peer);
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&self, op: SimOp, err: ServiceError) {
        self.lock()
            .one_shot_faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Fail every call of `op` with `err` until [`clear_faults`](Self::clear_faults)
    pub fn fail_always(&self, op: SimOp, err: ServiceError) {
        self.lock().persistent_faults.insert(op, err);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.one_shot_faults.clear();
        state.persistent_faults.clear();
    }

    /// Make `channels_available` report zero even when channels are free
    pub fn set_count_reports_zero(&self, enabled: bool) {
        self.lock().count_reports_zero = enabled;
    }

    /// Emit `RxSearchTimeout` when an opened channel finds no peer
    pub fn set_hardware_search_timeout(&self, enabled: bool) {
        self.lock().hardware_search_timeout = enabled;
    }

    /// Deliver a message on a channel's event sink
    ///
    /// Returns false when the channel has no sink installed.
    pub fn inject(&self, handle: ChannelHandle, msg: MessageFromAnt) -> bool {
        let state = self.lock();
        match state.channels.get(&handle) {
            Some(channel) => channel.emit(handle, msg),
            None => false,
        }
    }

    /// Change the intensity of the peer bound to `handle` and broadcast it
    pub fn set_peer_intensity(&self, handle: ChannelHandle, intensity: Option<u8>) -> bool {
        let mut state = self.lock();
        let Some(channel) = state.channels.get_mut(&handle) else {
            return false;
        };
        let Some(peer) = channel.peer.as_mut() else {
            return false;
        };
        peer.set_intensity(intensity);
        let frame = peer.update_frame();
        channel.emit(handle, MessageFromAnt::BroadcastData(frame))
    }

    /// Intensity of the peer bound to `handle`
    pub fn peer_intensity(&self, handle: ChannelHandle) -> Option<Option<u8>> {
        self.lock()
            .channels
            .get(&handle)
            .and_then(|c| c.peer.as_ref())
            .map(VirtualPeer::intensity)
    }

    /// Mark a channel as gone, as if the radio had dropped it
    pub fn kill_channel(&self, handle: ChannelHandle) {
        let mut state = self.lock();
        state.unbind_peer(handle);
        if let Some(channel) = state.channels.get_mut(&handle) {
            warn!("Simulating loss of {}", handle);
            channel.state = ChannelState::Invalid;
        }
    }

    /// Number of times `handle` was actually released
    pub fn release_count(&self, handle: ChannelHandle) -> usize {
        self.lock()
            .release_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `acquire_channel` calls, including failed ones
    pub fn acquire_calls(&self) -> usize {
        self.lock().acquire_calls
    }

    /// Handles currently owned by clients
    pub fn held_channels(&self) -> Vec<ChannelHandle> {
        self.lock().channels.keys().copied().collect()
    }

    /// State of a held channel
    pub fn channel_state(&self, handle: ChannelHandle) -> Option<ChannelState> {
        self.lock().channels.get(&handle).map(|c| c.state)
    }

    /// Parameters applied to a held channel
    pub fn channel_params(&self, handle: ChannelHandle) -> Option<ChannelParameters> {
        self.lock().channels.get(&handle).and_then(|c| c.params)
    }

    /// Whether a held channel has an event sink installed
    pub fn has_event_sink(&self, handle: ChannelHandle) -> bool {
        self.lock()
            .channels
            .get(&handle)
            .is_some_and(|c| c.sink.is_some())
    }

    /// Current broadcast data of a held channel
    pub fn broadcast_frame(&self, handle: ChannelHandle) -> Option<Frame> {
        self.lock().channels.get(&handle).and_then(|c| c.broadcast)
    }

    /// Acknowledged frames sent on a held channel
    pub fn acknowledged_frames(&self, handle: ChannelHandle) -> Vec<Frame> {
        self.lock()
            .channels
            .get(&handle)
            .map(|c| c.acknowledged.clone())
            .unwrap_or_default()
    }

    fn deliver_to_peer(
        &self,
        handle: ChannelHandle,
        payload: &Frame,
        acknowledged: bool,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::Send)?;
        let command = if acknowledged {
            "send acknowledged"
        } else {
            "set broadcast"
        };
        let channel = state.channel_mut(handle, command)?;
        if acknowledged {
            if channel.state != ChannelState::Tracking {
                return Err(ServiceError::CommandFailed {
                    command,
                    code: CHANNEL_IN_WRONG_STATE,
                });
            }
            channel.acknowledged.push(*payload);
        } else {
            channel.broadcast = Some(*payload);
        }

        let changed = channel
            .peer
            .as_mut()
            .map(|peer| peer.apply(payload))
            .unwrap_or(false);

        if acknowledged {
            channel.emit(
                handle,
                MessageFromAnt::ChannelEvent(EventCode::TransferTxCompleted),
            );
        }
        if changed {
            if let Some(frame) = channel.peer.as_ref().map(VirtualPeer::update_frame) {
                channel.emit(handle, MessageFromAnt::BroadcastData(frame));
            }
        }
        Ok(())
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RadioService for SimulatedRadio {
    fn channels_available(&self) -> Result<usize, ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::Count)?;
        if state.count_reports_zero {
            return Ok(0);
        }
        Ok(state.capacity.saturating_sub(state.channels.len()))
    }

    fn acquire_channel(&self) -> Result<ChannelHandle, ServiceError> {
        let mut state = self.lock();
        state.acquire_calls += 1;
        state.check(SimOp::Acquire)?;

        if state.channels.len() >= state.capacity {
            return Err(ServiceError::ChannelNotAvailable(
                NotAvailableReason::AllChannelsInUse,
            ));
        }

        let handle = ChannelHandle(state.next_handle);
        state.next_handle += 1;
        state.channels.insert(handle, SimChannel::new());
        debug!("Acquired {}", handle);
        Ok(handle)
    }

    fn configure(
        &self,
        handle: ChannelHandle,
        params: &ChannelParameters,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::Configure)?;
        let channel = state.channel_mut(handle, "configure")?;
        if channel.state != ChannelState::Unassigned && channel.state != ChannelState::Assigned {
            return Err(ServiceError::CommandFailed {
                command: "configure",
                code: CHANNEL_IN_WRONG_STATE,
            });
        }
        channel.params = Some(*params);
        channel.state = ChannelState::Assigned;
        Ok(())
    }

    fn open(&self, handle: ChannelHandle) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::Open)?;
        let hardware_timeout = state.hardware_search_timeout;

        let filter = {
            let channel = state.channel_mut(handle, "open")?;
            match (channel.state, channel.params) {
                (ChannelState::Assigned, Some(params)) => params.channel_id(),
                _ => {
                    return Err(ServiceError::CommandFailed {
                        command: "open",
                        code: CHANNEL_IN_WRONG_STATE,
                    })
                }
            }
        };

        let peer = state
            .peers
            .iter()
            .position(|p| p.is_found_by(&filter))
            .map(|idx| state.peers.remove(idx));

        let channel = state.channel_mut(handle, "open")?;
        match peer {
            Some(peer) => {
                debug!("{} found peer {}", handle, peer.name());
                let frame = peer.update_frame();
                channel.peer = Some(peer);
                channel.state = ChannelState::Tracking;
                channel.emit(handle, MessageFromAnt::BroadcastData(frame));
            }
            None if hardware_timeout => {
                debug!("{} search timed out on the radio", handle);
                channel.state = ChannelState::Assigned;
                channel.emit(
                    handle,
                    MessageFromAnt::ChannelEvent(EventCode::RxSearchTimeout),
                );
            }
            None => {
                debug!("{} searching", handle);
                channel.state = ChannelState::Searching;
            }
        }
        Ok(())
    }

    fn close(&self, handle: ChannelHandle) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::Close)?;
        let channel = state.channel_mut(handle, "close")?;
        if !matches!(
            channel.state,
            ChannelState::Searching | ChannelState::Tracking
        ) {
            return Err(ServiceError::CommandFailed {
                command: "close",
                code: CHANNEL_IN_WRONG_STATE,
            });
        }
        channel.state = ChannelState::Assigned;
        channel.emit(handle, MessageFromAnt::ChannelEvent(EventCode::ChannelClosed));
        state.unbind_peer(handle);
        Ok(())
    }

    fn release_channel(&self, handle: ChannelHandle) {
        let mut state = self.lock();
        state.unbind_peer(handle);
        if state.channels.remove(&handle).is_some() {
            *state.release_counts.entry(handle).or_insert(0) += 1;
            debug!("Released {}", handle);
        }
    }

    fn set_event_sink(
        &self,
        handle: ChannelHandle,
        sink: Option<EventSink>,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::SetSink)?;
        let channel = state
            .channels
            .get_mut(&handle)
            .ok_or_else(|| ServiceError::Remote(format!("unknown channel {}", handle)))?;
        channel.sink = sink;
        Ok(())
    }

    fn send_broadcast(&self, handle: ChannelHandle, payload: &Frame) -> Result<(), ServiceError> {
        self.deliver_to_peer(handle, payload, false)
    }

    fn send_acknowledged(
        &self,
        handle: ChannelHandle,
        payload: &Frame,
    ) -> Result<(), ServiceError> {
        self.deliver_to_peer(handle, payload, true)
    }

    fn request_status(&self, handle: ChannelHandle) -> Result<ChannelState, ServiceError> {
        let mut state = self.lock();
        state.check(SimOp::Status)?;
        state
            .channels
            .get(&handle)
            .map(|c| c.state)
            .ok_or_else(|| ServiceError::Remote(format!("unknown channel {}", handle)))
    }
}

//! Channel resource pool
//!
//! The radio has a handful of channels shared by every application on the
//! device. The pool hands them out, remembers which ones this process holds,
//! and makes sure each one goes back to the service exactly once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use ant_protocol::{ChannelHandle, RadioService};
use tracing::{debug, warn};

use crate::error::LinkError;

/// Owner of the hardware channel handles held by this process
pub struct ChannelResourcePool {
    service: Arc<dyn RadioService>,
    held: Mutex<HashSet<ChannelHandle>>,
}

impl ChannelResourcePool {
    /// Create a pool on top of a radio service
    pub fn new(service: Arc<dyn RadioService>) -> Self {
        Self {
            service,
            held: Mutex::new(HashSet::new()),
        }
    }

    /// The radio service behind this pool
    pub fn service(&self) -> &dyn RadioService {
        self.service.as_ref()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<ChannelHandle>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a free channel
    pub fn acquire(&self) -> Result<ChannelHandle, LinkError> {
        match self.service.acquire_channel() {
            Ok(handle) => {
                self.held().insert(handle);
                debug!("Acquired {}", handle);
                Ok(handle)
            }
            Err(err) if err.is_all_channels_in_use() => {
                debug!("No free channel to acquire");
                Err(LinkError::NoChannelAvailable)
            }
            Err(err) => {
                warn!("Failed to acquire channel: {}", err);
                Err(LinkError::Transport(err))
            }
        }
    }

    /// Number of channels that can currently be acquired
    ///
    /// A raw count of zero is ambiguous, so it is confirmed with a throwaway
    /// acquire: "all channels in use" means zero, any other failure is a
    /// transport error. If the probe succeeds after all, its channel is given
    /// straight back and one channel is reported.
    pub fn available_count(&self) -> Result<usize, LinkError> {
        let raw = self.service.channels_available().map_err(|err| {
            warn!("Failed to query free channels: {}", err);
            LinkError::Transport(err)
        })?;
        if raw > 0 {
            return Ok(raw);
        }

        match self.service.acquire_channel() {
            Ok(probe) => {
                debug!("Probe acquired {} although none were reported free", probe);
                self.service.release_channel(probe);
                Ok(1)
            }
            Err(err) if err.is_all_channels_in_use() => {
                debug!("All channels in use");
                Ok(0)
            }
            Err(err) => {
                warn!("Channel probe failed: {}", err);
                Err(LinkError::Transport(err))
            }
        }
    }

    /// Give a channel back to the radio service
    ///
    /// Returns whether this call released it. Unknown and already released
    /// handles are ignored.
    pub fn release(&self, handle: ChannelHandle) -> bool {
        if !self.held().remove(&handle) {
            debug!("{} already released", handle);
            return false;
        }
        self.service.release_channel(handle);
        debug!("Released {}", handle);
        true
    }

    /// Number of channels currently held
    pub fn held_count(&self) -> usize {
        self.held().len()
    }

    /// Whether `handle` is currently held by this pool
    pub fn is_held(&self, handle: ChannelHandle) -> bool {
        self.held().contains(&handle)
    }
}

impl std::fmt::Debug for ChannelResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelResourcePool")
            .field("held", &*self.held())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ant_protocol::{NotAvailableReason, ServiceError};
    use ant_sim::{SimOp, SimulatedRadio};

    fn pool_with(radio: &Arc<SimulatedRadio>) -> ChannelResourcePool {
        ChannelResourcePool::new(radio.clone())
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let radio = Arc::new(SimulatedRadio::new(2));
        let pool = pool_with(&radio);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.acquire(), Err(LinkError::NoChannelAvailable));
        assert_eq!(pool.held_count(), 2);
    }

    #[test]
    fn test_acquire_transport_failure() {
        let radio = Arc::new(SimulatedRadio::new(2));
        radio.fail_next(SimOp::Acquire, ServiceError::Remote("binder died".into()));
        let pool = pool_with(&radio);

        assert!(matches!(pool.acquire(), Err(LinkError::Transport(_))));
        assert_eq!(pool.held_count(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let radio = Arc::new(SimulatedRadio::new(1));
        let pool = pool_with(&radio);
        let handle = pool.acquire().unwrap();

        assert!(pool.release(handle));
        assert!(!pool.release(handle));
        assert!(!pool.release(ChannelHandle(99)));
        assert_eq!(radio.release_count(handle), 1);
        assert!(!pool.is_held(handle));
    }

    #[test]
    fn test_available_count_passes_raw_count() {
        let radio = Arc::new(SimulatedRadio::new(3));
        let pool = pool_with(&radio);
        assert_eq!(pool.available_count(), Ok(3));
        assert_eq!(radio.acquire_calls(), 0);
    }

    #[test]
    fn test_available_count_zero_when_all_in_use() {
        let radio = Arc::new(SimulatedRadio::new(1));
        let pool = pool_with(&radio);
        let _held = pool.acquire().unwrap();

        assert_eq!(pool.available_count(), Ok(0));
    }

    #[test]
    fn test_available_count_transport_error_from_probe() {
        let radio = Arc::new(SimulatedRadio::new(1));
        radio.set_count_reports_zero(true);
        radio.fail_next(
            SimOp::Acquire,
            ServiceError::ChannelNotAvailable(NotAvailableReason::RadioDisabled),
        );
        let pool = pool_with(&radio);

        assert!(matches!(
            pool.available_count(),
            Err(LinkError::Transport(_))
        ));
    }

    #[test]
    fn test_available_count_probe_success_releases_probe() {
        let radio = Arc::new(SimulatedRadio::new(2));
        radio.set_count_reports_zero(true);
        let pool = pool_with(&radio);

        assert_eq!(pool.available_count(), Ok(1));
        assert!(radio.held_channels().is_empty());
        assert_eq!(pool.held_count(), 0);
    }

    #[test]
    fn test_count_query_failure() {
        let radio = Arc::new(SimulatedRadio::new(2));
        radio.fail_next(SimOp::Count, ServiceError::Remote("timeout".into()));
        let pool = pool_with(&radio);

        assert!(matches!(
            pool.available_count(),
            Err(LinkError::Transport(_))
        ));
    }
}

//! Integration tests for searching and the link lifecycle
//!
//! These run the full controller against the simulated radio on a paused
//! clock, so the 15 second search window passes instantly and
//! deterministically. They cover:
//! - Search batches with responding and silent peers
//! - Exhaustion and transport failures while counting channels
//! - Per-slot failure isolation
//! - Value propagation and eviction of registered links
//! - Connections racing the search deadline, and shutdown mid-search

use std::sync::Arc;
use std::time::Duration;

use ant_link::{
    CloseMode, CloseReason, LinkConfig, LinkController, LinkError, LinkEvent, SearchSummary,
};
use ant_protocol::{
    ChannelHandle, ChannelState, EventCode, Frame, Intensity, MessageFromAnt, RadioService,
    Reading, ServiceError,
};
use ant_sim::{SimOp, SimulatedRadio, VirtualPeer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// A radio with `capacity` channels and one peer per entry in `intensities`
    pub fn radio(capacity: usize, intensities: &[u8]) -> Arc<SimulatedRadio> {
        let mut radio = SimulatedRadio::new(capacity);
        for (i, &value) in intensities.iter().enumerate() {
            let device = i as u16 + 1;
            radio = radio.with_peer(
                VirtualPeer::new(format!("Light {}", device), device).with_intensity(Some(value)),
            );
        }
        Arc::new(radio)
    }

    pub fn controller(
        radio: &Arc<SimulatedRadio>,
        config: LinkConfig,
    ) -> (LinkController, UnboundedReceiver<LinkEvent>) {
        LinkController::new(radio.clone(), config)
    }

    /// Run one search to completion
    pub async fn search(controller: &LinkController) -> SearchSummary {
        controller
            .start_search()
            .expect("no search should be running")
            .await
            .expect("search task panicked")
    }

    pub fn drain(events: &mut UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn count(events: &[LinkEvent], pred: impl Fn(&LinkEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    /// Yield until the radio reports `handle` searching
    pub async fn wait_until_searching(radio: &SimulatedRadio, handle: ChannelHandle) {
        while radio.channel_state(handle) != Some(ChannelState::Searching) {
            tokio::task::yield_now().await;
        }
    }

    /// Wait for the first event matching `pred`
    pub async fn wait_for(
        events: &mut UnboundedReceiver<LinkEvent>,
        pred: impl Fn(&LinkEvent) -> bool,
    ) -> LinkEvent {
        timeout(Duration::from_secs(60), async {
            loop {
                match events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

// ============================================================================
// Search Tests
// ============================================================================

mod search_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_responding_one_silent_slot() {
        let radio = helpers::radio(2, &[30]);
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());

        let start = Instant::now();
        let summary = helpers::search(&controller).await;

        assert!(start.elapsed() >= Duration::from_secs(15));
        assert_eq!(
            summary,
            SearchSummary {
                available: 2,
                connected: 1,
                timed_out: 1,
                failed: 0,
                cancelled: 0,
            }
        );

        let events = helpers::drain(&mut events);
        assert_eq!(
            helpers::count(&events, |e| matches!(e, LinkEvent::SearchStarted)),
            1
        );
        assert_eq!(
            helpers::count(&events, |e| matches!(e, LinkEvent::LinkConnected { .. })),
            1
        );
        assert_eq!(
            helpers::count(&events, |e| matches!(e, LinkEvent::SearchFinished { .. })),
            1
        );
        assert!(matches!(
            events.last(),
            Some(LinkEvent::SearchFinished { .. })
        ));

        // The silent slot was released exactly once, the connected one is held
        let connected = controller.registry().handles();
        assert_eq!(connected.len(), 1);
        let silent = [ChannelHandle(1), ChannelHandle(2)]
            .into_iter()
            .find(|h| *h != connected[0])
            .unwrap();
        assert_eq!(radio.release_count(silent), 1);
        assert_eq!(radio.release_count(connected[0]), 0);
        assert_eq!(radio.held_channels(), connected);
        assert_eq!(controller.values(), vec![Reading::Known(30)]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_free_channels() {
        let radio = helpers::radio(1, &[30]);
        let _other_app = radio.acquire_channel().unwrap();
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());

        let summary = helpers::search(&controller).await;

        assert_eq!(summary, SearchSummary::default());
        assert_eq!(
            helpers::drain(&mut events),
            vec![
                LinkEvent::SearchStarted,
                LinkEvent::NoChannelsAvailable,
                LinkEvent::SearchFinished {
                    summary: SearchSummary::default()
                },
            ]
        );
        // The other app's acquire plus the count probe; no slot acquired anything
        assert_eq!(radio.acquire_calls(), 2);
        assert_eq!(controller.pool().held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finishes_early_when_every_slot_connects() {
        let radio = helpers::radio(2, &[10, 90]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

        let start = Instant::now();
        let summary = helpers::search(&controller).await;

        assert!(start.elapsed() < Duration::from_secs(15));
        assert_eq!(summary.connected, 2);
        assert_eq!(summary.timed_out, 0);

        let mut values = controller.values();
        values.sort_by_key(|r| r.value());
        assert_eq!(values, vec![Reading::Known(10), Reading::Known(90)]);
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_timeouts_end_search_early() {
        let radio = helpers::radio(2, &[]);
        radio.set_hardware_search_timeout(true);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

        let start = Instant::now();
        let summary = helpers::search(&controller).await;

        assert!(start.elapsed() < Duration::from_secs(15));
        assert_eq!(summary.timed_out, 2);
        assert!(radio.held_channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_search_at_a_time() {
        let radio = helpers::radio(2, &[]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

        let first = controller.start_search().unwrap();
        assert!(controller.is_searching());
        assert!(controller.start_search().is_none());

        first.await.unwrap();
        assert!(!controller.is_searching());
        assert!(controller.start_search().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finished_is_sent_before_search_can_restart() {
        let radio = helpers::radio(1, &[30]);
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());

        let search = controller.start_search().unwrap();
        while controller.is_searching() {
            tokio::task::yield_now().await;
        }

        let events = helpers::drain(&mut events);
        assert!(matches!(
            events.last(),
            Some(LinkEvent::SearchFinished { .. })
        ));
        search.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_just_before_deadline_is_kept() {
        let radio = helpers::radio(1, &[]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());
        let handle = ChannelHandle(1);

        let search = controller.start_search().unwrap();
        helpers::wait_until_searching(&radio, handle).await;

        sleep(Duration::from_millis(14_999)).await;
        assert!(radio.inject(
            handle,
            MessageFromAnt::BroadcastData(Frame::update(Some(50)))
        ));
        sleep(Duration::from_secs(1)).await;

        let summary = search.await.unwrap();
        assert_eq!(summary.connected, 1);
        assert_eq!(summary.timed_out, 0);
        assert_eq!(controller.registry().handles(), vec![handle]);
        assert_eq!(controller.values(), vec![Reading::Known(50)]);
        assert_eq!(radio.release_count(handle), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_running_search() {
        let radio = helpers::radio(1, &[]);
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());
        let handle = ChannelHandle(1);

        let start = Instant::now();
        let search = controller.start_search().unwrap();
        helpers::wait_until_searching(&radio, handle).await;

        controller.shutdown().await;
        assert!(start.elapsed() < Duration::from_secs(15));
        assert!(radio.held_channels().is_empty());

        // A peer answering after shutdown finds nothing to connect to
        assert!(!radio.inject(
            handle,
            MessageFromAnt::BroadcastData(Frame::update(Some(50)))
        ));

        let summary = search.await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.connected, 0);
        assert_eq!(radio.release_count(handle), 1);

        let events = helpers::drain(&mut events);
        assert!(!events
            .iter()
            .any(|e| matches!(e, LinkEvent::LinkConnected { .. })));
        assert_eq!(
            helpers::count(&events, |e| matches!(e, LinkEvent::SearchFinished { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slot_failure_is_isolated() {
        let radio = helpers::radio(2, &[50, 60]);
        radio.fail_next(
            SimOp::Configure,
            ServiceError::CommandFailed {
                command: "configure",
                code: 0x15,
            },
        );
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

        let summary = helpers::search(&controller).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.connected, 1);
        assert_eq!(controller.pool().held_count(), 1);
        assert_eq!(radio.held_channels().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_reported() {
        let radio = helpers::radio(2, &[50]);
        radio.fail_next(SimOp::Count, ServiceError::Remote("binder died".into()));
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());

        helpers::search(&controller).await;

        let events = helpers::drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, LinkEvent::Error { source, .. } if source == "Search")));
        assert!(!events.contains(&LinkEvent::NoChannelsAvailable));
        assert_eq!(
            helpers::count(&events, |e| matches!(e, LinkEvent::SearchFinished { .. })),
            1
        );
        assert_eq!(radio.acquire_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_search_fills_remaining_slots() {
        let radio = helpers::radio(3, &[20]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

        let first = helpers::search(&controller).await;
        assert_eq!(first.connected, 1);

        radio.add_peer(VirtualPeer::new("Late Light", 9).with_intensity(Some(70)));
        let second = helpers::search(&controller).await;

        assert_eq!(second.available, 2);
        assert_eq!(second.connected, 1);
        assert_eq!(
            controller.values(),
            vec![Reading::Known(20), Reading::Known(70)]
        );
    }
}

// ============================================================================
// Registered Link Tests
// ============================================================================

mod link_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn peer_value_changes_are_published() {
        let radio = helpers::radio(1, &[30]);
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;
        helpers::drain(&mut events);

        let handle = controller.registry().handles()[0];
        assert!(radio.set_peer_intensity(handle, Some(77)));

        let event = helpers::wait_for(&mut events, |e| {
            matches!(e, LinkEvent::ValuesChanged { .. })
        })
        .await;
        assert_eq!(
            event,
            LinkEvent::ValuesChanged {
                values: vec![Reading::Known(77)]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_value_is_not_published() {
        let radio = helpers::radio(1, &[30]);
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;
        helpers::drain(&mut events);

        let handle = controller.registry().handles()[0];
        radio.set_peer_intensity(handle, None);
        radio.set_peer_intensity(handle, Some(31));

        let event = helpers::wait_for(&mut events, |e| {
            matches!(e, LinkEvent::ValuesChanged { .. })
        })
        .await;
        assert_eq!(
            event,
            LinkEvent::ValuesChanged {
                values: vec![Reading::Known(31)]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn receive_failures_evict_link() {
        let radio = helpers::radio(2, &[30, 40]);
        let config = LinkConfig {
            rx_fail_threshold: 3,
            ..Default::default()
        };
        let (controller, mut events) = helpers::controller(&radio, config);
        helpers::search(&controller).await;
        helpers::drain(&mut events);

        let victim = controller.registry().handles()[0];
        for _ in 0..5 {
            radio.inject(victim, MessageFromAnt::ChannelEvent(EventCode::RxFail));
        }

        let event = helpers::wait_for(&mut events, |e| {
            matches!(e, LinkEvent::LinkClosed { .. })
        })
        .await;
        assert_eq!(
            event,
            LinkEvent::LinkClosed {
                handle: victim,
                reason: CloseReason::ReceiveFailures
            }
        );
        assert_eq!(controller.registry().len(), 1);
        assert_eq!(radio.release_count(victim), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_intensity_reaches_peer() {
        let radio = helpers::radio(1, &[30]);
        let (controller, mut events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;
        helpers::drain(&mut events);

        controller
            .set_intensity(0, Intensity::new(65).unwrap())
            .await
            .unwrap();

        let handle = controller.registry().handles()[0];
        assert_eq!(radio.peer_intensity(handle), Some(Some(65)));
        helpers::wait_for(&mut events, |e| {
            *e == LinkEvent::ValuesChanged {
                values: vec![Reading::Known(65)],
            }
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_intensity_reaches_peer() {
        let radio = helpers::radio(1, &[30]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;

        controller
            .broadcast_intensity(0, Intensity::new(5).unwrap())
            .await
            .unwrap();

        let handle = controller.registry().handles()[0];
        assert_eq!(radio.peer_intensity(handle), Some(Some(5)));
        assert!(radio.broadcast_frame(handle).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn step_intensity_uses_last_known_value() {
        let radio = helpers::radio(1, &[40]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;

        controller
            .step_intensity(0, Intensity::new(60).unwrap())
            .await
            .unwrap();

        let handle = controller.registry().handles()[0];
        assert_eq!(radio.peer_intensity(handle), Some(Some(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_position_is_an_error() {
        let radio = helpers::radio(1, &[]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

        assert_eq!(
            controller.set_intensity(3, Intensity::MAX).await,
            Err(LinkError::NoSuchLink(3))
        );
        assert!(controller.selection(0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn validate_evicts_dead_channels() {
        let radio = helpers::radio(2, &[30, 40]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;

        let dead = controller.registry().handles()[1];
        radio.kill_channel(dead);

        assert_eq!(controller.validate().await, 1);
        assert_eq!(controller.registry().len(), 1);
        assert_eq!(radio.release_count(dead), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume() {
        let radio = helpers::radio(1, &[30]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;
        let handle = controller.registry().handles()[0];

        controller.suspend().await;
        assert!(!radio.has_event_sink(handle));

        controller.resume().await;
        assert!(radio.has_event_sink(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_everything() {
        let radio = helpers::radio(2, &[30, 40]);
        let config = LinkConfig {
            close_mode: CloseMode::Hard,
            ..Default::default()
        };
        let (controller, _events) = helpers::controller(&radio, config);
        helpers::search(&controller).await;
        let handles = controller.registry().handles();
        assert_eq!(handles.len(), 2);

        controller.shutdown().await;

        assert!(radio.held_channels().is_empty());
        for handle in handles {
            assert_eq!(radio.release_count(handle), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn selection_reports_current_value() {
        let radio = helpers::radio(1, &[45]);
        let (controller, _events) = helpers::controller(&radio, LinkConfig::default());
        helpers::search(&controller).await;

        let selection = controller.selection(0).unwrap();
        assert_eq!(selection.index, 0);
        assert_eq!(selection.reading, Reading::Known(45));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Every channel acquired by a search is either registered or released once
        #[test]
        fn search_never_leaks_channels(capacity in 1usize..5, peers in 0usize..5) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async {
                let intensities: Vec<u8> = (0..peers).map(|i| (i * 20) as u8).collect();
                let radio = helpers::radio(capacity, &intensities);
                let (controller, _events) = helpers::controller(&radio, LinkConfig::default());

                let summary = helpers::search(&controller).await;
                let expected = capacity.min(peers);

                prop_assert_eq!(summary.connected, expected);
                prop_assert_eq!(summary.timed_out, capacity - expected);
                prop_assert_eq!(controller.registry().len(), expected);
                prop_assert_eq!(radio.held_channels().len(), expected);
                for handle in 1..=capacity as u32 {
                    prop_assert!(radio.release_count(ChannelHandle(handle)) <= 1);
                }
                Ok(())
            })?;
        }
    }
}

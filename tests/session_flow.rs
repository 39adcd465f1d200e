//! End-to-end session tests against a scripted radio link.
//!
//! These run the real driver and state machine; only the radio itself is
//! faked, so they cover the full path from link callbacks to consumer
//! events without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use senselink::{
    drive_session, BleError, BleEvent, ConnectionSession, DiscoveredPeripheral, EndpointOutcome,
    EventSink, GattLink, GattProfile, LookupFailure, MtuOutcome, SessionHost, SessionId,
    SessionSignal, SessionState,
};

/// Scripted link: each phase plays back a configured outcome.
struct FakeLink {
    opens: bool,
    mtu: MtuOutcome,
    endpoints: EndpointOutcome,
    subscription_confirmed: bool,
    payloads: Vec<Vec<u8>>,
    close_calls: Arc<AtomicUsize>,
}

impl FakeLink {
    fn happy(payloads: Vec<Vec<u8>>, close_calls: Arc<AtomicUsize>) -> Self {
        Self {
            opens: true,
            mtu: MtuOutcome {
                mtu: 100,
                granted: true,
            },
            endpoints: EndpointOutcome::Resolved,
            subscription_confirmed: true,
            payloads,
            close_calls,
        }
    }
}

#[async_trait]
impl GattLink for FakeLink {
    async fn open(&mut self) -> Result<()> {
        if self.opens {
            Ok(())
        } else {
            Err(anyhow!("peripheral refused the bond"))
        }
    }

    async fn exchange_mtu(&mut self, _target: u16) -> MtuOutcome {
        self.mtu
    }

    async fn resolve_endpoints(&mut self, _profile: &GattProfile) -> EndpointOutcome {
        self.endpoints
    }

    async fn enable_notifications(&mut self) -> Result<bool> {
        Ok(self.subscription_confirmed)
    }

    async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(8);
        let payloads = std::mem::take(&mut self.payloads);
        tokio::spawn(async move {
            for payload in payloads {
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            // Sender drops here: the link "goes away" once the script ends.
        });
        Ok(rx)
    }

    async fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A link that never completes its open, like a peripheral that never
/// calls back. Only teardown can move a session off it.
struct ParkedLink {
    close_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl GattLink for ParkedLink {
    async fn open(&mut self) -> Result<()> {
        std::future::pending().await
    }
    async fn exchange_mtu(&mut self, _target: u16) -> MtuOutcome {
        unreachable!()
    }
    async fn resolve_endpoints(&mut self, _profile: &GattProfile) -> EndpointOutcome {
        unreachable!()
    }
    async fn enable_notifications(&mut self) -> Result<bool> {
        unreachable!()
    }
    async fn notifications(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        unreachable!()
    }
    async fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn sensor() -> DiscoveredPeripheral {
    DiscoveredPeripheral::new(
        "AA:BB:CC:DD:EE:01".to_string(),
        "id-1".to_string(),
        Some("Sensor".to_string()),
        Some(-42),
    )
}

/// Runs the driver over `link` and applies every signal to a fresh session
/// machine, the way the manager's event loop does. Returns the machine and
/// the consumer events, in order.
async fn run_session(link: FakeLink) -> (ConnectionSession, Vec<BleEvent>) {
    let session_id = SessionId(1);
    let mut machine = ConnectionSession::new(sensor());
    let mut events = machine.begin();

    let (tx, mut rx) = mpsc::channel::<SessionSignal>(16);
    let cancel = CancellationToken::new();
    let driver = tokio::spawn(drive_session(
        link,
        session_id,
        GattProfile::default(),
        tx,
        cancel,
    ));

    while let Some(signal) = rx.recv().await {
        assert_eq!(signal.session, session_id);
        events.extend(machine.apply(signal.event));
    }
    driver.await.expect("driver panicked");
    (machine, events)
}

fn state_sequence(events: &[BleEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            BleEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn happy_path_streams_decoded_payloads() {
    let closes = Arc::new(AtomicUsize::new(0));
    let link = FakeLink::happy(vec![b"23.5".to_vec(), b"24.0".to_vec()], closes.clone());

    let (machine, events) = run_session(link).await;

    assert_eq!(
        state_sequence(&events),
        vec![
            SessionState::Connecting,
            SessionState::MtuNegotiating,
            SessionState::DiscoveringServices,
            SessionState::EnablingNotifications,
            SessionState::Ready,
            SessionState::Disconnected,
        ]
    );

    let payloads: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BleEvent::PayloadReceived { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(payloads, vec!["23.5", "24.0"]);

    assert_eq!(machine.state(), SessionState::Disconnected);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refused_bond_ends_in_disconnected_without_error() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut link = FakeLink::happy(Vec::new(), closes.clone());
    link.opens = false;

    let (machine, events) = run_session(link).await;

    assert_eq!(
        state_sequence(&events),
        vec![SessionState::Connecting, SessionState::Disconnected]
    );
    assert!(events.iter().all(|e| !matches!(e, BleEvent::Error { .. })));
    assert!(machine.last_error().is_none());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refused_mtu_still_reaches_ready() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut link = FakeLink::happy(vec![b"23.5".to_vec()], closes.clone());
    link.mtu = MtuOutcome {
        mtu: 23,
        granted: false,
    };

    let (machine, events) = run_session(link).await;

    assert!(state_sequence(&events).contains(&SessionState::Ready));
    assert_eq!(machine.mtu(), None); // cleared again by the final drop
    let payloads: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BleEvent::PayloadReceived { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(payloads, vec!["23.5"]);
}

#[tokio::test]
async fn missing_endpoints_fail_and_never_reach_ready() {
    for (failure, matches_reason) in [
        (
            LookupFailure::Service,
            (|e: &BleError| matches!(e, BleError::ServiceNotFound { .. }))
                as fn(&BleError) -> bool,
        ),
        (LookupFailure::Characteristic, |e: &BleError| {
            matches!(e, BleError::CharacteristicNotFound { .. })
        }),
        (LookupFailure::Descriptor, |e: &BleError| {
            matches!(e, BleError::DescriptorNotFound { .. })
        }),
    ] {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut link = FakeLink::happy(Vec::new(), closes.clone());
        link.endpoints = EndpointOutcome::Missing(failure);

        let (machine, events) = run_session(link).await;

        assert_eq!(machine.state(), SessionState::Failed);
        assert!(!state_sequence(&events).contains(&SessionState::Ready));
        assert!(matches_reason(machine.last_error().expect("reason recorded")));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn unconfirmed_subscription_is_surfaced_but_not_fatal() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut link = FakeLink::happy(vec![b"23.5".to_vec()], closes.clone());
    link.subscription_confirmed = false;

    let (_, events) = run_session(link).await;

    let ready_status = events
        .iter()
        .find_map(|e| match e {
            BleEvent::StateChanged {
                state: SessionState::Ready,
                status,
            } => Some(status.clone()),
            _ => None,
        })
        .expect("session reached ready");
    assert!(ready_status.contains("not confirmed"));
}

#[tokio::test]
async fn non_text_payload_degrades_to_placeholder() {
    let closes = Arc::new(AtomicUsize::new(0));
    let link = FakeLink::happy(vec![vec![0xFF, 0xFE, 0x80]], closes.clone());

    let (_, events) = run_session(link).await;

    let payloads: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BleEvent::PayloadReceived { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(payloads, vec![String::new()]);
}

#[tokio::test]
async fn cancellation_releases_the_link_exactly_once() {
    let closes = Arc::new(AtomicUsize::new(0));

    let (tx, mut rx) = mpsc::channel::<SessionSignal>(16);
    let cancel = CancellationToken::new();
    let driver = tokio::spawn(drive_session(
        ParkedLink {
            close_calls: closes.clone(),
        },
        SessionId(7),
        GattProfile::default(),
        tx,
        cancel.clone(),
    ));

    cancel.cancel();
    driver.await.expect("driver panicked");
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    // No signal was ever produced for the parked session.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn new_session_tears_the_previous_one_down_first() {
    let first_closes = Arc::new(AtomicUsize::new(0));
    let second_closes = Arc::new(AtomicUsize::new(0));

    let events = EventSink::new(64);
    let mut rx = events.subscribe();
    let mut host = SessionHost::new(events);

    // First session parks in Connecting; its link is still held.
    host.start_session(
        sensor(),
        ParkedLink {
            close_calls: first_closes.clone(),
        },
    )
    .await;
    assert_eq!(host.session_state().await, Some(SessionState::Connecting));
    assert_eq!(first_closes.load(Ordering::SeqCst), 0);

    // Starting a second session must release the first link before the
    // second is installed, so two sessions never coexist.
    host.start_session(
        DiscoveredPeripheral::new(
            "AA:BB:CC:DD:EE:02".to_string(),
            "id-2".to_string(),
            Some("Other".to_string()),
            Some(-50),
        ),
        FakeLink::happy(vec![b"23.5".to_vec()], second_closes.clone()),
    )
    .await;
    assert_eq!(first_closes.load(Ordering::SeqCst), 1);

    // The second session runs to completion, untouched by the first.
    let mut states = Vec::new();
    let mut payloads = Vec::new();
    while states.len() < 8 {
        match rx.recv().await.expect("event channel stayed open") {
            BleEvent::StateChanged { state, .. } => states.push(state),
            BleEvent::PayloadReceived { text } => payloads.push(text),
            _ => {}
        }
    }
    assert_eq!(
        states,
        vec![
            // First session: parked, then torn down.
            SessionState::Connecting,
            SessionState::Disconnected,
            // Second session: the full path.
            SessionState::Connecting,
            SessionState::MtuNegotiating,
            SessionState::DiscoveringServices,
            SessionState::EnablingNotifications,
            SessionState::Ready,
            SessionState::Disconnected,
        ]
    );
    assert_eq!(payloads, vec!["23.5"]);
    assert_eq!(second_closes.load(Ordering::SeqCst), 1);

    host.teardown().await;
    host.shutdown();
}

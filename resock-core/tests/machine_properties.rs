//! Generated-sequence properties over the pure state machine.
//!
//! The machine performs no I/O, so arbitrary event interleavings can be
//! driven without a runtime and its invariants checked after every step.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use url::Url;

use resock_core::machine::{Action, Event, Machine};
use resock_core::{ClientConfig, ConnectionStatus, TransportError, TransportErrorKind};

const MAX_ATTEMPTS: u32 = 5;

fn config() -> ClientConfig {
    ClientConfig::default().with_max_reconnect_attempts(MAX_ATTEMPTS)
}

fn arb_event() -> impl Strategy<Value = Event> {
    let close = (
        prop_oneof![
            Just(1000u16),
            Just(1001),
            Just(1006),
            Just(1008),
            Just(1011),
            Just(1013),
            3000..5000u16,
        ],
        any::<bool>(),
    )
        .prop_map(|(code, was_clean)| Event::Close {
            code,
            reason: String::new(),
            was_clean,
        });

    let lifecycle = prop_oneof![
        Just(Event::Connect {
            url: Url::parse("ws://fuzz.test/ws").unwrap(),
            protocols: Vec::new(),
        }),
        Just(Event::Open),
        Just(Event::Error(TransportError::new(
            TransportErrorKind::ConnectionReset,
            "reset",
        ))),
        Just(Event::Error(TransportError::new(
            TransportErrorKind::Timeout,
            "slow",
        ))),
        Just(Event::Error(TransportError::new(
            TransportErrorKind::Protocol,
            "bad frame",
        ))),
        close,
        Just(Event::Disconnect {
            code: 1000,
            reason: String::new(),
        }),
        (1u32..10).prop_map(|attempt| Event::Retry { attempt }),
        Just(Event::MaxRetries),
    ];

    let traffic = prop_oneof![
        Just(Event::PingDue),
        Just(Event::Pong),
        Just(Event::PongDeadline),
        Just(Event::ConnectDeadline),
        Just(Event::Enqueued),
        Just(Event::DrainTick),
        Just(Event::Message("m".into())),
    ];

    prop_oneof![2 => lifecycle, 1 => traffic]
}

proptest! {
    /// For any event sequence: exactly one status is active (enforced by
    /// the type, asserted via the context coupling), the context exists
    /// exactly when a session does, and the attempt counter never exceeds
    /// the configured maximum.
    #[test]
    fn invariants_hold_for_any_event_sequence(
        events in prop::collection::vec(arb_event(), 1..200)
    ) {
        let mut machine = Machine::new(config());
        let base = Instant::now();
        for (step, event) in events.into_iter().enumerate() {
            let now = base + Duration::from_millis(step as u64 * 10);
            let actions = machine.handle(event, now);

            match machine.status() {
                ConnectionStatus::Disconnected => {
                    prop_assert!(machine.context().is_none());
                }
                _ => prop_assert!(machine.context().is_some()),
            }
            if let Some(ctx) = machine.context() {
                prop_assert!(ctx.reconnect_attempts <= MAX_ATTEMPTS);
            }
            for action in &actions {
                if let Action::ScheduleRetry { delay, attempt, .. } = action {
                    prop_assert!(*attempt >= 1);
                    prop_assert!(*attempt < MAX_ATTEMPTS);
                    prop_assert!(*delay >= Duration::from_millis(1_000));
                    prop_assert!(*delay <= Duration::from_millis(30_000));
                }
            }
        }
    }

    /// A retry is never scheduled after a fatal classification.
    #[test]
    fn fatal_failures_never_schedule_retries(
        prefix in prop::collection::vec(arb_event(), 0..50)
    ) {
        let mut machine = Machine::new(config());
        let now = Instant::now();
        for event in prefix {
            machine.handle(event, now);
        }
        let actions = machine.handle(
            Event::Error(TransportError::new(TransportErrorKind::Protocol, "bad")),
            now,
        );
        prop_assert!(
            !actions
                .iter()
                .any(|a| matches!(a, Action::ScheduleRetry { .. })),
            "non-retryable error must not schedule a retry"
        );
    }
}

/// Across an unbroken run of failures, scheduled backoff delays are
/// non-decreasing and bounded by the configured maximum.
#[test]
fn backoff_is_monotone_and_bounded_across_a_failure_run() {
    let config = ClientConfig::default()
        .with_max_reconnect_attempts(20)
        .with_reconnect_backoff_rate(2.0)
        .with_max_reconnect_delay(Duration::from_secs(8));
    let mut machine = Machine::new(config);
    let now = Instant::now();

    machine.handle(
        Event::Connect {
            url: Url::parse("ws://fuzz.test/ws").unwrap(),
            protocols: Vec::new(),
        },
        now,
    );

    let mut previous = Duration::ZERO;
    let mut saw_cap = false;
    for _ in 0..19 {
        let actions = machine.handle(
            Event::Error(TransportError::new(
                TransportErrorKind::ConnectionReset,
                "reset",
            )),
            now,
        );
        let (delay, attempt) = actions
            .iter()
            .find_map(|a| match a {
                Action::ScheduleRetry { delay, attempt, .. } => Some((*delay, *attempt)),
                _ => None,
            })
            .expect("run not yet exhausted");
        assert!(delay >= previous, "delay regressed at attempt {attempt}");
        assert!(delay <= Duration::from_secs(8));
        saw_cap |= delay == Duration::from_secs(8);
        previous = delay;

        machine.handle(Event::Retry { attempt }, now);
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
    }
    assert!(saw_cap, "cap never reached in 19 attempts");

    // The 20th failure exhausts the budget exactly once.
    machine.handle(
        Event::Error(TransportError::new(
            TransportErrorKind::ConnectionReset,
            "reset",
        )),
        now,
    );
    assert_eq!(machine.status(), ConnectionStatus::Disconnected);
}

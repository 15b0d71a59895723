//! Call session integration tests, run against the in-memory signaling server

use stasis_orchestrator::application::{CallDispatcher, CallSession, SessionOutcome, SessionSettings};
use stasis_orchestrator::domain::call::{CallStart, LegState};
use stasis_orchestrator::domain::dial_plan::DialPlan;
use stasis_orchestrator::domain::shared::value_objects::LegId;
use stasis_orchestrator::infrastructure::memory::{MemoryLeg, MemorySignaling};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn dial_plan() -> DialPlan {
    let mut groups = HashMap::new();
    groups.insert("100".to_string(), vec!["1101".to_string(), "1102".to_string()]);
    DialPlan::new("PJSIP/{}", groups)
}

fn settings() -> SessionSettings {
    SessionSettings {
        originate_app: "callChildrens".to_string(),
        ring_timeout: Duration::from_secs(20),
    }
}

fn session(signaling: &MemorySignaling) -> CallSession {
    CallSession::new(Arc::new(signaling.clone()), Arc::new(dial_plan()), settings())
}

fn call_start(dialed: &str) -> CallStart {
    CallStart::new(LegId::new("inbound"), "2000", vec![dialed.to_string()])
        .with_application("stasis-orchestrator")
}

async fn until_down(leg: &Arc<MemoryLeg>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while leg.state() != LegState::Down {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("leg never went down");
}

#[tokio::test]
async fn test_ring_group_bridges_first_answer() {
    let signaling = MemorySignaling::new();
    let inbound = signaling.add_leg("inbound", LegState::Ringing);

    let task = tokio::spawn(session(&signaling).run(call_start("100"), CancellationToken::new()));

    let first = signaling.wait_for_originated("PJSIP/1101").await;
    let second = signaling.wait_for_originated("PJSIP/1102").await;
    second.set_state(LegState::Ringing);
    second.set_state(LegState::Up);

    let outcome = task.await.unwrap();
    let SessionOutcome::Bridged { bridge } = outcome else {
        panic!("expected a bridge, got {:?}", outcome);
    };
    assert_eq!(bridge.members(), &[inbound.leg_id().clone(), second.leg_id().clone()]);

    assert_eq!(inbound.answer_count(), 1);
    assert_eq!(inbound.state(), LegState::Up);
    assert_eq!(first.hangup_count(), 1);
    assert_eq!(first.state(), LegState::Down);
    assert_eq!(second.hangup_count(), 0);

    let requests = signaling.originate_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.caller_identity == "2000" && r.app == "callChildrens"));
}

#[tokio::test]
async fn test_direct_extension_bridges_two_legs() {
    let signaling = MemorySignaling::new();
    let inbound = signaling.add_leg("inbound", LegState::Ringing);

    let task = tokio::spawn(session(&signaling).run(call_start("1103"), CancellationToken::new()));

    let callee = signaling.wait_for_originated("PJSIP/1103").await;
    callee.set_state(LegState::Up);

    match task.await.unwrap() {
        SessionOutcome::Bridged { bridge } => {
            assert_eq!(bridge.len(), 2);
            assert_eq!(bridge.members()[0], *inbound.leg_id());
            assert_eq!(bridge.members()[1], *callee.leg_id());
        }
        other => panic!("expected a bridge, got {:?}", other),
    }
    assert_eq!(signaling.bridges().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_nobody_answers() {
    let signaling = MemorySignaling::new();
    let inbound = signaling.add_leg("inbound", LegState::Ringing);

    let started = Instant::now();
    let outcome = session(&signaling)
        .run(call_start("100"), CancellationToken::new())
        .await;

    assert_eq!(outcome, SessionOutcome::NoWinner);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(signaling.bridges().is_empty());
    assert_eq!(inbound.answer_count(), 0);

    let legs = signaling.originated();
    assert_eq!(legs.len(), 2);
    for leg in legs {
        assert_eq!(leg.state(), LegState::Down);
        assert_eq!(leg.hangup_count(), 1);
    }
}

#[tokio::test]
async fn test_caller_hangup_cancels_the_race() {
    let signaling = MemorySignaling::new();
    let inbound = signaling.add_leg("inbound", LegState::Ringing);

    let task = tokio::spawn(session(&signaling).run(call_start("100"), CancellationToken::new()));

    let first = signaling.wait_for_originated("PJSIP/1101").await;
    let second = signaling.wait_for_originated("PJSIP/1102").await;
    inbound.remote_hangup();

    assert_eq!(task.await.unwrap(), SessionOutcome::Aborted);
    assert_eq!(first.hangup_count(), 1);
    assert_eq!(second.hangup_count(), 1);
    assert!(signaling.bridges().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_caller_hangup_as_callee_answers_leaves_no_leg_up() {
    for _ in 0..40 {
        let signaling = MemorySignaling::new();
        let inbound = signaling.add_leg("inbound", LegState::Ringing);

        let start = call_start("1103");
        let task = tokio::spawn(session(&signaling).run(start, CancellationToken::new()));
        let callee = signaling.wait_for_originated("PJSIP/1103").await;
        callee.set_state(LegState::Up);
        inbound.remote_hangup();

        let outcome = task.await.unwrap();
        assert!(!matches!(outcome, SessionOutcome::NoWinner), "{:?}", outcome);
        until_down(&callee).await;
        assert_eq!(inbound.state(), LegState::Down);
    }
}

#[tokio::test]
async fn test_caller_hangup_racing_the_answer_aborts() {
    let signaling = MemorySignaling::new();
    let inbound = signaling.add_leg("inbound", LegState::Ringing);

    let task = tokio::spawn(session(&signaling).run(call_start("1103"), CancellationToken::new()));
    let callee = signaling.wait_for_originated("PJSIP/1103").await;
    // both land before the session runs again
    callee.set_state(LegState::Up);
    inbound.remote_hangup();

    assert_eq!(task.await.unwrap(), SessionOutcome::Aborted);
    assert_eq!(callee.hangup_count(), 1);
    assert_eq!(callee.state(), LegState::Down);
    assert!(signaling.bridges().is_empty());
}

#[tokio::test]
async fn test_bridged_legs_share_one_lifetime() {
    let signaling = MemorySignaling::new();
    let inbound = signaling.add_leg("inbound", LegState::Ringing);

    let task = tokio::spawn(session(&signaling).run(call_start("1103"), CancellationToken::new()));
    let callee = signaling.wait_for_originated("PJSIP/1103").await;
    callee.set_state(LegState::Up);
    assert!(matches!(task.await.unwrap(), SessionOutcome::Bridged { .. }));

    callee.remote_hangup();
    until_down(&inbound).await;
    assert_eq!(inbound.hangup_count(), 1);
    assert_eq!(callee.hangup_count(), 0);
}

#[tokio::test]
async fn test_bridge_failure_ends_the_session_only() {
    let signaling = MemorySignaling::new();
    signaling.fail_bridge_creation();
    signaling.add_leg("inbound", LegState::Ringing);

    let task = tokio::spawn(session(&signaling).run(call_start("1103"), CancellationToken::new()));
    signaling.wait_for_originated("PJSIP/1103").await.set_state(LegState::Up);

    match task.await.unwrap() {
        SessionOutcome::Failed(e) => assert!(e.sequence_failure().is_some()),
        other => panic!("expected a failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dispatcher_runs_sessions_independently() {
    let signaling = MemorySignaling::new();
    let caller_a = signaling.add_leg("caller-a", LegState::Ringing);
    let caller_b = signaling.add_leg("caller-b", LegState::Ringing);
    let dispatcher = Arc::new(CallDispatcher::new(Arc::new(signaling.clone()), dial_plan(), settings()));

    let (tx, rx) = mpsc::unbounded_channel();
    let stop = CancellationToken::new();
    let runner = {
        let dispatcher = dispatcher.clone();
        let stop = stop.clone();
        tokio::spawn(async move { dispatcher.run(rx, stop).await })
    };

    // ignored: no arguments
    tx.send(CallStart::new(LegId::new("caller-x"), "2002", Vec::new())).unwrap();
    tx.send(CallStart::new(LegId::new("caller-a"), "2000", vec!["1201".to_string()])).unwrap();
    tx.send(CallStart::new(LegId::new("caller-b"), "2001", vec!["1202".to_string()])).unwrap();

    signaling.wait_for_originated("PJSIP/1201").await.set_state(LegState::Up);
    signaling.wait_for_originated("PJSIP/1202").await.set_state(LegState::Up);

    tokio::time::timeout(Duration::from_secs(5), async {
        while signaling.bridges().len() < 2 || dispatcher.active_sessions() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("sessions never bridged");

    assert_eq!(signaling.originate_requests().len(), 2);
    assert_eq!(caller_a.answer_count(), 1);
    assert_eq!(caller_b.answer_count(), 1);

    stop.cancel();
    runner.await.unwrap();
}

//! Supervision lifecycle tests against real child processes

use std::time::Duration;

use siteward::models::ProcessState;
use siteward::process::ProcessManager;
use siteward::supervisor::{shutdown_all, AttemptHistory, RestartDecision, RestartPolicy};

use crate::common::sleeper_service;

#[tokio::test]
async fn test_crash_restart_returns_to_running() {
    let mut manager = ProcessManager::new(vec![sleeper_service("brief", "0.2", true)]);
    manager.start("brief").await.unwrap();
    let first_pid = manager.get("brief").unwrap().pid.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!manager.check_alive("brief").await);

    // The supervisor's restart path: Degraded -> Restarting -> start
    manager.transition("brief", ProcessState::Degraded).unwrap();
    manager
        .transition("brief", ProcessState::Restarting)
        .unwrap();
    let new_pid = manager.start("brief").await.unwrap();

    let process = manager.get("brief").unwrap();
    assert_eq!(process.state, ProcessState::Running);
    assert_ne!(new_pid, first_pid);
    assert_eq!(process.restart_count, 1);

    shutdown_all(&mut manager, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_policy_terminal_after_limit_within_window() {
    let policy = RestartPolicy::new(Duration::from_secs(60), 3, Duration::from_millis(0));
    let mut history = AttemptHistory::default();

    for _ in 0..3 {
        assert_eq!(policy.decide(&mut history), RestartDecision::Restart);
        history.record();
    }
    assert_eq!(policy.decide(&mut history), RestartDecision::GiveUp);

    // Terminal means terminal: the decision does not flip back
    assert_eq!(policy.decide(&mut history), RestartDecision::GiveUp);
}

#[tokio::test]
async fn test_graceful_shutdown_zero_live_processes() {
    let mut manager = ProcessManager::new(vec![
        sleeper_service("proxyish", "30", true),
        sleeper_service("webish", "30", true),
        sleeper_service("converterish", "30", true),
    ]);
    manager.start_all().await.unwrap();
    assert_eq!(manager.live_count().await, 3);

    let report = shutdown_all(&mut manager, Duration::from_secs(5)).await;
    assert_eq!(report.failed, 0);
    assert_eq!(manager.live_count().await, 0);

    for process in manager.status() {
        assert_eq!(process.state, ProcessState::Stopped);
        assert!(process.pid.is_none());
    }
}

#[tokio::test]
async fn test_shutdown_completes_against_term_ignoring_process() {
    let mut stubborn = sleeper_service("stubborn", "30", true);
    stubborn.command = "sh".to_string();
    stubborn.args = vec!["-c".to_string(), "trap '' TERM; sleep 30".to_string()];

    let mut manager = ProcessManager::new(vec![stubborn]);
    manager.start_all().await.unwrap();

    let started = tokio::time::Instant::now();
    shutdown_all(&mut manager, Duration::from_millis(500)).await;

    assert_eq!(manager.live_count().await, 0);
    // Bounded: polite wait plus escalation, not a hang
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_launch_failure_surfaces_immediately() {
    let mut bad = sleeper_service("broken", "30", true);
    bad.command = "/nonexistent/binary".to_string();

    let mut manager = ProcessManager::new(vec![bad]);
    let err = manager.start("broken").await.unwrap_err();
    assert!(!err.is_recoverable());
    assert_eq!(manager.get("broken").unwrap().state, ProcessState::Stopped);
}

//! Integration tests for the Unix spawn and termination boundary
//!
//! These tests verify that tracked children:
//! - Honour the process-group and environment options of the spawn request
//! - Report signal termination in their exit record
//! - Surface spawn failures as `SpawnFailure`

#![cfg(unix)]
#![allow(unused_crate_dependencies)]

use procwatch_core::{
    CoreError, EngineConfig, ProcessRegistry, ProcessTable, SpawnRequest, Termination,
    UnixProcessTable,
};
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn registry() -> ProcessRegistry {
    ProcessRegistry::unix(EngineConfig::default()).expect("registry")
}

/// Test that a child can be placed in its own process group
#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_process_group_isolation() {
    use nix::unistd::{getpgid, getpgrp, Pid};

    let registry = registry();
    let child = registry
        .spawn(&SpawnRequest::new(["sleep", "5"]).process_group(true))
        .expect("spawn sleep");

    let child_pgid = getpgid(Some(Pid::from_raw(child.pid() as i32))).expect("getpgid");
    assert_eq!(child_pgid.as_raw(), child.pid() as i32);
    assert_ne!(child_pgid, getpgrp());

    registry.destroy_forcibly(&child).expect("kill sleep");
    timeout(WAIT, registry.on_exit(&child))
        .await
        .expect("sleep did not exit")
        .expect("watch failed");
}

/// Test that environment overrides reach the child
#[tokio::test(flavor = "multi_thread")]
async fn test_environment_override() {
    let registry = registry();
    let child = registry
        .spawn(&SpawnRequest::new(["sh", "-c", "exit $PROCWATCH_CODE"]).env("PROCWATCH_CODE", "7"))
        .expect("spawn sh");

    let exit = timeout(WAIT, registry.on_exit(&child))
        .await
        .expect("sh did not exit")
        .expect("watch failed");
    assert_eq!(exit.record.exit_code, Some(7));
    assert!(exit.record.is_failure());
}

/// Test that SIGKILL and SIGTERM are recorded as signals, not exit codes
#[tokio::test(flavor = "multi_thread")]
async fn test_signal_termination_recorded() {
    let registry = registry();

    let killed = registry
        .spawn(&SpawnRequest::new(["sleep", "30"]))
        .expect("spawn sleep");
    assert_eq!(
        registry.destroy_forcibly(&killed).expect("kill"),
        Termination::Requested
    );
    let exit = timeout(WAIT, registry.on_exit(&killed))
        .await
        .expect("sleep did not exit")
        .expect("watch failed");
    assert_eq!(exit.record.exit_code, None);
    assert_eq!(exit.record.signal, Some(9));
    assert_eq!(exit.record.exit_value(), Some(137));

    let termed = registry
        .spawn(&SpawnRequest::new(["sleep", "30"]))
        .expect("spawn sleep");
    registry.destroy(&termed).expect("term");
    let exit = timeout(WAIT, registry.on_exit(&termed))
        .await
        .expect("sleep did not exit")
        .expect("watch failed");
    assert_eq!(exit.record.signal, Some(15));
}

/// Test spawn failures
#[tokio::test]
async fn test_spawn_failures() {
    let registry = registry();

    let err = registry
        .spawn(&SpawnRequest::new(["/nonexistent/procwatch-binary"]))
        .unwrap_err();
    assert!(matches!(err, CoreError::SpawnFailure(_)));
    assert_eq!(err.code(), "PROC003");

    let err = registry.spawn(&SpawnRequest::default()).unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
}

/// Test that the process table sees spawned children under this process
#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn test_table_reports_parent() {
    let registry = registry();
    let child = registry
        .spawn(&SpawnRequest::new(["sleep", "5"]))
        .expect("spawn sleep");

    let table = UnixProcessTable::new();
    assert_eq!(table.query_parent(child.pid()), Some(std::process::id()));
    assert!(child.start_time().is_some());
    assert!(table
        .snapshot()
        .iter()
        .any(|stat| stat.pid == child.pid() && stat.ppid == std::process::id()));

    registry.destroy_forcibly(&child).expect("kill sleep");
    timeout(WAIT, registry.on_exit(&child))
        .await
        .expect("sleep did not exit")
        .expect("watch failed");
}

//! Dispatcher runs against fake tool scripts standing in for pymobiledevice3.
#![cfg(unix)]

use logical_backup::{
    CommandDispatcher, Config, FailureKind, LogicalBackupError, Operation, ProgressEstimate,
    RunEvent, RunOutcome, RunState,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-pymobiledevice3");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn dispatcher_for(tool: &Path) -> (CommandDispatcher, UnboundedReceiver<RunEvent>) {
    let mut config = Config::default();
    config.tool.program = tool.to_string_lossy().into_owned();
    let (tx, rx) = unbounded_channel();
    (CommandDispatcher::new(&config, tx), rx)
}

fn drain(rx: &mut UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn log_lines(events: &[RunEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Log { line } => Some(line.as_str()),
            _ => None,
        })
        .collect()
}

fn progress_values(events: &[RunEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Progress { percent } => Some(percent.percent()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_successful_backup_completes_once() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(
        temp_dir.path(),
        r#"echo "args: $*"
echo " 42%|####      | 42/100 [00:01<00:02, 30.00it/s]"
echo "Backup completed successfully""#,
    );
    let destination = temp_dir.path().join("phone");
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    let handle = dispatcher
        .dispatch(Some(Operation::Backup), Some(&destination))
        .unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(dispatcher.state(), RunState::Succeeded);
    assert!(destination.is_dir());
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.destination.as_deref(), Some(destination.as_path()));

    let events = drain(&mut rx);
    let lines = log_lines(&events);
    assert!(lines[0].starts_with("Starting backup to "));
    assert_eq!(
        lines[1],
        format!("args: backup2 backup --full {}", destination.display())
    );
    assert!(lines.contains(&"Backup completed successfully"));
    assert_eq!(progress_values(&events), vec![42]);

    let completions: Vec<&String> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Completed { summary } => Some(summary),
            _ => None,
        })
        .collect();
    assert_eq!(completions.len(), 1);
    assert!(completions[0].contains(&destination.display().to_string()));
    assert!(matches!(events.last(), Some(RunEvent::Completed { .. })));
}

#[tokio::test]
async fn test_nonzero_exit_fails_without_completion() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(
        temp_dir.path(),
        "echo 'Looking for device'\necho 'ERROR: Device is not connected' >&2\nexit 1",
    );
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    let handle = dispatcher.dispatch(Some(Operation::ListDevices), None).unwrap();
    let result = handle.wait().await;

    match result {
        Err(LogicalBackupError::ToolExecutionFailure {
            exit_code,
            diagnostic,
            ..
        }) => {
            assert_eq!(exit_code, Some(1));
            assert_eq!(
                diagnostic.last().map(String::as_str),
                Some("ERROR: Device is not connected")
            );
        }
        other => panic!("expected tool failure, got {:?}", other),
    }
    assert_eq!(dispatcher.state(), RunState::Failed);

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|event| matches!(event, RunEvent::Completed { .. })));
    let failures: Vec<&RunEvent> = events
        .iter()
        .filter(|event| matches!(event, RunEvent::Failed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        RunEvent::Failed {
            kind: FailureKind::ToolExecution,
            ..
        }
    ));
    assert!(log_lines(&events).contains(&"Error listing connected devices."));
}

#[tokio::test]
async fn test_failed_run_still_reports() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(temp_dir.path(), "echo 'No device connected'\nexit 1");
    let (dispatcher, _rx) = dispatcher_for(&tool);

    let result = dispatcher
        .dispatch(Some(Operation::ListDevices), None)
        .unwrap()
        .finish()
        .await
        .unwrap();

    assert!(matches!(
        result.error,
        Some(LogicalBackupError::ToolExecutionFailure { .. })
    ));
    let report = result.report;
    assert_eq!(
        report.outcome,
        RunOutcome::Failed {
            kind: FailureKind::ToolExecution
        }
    );
    assert_eq!(report.exit_code, Some(1));
    assert_eq!(report.lines_relayed, 1);
    assert!(report.summary.contains("No device connected"));
}

#[tokio::test]
async fn test_stdout_and_stderr_keep_emission_order() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(
        temp_dir.path(),
        "echo out1\necho err1 >&2\necho out2\necho err2 >&2",
    );
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    dispatcher
        .dispatch(Some(Operation::ListDevices), None)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let events = drain(&mut rx);
    let lines = log_lines(&events);
    let tool_lines: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| line.starts_with("out") || line.starts_with("err"))
        .collect();
    assert_eq!(tool_lines, vec!["out1", "err1", "out2", "err2"]);
}

#[tokio::test]
async fn test_second_dispatch_while_running_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let counter = temp_dir.path().join("launches");
    let tool = fake_tool(
        temp_dir.path(),
        &format!("echo launched >> '{}'\nsleep 1", counter.display()),
    );
    let (dispatcher, _rx) = dispatcher_for(&tool);

    let first = dispatcher.dispatch(Some(Operation::ListDevices), None).unwrap();
    assert!(dispatcher.is_busy());

    let second = dispatcher.dispatch(Some(Operation::ListDevices), None);
    assert!(matches!(second, Err(LogicalBackupError::Busy)));

    first.wait().await.unwrap();
    assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 1);

    // Idle again once the run is over
    dispatcher
        .dispatch(Some(Operation::ListDevices), None)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn test_ansi_sequences_are_stripped() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(
        temp_dir.path(),
        r"printf '\033[1;32mDevice found\033[0m\n'",
    );
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    dispatcher
        .dispatch(Some(Operation::ListDevices), None)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let events = drain(&mut rx);
    let lines = log_lines(&events);
    assert!(lines.contains(&"Device found"));
    assert!(lines.iter().all(|line| !line.contains('\x1b')));
}

#[tokio::test]
async fn test_carriage_return_redraws_become_progress() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(
        temp_dir.path(),
        r"printf ' 10%%|#         | 10/100\r 10%%|#         | 10/100\r 55%%|#####     | 55/100\r100%%|##########| 100/100\n'",
    );
    let destination = temp_dir.path().join("backup");
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    let report = dispatcher
        .dispatch(Some(Operation::Backup), Some(&destination))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let events = drain(&mut rx);
    // Repeated redraws at the same value are reported once
    assert_eq!(progress_values(&events), vec![10, 55, 100]);
    assert_eq!(report.last_progress.map(|p| p.percent()), Some(100));
}

#[tokio::test]
async fn test_custom_progress_parser_replaces_default() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(temp_dir.path(), "echo 'files 3 of 4'\necho 'ratio 90%'");
    let destination = temp_dir.path().join("backup");
    let (dispatcher, mut rx) = dispatcher_for(&tool);
    let dispatcher = dispatcher.with_parser(|line: &str| {
        let rest = line.strip_prefix("files ")?;
        let (done, total) = rest.split_once(" of ")?;
        let done: u32 = done.parse().ok()?;
        let total: u32 = total.parse().ok()?;
        ProgressEstimate::new((done * 100 / total) as u8)
    });

    dispatcher
        .dispatch(Some(Operation::Backup), Some(&destination))
        .unwrap()
        .wait()
        .await
        .unwrap();

    // The default percent scraping is gone along with the default parser
    assert_eq!(progress_values(&drain(&mut rx)), vec![75]);
}

#[tokio::test]
async fn test_cancel_kills_the_tool() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(temp_dir.path(), "echo started\nexec sleep 30");
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    let handle = dispatcher.dispatch(Some(Operation::ListDevices), None).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("cancelled run did not finish");
    assert!(matches!(result, Err(LogicalBackupError::Cancelled)));
    assert_eq!(dispatcher.state(), RunState::Failed);

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::Failed {
            kind: FailureKind::Cancelled,
            ..
        }
    )));
}

#[tokio::test]
async fn test_placeholder_selection_starts_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let counter = temp_dir.path().join("launches");
    let tool = fake_tool(
        temp_dir.path(),
        &format!("echo launched >> '{}'", counter.display()),
    );
    let (dispatcher, mut rx) = dispatcher_for(&tool);

    let result = dispatcher.dispatch_selection(Some("Select Options"), "");
    assert!(matches!(
        result,
        Err(LogicalBackupError::Configuration { .. })
    ));
    assert_eq!(dispatcher.state(), RunState::Idle);
    assert!(drain(&mut rx).is_empty());
    assert!(!counter.exists());
}

#[tokio::test]
async fn test_cancel_reaches_tool_after_output_closes() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("finished");
    let tool = fake_tool(
        temp_dir.path(),
        &format!(
            "echo ready\nexec >/dev/null 2>&1\nsleep 1\ntouch '{}'\nexit 0",
            marker.display()
        ),
    );
    let (dispatcher, _rx) = dispatcher_for(&tool);

    let handle = dispatcher.dispatch(Some(Operation::ListDevices), None).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handle.cancel().unwrap());

    let result = tokio::time::timeout(Duration::from_secs(10), handle.finish())
        .await
        .expect("cancelled run did not finish")
        .unwrap();
    assert!(matches!(result.error, Some(LogicalBackupError::Cancelled)));
    assert_eq!(
        result.report.outcome,
        RunOutcome::Failed {
            kind: FailureKind::Cancelled
        }
    );

    // The shell was killed before it could reach the touch
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_cancel_after_clean_exit_keeps_success() {
    let temp_dir = TempDir::new().unwrap();
    let tool = fake_tool(temp_dir.path(), "echo done");
    let (dispatcher, _rx) = dispatcher_for(&tool);

    let handle = dispatcher.dispatch(Some(Operation::ListDevices), None).unwrap();
    let token = handle.cancel_token();
    let report = handle.wait().await.unwrap();

    assert!(!token.cancel().unwrap());
    assert!(report.is_success());
    assert_eq!(dispatcher.state(), RunState::Succeeded);
}

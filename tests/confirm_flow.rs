//! End-to-end tests for the confirmation loop: resolved commands go in,
//! execution results and surface events come out, with a stub runner in
//! place of the real shell.

use hark::config::ExecutionOptions;
use hark::confirm::{
    CommandSource, ConfirmController, ConfirmInput, ConfirmSettings, ExecutionResult,
    ResolvedCommand, SurfaceEvent, run_confirm_loop,
};
use hark::history;
use hark::runner::{CommandRunner, ExecError};
use std::sync::Arc;
use std::time::Duration;

struct StubRunner {
    /// stderr text to fail with; None means success
    fail_with: Option<String>,
}

impl CommandRunner for StubRunner {
    fn run(&self, command_text: &str, _options: &ExecutionOptions) -> Result<String, ExecError> {
        match &self.fail_with {
            Some(output) => Err(ExecError::Failed {
                output: output.clone(),
            }),
            None => Ok(format!("ran: {}", command_text)),
        }
    }
}

struct Harness {
    show_tx: flume::Sender<ResolvedCommand>,
    input_tx: flume::Sender<ConfirmInput>,
    surface_rx: flume::Receiver<SurfaceEvent>,
    result_rx: flume::Receiver<ExecutionResult>,
}

fn spawn_loop(settings: ConfirmSettings, runner: StubRunner) -> Harness {
    let (show_tx, show_rx) = flume::unbounded();
    let (input_tx, input_rx) = flume::unbounded();
    let (surface_tx, surface_rx) = flume::unbounded();
    let (result_tx, result_rx) = flume::unbounded();

    let controller = ConfirmController::new(settings, surface_tx, result_tx);
    tokio::spawn(run_confirm_loop(
        controller,
        show_rx,
        input_rx,
        Arc::new(runner),
    ));

    Harness {
        show_tx,
        input_tx,
        surface_rx,
        result_rx,
    }
}

fn matched(command_text: &str) -> ResolvedCommand {
    ResolvedCommand {
        source: CommandSource::Matched,
        command_text: command_text.to_string(),
        spoken_text: "lock computer".to_string(),
        options: ExecutionOptions::default(),
    }
}

async fn recv_result(harness: &Harness) -> ExecutionResult {
    tokio::time::timeout(Duration::from_secs(5), harness.result_rx.recv_async())
        .await
        .expect("timed out waiting for an execution result")
        .expect("result channel closed")
}

async fn wait_for_event(
    harness: &Harness,
    matches: impl Fn(&SurfaceEvent) -> bool,
) -> SurfaceEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = harness
                .surface_rx
                .recv_async()
                .await
                .expect("surface channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for a surface event")
}

#[tokio::test]
async fn immediate_confirm_executes_and_reports() {
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: false,
            auto_run_seconds: 0,
        },
        StubRunner { fail_with: None },
    );

    harness.show_tx.send(matched("echo hi")).unwrap();
    harness.input_tx.send(ConfirmInput::Confirm).unwrap();

    let result = recv_result(&harness).await;
    assert!(!result.is_error);
    assert_eq!(result.output, "ran: echo hi");
    assert_eq!(result.spoken_text, "lock computer");

    wait_for_event(&harness, |e| matches!(e, SurfaceEvent::Completed { .. })).await;
}

#[tokio::test]
async fn double_press_triggers_exactly_one_execution() {
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: false,
            auto_run_seconds: 0,
        },
        StubRunner { fail_with: None },
    );

    harness.show_tx.send(matched("echo once")).unwrap();
    harness.input_tx.send(ConfirmInput::ConfirmPress).unwrap();
    harness.input_tx.send(ConfirmInput::ConfirmPress).unwrap();

    let result = recv_result(&harness).await;
    assert_eq!(result.output, "ran: echo once");

    // no second execution shows up
    let extra = tokio::time::timeout(Duration::from_millis(300), harness.result_rx.recv_async())
        .await;
    assert!(extra.is_err(), "only one execution expected");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auto_run_countdown_executes_and_logs() {
    // 1-second countdown, then the command runs with no further input and
    // the result lands in the bounded history
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: true,
            auto_run_seconds: 1,
        },
        StubRunner { fail_with: None },
    );

    let log = history::new_shared();
    let consumer = {
        let log = Arc::clone(&log);
        let result_rx = harness.result_rx.clone();
        std::thread::spawn(move || history::run_log_consumer(result_rx, log))
    };

    harness.show_tx.send(matched("loginctl lock-session")).unwrap();

    wait_for_event(&harness, |e| {
        matches!(e, SurfaceEvent::Completed { is_error: false, .. })
    })
    .await;

    // give the log consumer a moment to drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let entry = log.entries().next().unwrap();
        assert!(!entry.result.is_error);
        assert_eq!(entry.result.command_text, "loginctl lock-session");
    }

    // closing the gesture channels ends the loop, which drops the result
    // sender and lets the consumer finish
    drop(harness);
    tokio::time::sleep(Duration::from_millis(200)).await;
    consumer.join().unwrap();
}

#[tokio::test]
async fn failed_execution_expands_and_waits_for_dismiss() {
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: false,
            auto_run_seconds: 0,
        },
        StubRunner {
            fail_with: Some("access denied".to_string()),
        },
    );

    harness.show_tx.send(matched("cat /etc/shadow")).unwrap();
    harness.input_tx.send(ConfirmInput::Confirm).unwrap();

    let result = recv_result(&harness).await;
    assert!(result.is_error);
    assert_eq!(result.output, "access denied");

    wait_for_event(&harness, |e| matches!(e, SurfaceEvent::Expanded)).await;

    // well past the success auto-dismiss delay: still no dismissal
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(
        !harness
            .surface_rx
            .drain()
            .any(|e| matches!(e, SurfaceEvent::Dismissed)),
        "error view must stay until dismissed"
    );

    harness.input_tx.send(ConfirmInput::Cancel).unwrap();
    wait_for_event(&harness, |e| matches!(e, SurfaceEvent::Dismissed)).await;
}

#[tokio::test]
async fn successful_execution_auto_dismisses() {
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: false,
            auto_run_seconds: 0,
        },
        StubRunner { fail_with: None },
    );

    harness.show_tx.send(matched("echo hi")).unwrap();
    harness.input_tx.send(ConfirmInput::Confirm).unwrap();

    recv_result(&harness).await;
    // dismisses on its own roughly a second later
    wait_for_event(&harness, |e| matches!(e, SurfaceEvent::Dismissed)).await;
}

#[tokio::test]
async fn edited_text_is_what_runs() {
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: false,
            auto_run_seconds: 0,
        },
        StubRunner { fail_with: None },
    );

    harness.show_tx.send(matched("echo original")).unwrap();
    harness.input_tx.send(ConfirmInput::Edit).unwrap();
    harness
        .input_tx
        .send(ConfirmInput::EditedText("echo edited".to_string()))
        .unwrap();
    harness.input_tx.send(ConfirmInput::Confirm).unwrap();

    let result = recv_result(&harness).await;
    assert_eq!(result.command_text, "echo edited");
    assert_eq!(result.output, "ran: echo edited");
}

#[tokio::test]
async fn cancel_before_confirm_produces_no_result() {
    let harness = spawn_loop(
        ConfirmSettings {
            auto_run: false,
            auto_run_seconds: 0,
        },
        StubRunner { fail_with: None },
    );

    harness.show_tx.send(matched("echo never")).unwrap();
    harness.input_tx.send(ConfirmInput::Cancel).unwrap();

    wait_for_event(&harness, |e| matches!(e, SurfaceEvent::Dismissed)).await;
    let extra = tokio::time::timeout(Duration::from_millis(300), harness.result_rx.recv_async())
        .await;
    assert!(extra.is_err(), "cancel must not emit a result");
}

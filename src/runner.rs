//! Shell execution under explicit options with a hard wall-clock timeout
//!
//! Silent runs are fully hidden: output is captured through pipes and the
//! child is polled against a deadline, then killed and reaped if it runs
//! long. Non-silent runs open a visible shell and report the launch.

use crate::config::{ExecutionOptions, ShellVariant};
use crate::generator::UNSAFE_SENTINEL;
use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const LAUNCH_CONFIRMATION: &str = "Command launched in a visible shell window";
const NO_OUTPUT_CONFIRMATION: &str = "Command completed with no output";

/// Error type for command execution
#[derive(Debug)]
pub enum ExecError {
    /// Wall-clock bound exceeded; the process was killed, not orphaned
    Timeout(u64),
    /// Non-zero exit; carries stderr, or stdout when stderr was empty
    Failed { output: String },
    /// Empty or sentinel command text reached the runner
    Rejected(&'static str),
    /// The shell process could not be spawned or waited on
    Spawn(std::io::Error),
}

impl ExecError {
    /// Text recorded as the execution result's output
    pub fn into_output(self) -> String {
        match self {
            ExecError::Failed { output } => output,
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Timeout(seconds) => {
                write!(f, "Command timed out after {} seconds", seconds)
            }
            ExecError::Failed { output } => write!(f, "Command failed: {}", output),
            ExecError::Rejected(reason) => write!(f, "{}", reason),
            ExecError::Spawn(err) => write!(f, "Failed to start shell: {}", err),
        }
    }
}

impl std::error::Error for ExecError {}

/// Execution boundary the confirmation surface drives; the shell runner is
/// the real implementation, tests substitute their own.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command_text: &str, options: &ExecutionOptions) -> Result<String, ExecError>;
}

/// Runs command text through the configured shell
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command_text: &str, options: &ExecutionOptions) -> Result<String, ExecError> {
        let trimmed = command_text.trim();
        if trimmed.is_empty() || trimmed == UNSAFE_SENTINEL {
            // callers guard this; refuse anyway rather than hand it to a shell
            return Err(ExecError::Rejected(
                "refusing to execute empty or rejected command text",
            ));
        }

        if options.silent {
            run_captured(trimmed, options)
        } else {
            launch_window(trimmed, options)
        }
    }
}

/// Build the shell program and argument list for the given options.
///
/// Windows maps `Legacy`/`Modern` to powershell/pwsh with the usual profile,
/// policy, and window flags. Unix maps them to /bin/sh and $SHELL; the
/// execution policy has no unix equivalent and is ignored.
#[cfg(windows)]
pub fn build_invocation(command_text: &str, options: &ExecutionOptions) -> (String, Vec<String>) {
    let program = match options.shell {
        ShellVariant::Legacy => "powershell",
        ShellVariant::Modern => "pwsh",
    };
    let mut args = vec!["-NoLogo".to_string()];
    if !options.load_profile {
        args.push("-NoProfile".to_string());
    }
    if let Some(policy) = &options.execution_policy {
        args.push("-ExecutionPolicy".to_string());
        args.push(policy.clone());
    }
    if options.silent {
        args.push("-NonInteractive".to_string());
        args.push("-WindowStyle".to_string());
        args.push("Hidden".to_string());
    }
    args.push("-Command".to_string());
    args.push(command_text.to_string());
    (program.to_string(), args)
}

#[cfg(not(windows))]
pub fn build_invocation(command_text: &str, options: &ExecutionOptions) -> (String, Vec<String>) {
    let program = match options.shell {
        ShellVariant::Legacy => "/bin/sh".to_string(),
        ShellVariant::Modern => {
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
        }
    };
    let mut args = Vec::new();
    if options.load_profile {
        args.push("-l".to_string());
    }
    args.push("-c".to_string());
    args.push(command_text.to_string());
    (program, args)
}

fn base_command(command_text: &str, options: &ExecutionOptions) -> Command {
    let (program, args) = build_invocation(command_text, options);
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = &options.working_directory {
        cmd.current_dir(dir);
    }
    cmd
}

/// Hidden execution: capture output, enforce the timeout, classify the exit
fn run_captured(command_text: &str, options: &ExecutionOptions) -> Result<String, ExecError> {
    debug!(command = %command_text, timeout = options.timeout_seconds, "running captured");

    let mut cmd = base_command(command_text, options);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + Duration::from_secs(options.timeout_seconds);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(command = %command_text, "timeout reached, killing process");
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(ExecError::Timeout(options.timeout_seconds));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::Spawn(err));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if status.success() {
        let output = stdout.trim();
        if output.is_empty() {
            Ok(NO_OUTPUT_CONFIRMATION.to_string())
        } else {
            Ok(output.to_string())
        }
    } else {
        let output = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(ExecError::Failed { output })
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    })
}

/// Visible execution: open a console window for the shell and report launch
#[cfg(windows)]
fn launch_window(command_text: &str, options: &ExecutionOptions) -> Result<String, ExecError> {
    debug!(command = %command_text, "launching in a console window");
    let (program, args) = build_invocation(command_text, options);
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg("start").arg("").arg(program).args(args);
    if let Some(dir) = &options.working_directory {
        cmd.current_dir(dir);
    }
    cmd.spawn().map_err(ExecError::Spawn)?;
    Ok(LAUNCH_CONFIRMATION.to_string())
}

/// Visible execution on unix: detach the child; there is no window contract
/// to manage, so the launch itself is the reported outcome
#[cfg(not(windows))]
fn launch_window(command_text: &str, options: &ExecutionOptions) -> Result<String, ExecError> {
    debug!(command = %command_text, "launching detached");
    let mut cmd = base_command(command_text, options);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd.spawn().map_err(ExecError::Spawn)?;
    Ok(LAUNCH_CONFIRMATION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExecutionOptions {
        ExecutionOptions {
            timeout_seconds: 5,
            ..ExecutionOptions::default()
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        let result = ShellRunner.run("   ", &options());
        assert!(matches!(result, Err(ExecError::Rejected(_))));
    }

    #[test]
    fn test_sentinel_rejected() {
        let result = ShellRunner.run(UNSAFE_SENTINEL, &options());
        assert!(matches!(result, Err(ExecError::Rejected(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_invocation_legacy_shell() {
        let (program, args) = build_invocation("echo hi", &options());
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c".to_string(), "echo hi".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_invocation_load_profile_flag() {
        let opts = ExecutionOptions {
            load_profile: true,
            ..options()
        };
        let (_, args) = build_invocation("echo hi", &opts);
        assert_eq!(args[0], "-l");
    }

    #[cfg(unix)]
    #[test]
    fn test_captured_stdout() {
        let result = ShellRunner.run("echo hello", &options());
        assert_eq!(result.unwrap(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_captured_no_output_confirmation() {
        let result = ShellRunner.run("true", &options());
        assert_eq!(result.unwrap(), NO_OUTPUT_CONFIRMATION);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let result = ShellRunner.run("echo 'access denied' >&2; exit 3", &options());
        match result {
            Err(ExecError::Failed { output }) => assert_eq!(output, "access denied"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_falls_back_to_stdout() {
        let result = ShellRunner.run("echo 'only stdout'; exit 1", &options());
        match result {
            Err(ExecError::Failed { output }) => assert_eq!(output, "only stdout"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_process() {
        let opts = ExecutionOptions {
            timeout_seconds: 1,
            ..options()
        };
        let started = Instant::now();
        let result = ShellRunner.run("sleep 10", &opts);
        assert!(matches!(result, Err(ExecError::Timeout(1))));
        // well under the sleep duration, so the child was actually killed
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_working_directory_honored() {
        let opts = ExecutionOptions {
            working_directory: Some(std::env::temp_dir()),
            ..options()
        };
        let result = ShellRunner.run("pwd", &opts).unwrap();
        let expected = std::env::temp_dir();
        let reported = std::path::Path::new(&result);
        // resolve symlinks (/tmp may be /private/tmp)
        assert_eq!(
            reported.canonicalize().unwrap(),
            expected.canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_visible_launch_reports_confirmation() {
        let opts = ExecutionOptions {
            silent: false,
            ..options()
        };
        let result = ShellRunner.run("true", &opts);
        assert_eq!(result.unwrap(), LAUNCH_CONFIRMATION);
    }

    #[test]
    fn test_error_output_text() {
        let failed = ExecError::Failed {
            output: "access denied".to_string(),
        };
        assert_eq!(failed.into_output(), "access denied");
        assert!(ExecError::Timeout(7).into_output().contains("7 seconds"));
    }
}

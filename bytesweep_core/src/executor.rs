use log::{debug, warn};
use std::fs::{self, File};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Exit code reported for an in-process harness that panicked, matching what
/// a Rust binary returns when it panics.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Polling interval used while waiting on a target with a timeout.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How the target process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by a signal (unix only).
    Signaled(i32),
    /// Killed by the harness after the configured timeout. Never produced when
    /// no timeout is configured.
    TimedOut,
}

impl ExecutionStatus {
    /// `true` for a non-zero exit or a signal. A timeout is not a failure.
    pub fn is_failure(&self) -> bool {
        match self {
            ExecutionStatus::Exited(code) => *code != 0,
            ExecutionStatus::Signaled(_) => true,
            ExecutionStatus::TimedOut => false,
        }
    }

    fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExecutionStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExecutionStatus::Signaled(signal);
            }
        }
        // Neither a code nor a signal: treat as a generic failure.
        ExecutionStatus::Exited(-1)
    }
}

/// The uniform result of running the target once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Combined stdout and stderr of the target, trimmed.
    pub diagnostic: String,
}

impl ExecutionOutcome {
    pub fn new(status: ExecutionStatus, diagnostic: impl AsRef<str>) -> Self {
        Self {
            status,
            diagnostic: diagnostic.as_ref().trim().to_string(),
        }
    }

    pub fn passed() -> Self {
        Self::new(ExecutionStatus::Exited(0), "")
    }
}

/// Errors raised by the harness itself, as opposed to failures of the target.
///
/// None of these describe the target's behavior; a campaign that hits one
/// cannot trust any further outcome and stops.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to write mutant to staging file {path:?}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read mutant back from {path:?}: {source}")]
    ReadBack {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open capture file {path:?}: {source}")]
    Capture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to launch target {command:?}: {source}")]
    Launch {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },
    #[error("Error waiting for target: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Failed to kill timed-out target: {0}")]
    Kill(#[source] std::io::Error),
    #[error("Failed to resolve {path:?} for the target's working directory: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Target command is empty")]
    EmptyCommand,
}

/// Something that can be run against a file on disk.
///
/// `input` holds the mutant; `output` is where the target may write its own
/// artifact, which the harness never reads.
pub trait Target {
    fn run(&mut self, input: &Path, output: &Path) -> Result<ExecutionOutcome, HarnessError>;
}

/// Runs an external program as `<command...> <input> <output>`.
///
/// Stdout and stderr are both redirected into one capture file so their
/// interleaving is preserved, then read back after the process exits.
#[derive(Debug, Clone)]
pub struct CommandTarget {
    command: Vec<String>,
    capture_path: PathBuf,
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

impl CommandTarget {
    /// `command` is the program followed by any leading arguments.
    pub fn new(command: Vec<String>, capture_path: PathBuf) -> Result<Self, HarnessError> {
        if command.is_empty() {
            return Err(HarnessError::EmptyCommand);
        }
        Ok(Self {
            command,
            capture_path,
            timeout: None,
            working_dir: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, working_dir: Option<PathBuf>) -> Self {
        self.working_dir = working_dir;
        self
    }

    /// The child runs in `working_dir`, so paths relative to ours must be
    /// made absolute before they are handed over.
    fn path_for_child(&self, path: &Path) -> Result<PathBuf, HarnessError> {
        if self.working_dir.is_none() || path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        std::path::absolute(path).map_err(|source| HarnessError::Resolve {
            path: path.to_path_buf(),
            source,
        })
    }

    fn wait_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
    ) -> Result<ExecutionStatus, HarnessError> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(ExecutionStatus::from_exit_status(status)),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        warn!("Target exceeded {timeout:?}, killing it");
                        child.kill().map_err(HarnessError::Kill)?;
                        child.wait().map_err(HarnessError::Wait)?;
                        return Ok(ExecutionStatus::TimedOut);
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => return Err(HarnessError::Wait(e)),
            }
        }
    }

    fn read_capture(&self) -> Result<String, HarnessError> {
        let raw = fs::read(&self.capture_path).map_err(|source| HarnessError::Capture {
            path: self.capture_path.clone(),
            source,
        })?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

impl Target for CommandTarget {
    fn run(&mut self, input: &Path, output: &Path) -> Result<ExecutionOutcome, HarnessError> {
        let input = self.path_for_child(input)?;
        let output = self.path_for_child(output)?;
        let capture_error = |source: std::io::Error| HarnessError::Capture {
            path: self.capture_path.clone(),
            source,
        };
        let capture_out = File::create(&self.capture_path).map_err(capture_error)?;
        let capture_err = capture_out.try_clone().map_err(capture_error)?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::from(capture_out))
            .stderr(Stdio::from(capture_err));
        if let Some(cwd) = &self.working_dir {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| HarnessError::Launch {
            command: self.command.clone(),
            source,
        })?;

        let status = match self.timeout {
            Some(timeout) => self.wait_with_timeout(&mut child, timeout)?,
            None => ExecutionStatus::from_exit_status(child.wait().map_err(HarnessError::Wait)?),
        };

        let diagnostic = self.read_capture()?;
        Ok(ExecutionOutcome { status, diagnostic })
    }
}

/// Runs a Rust function over the staged mutant instead of a separate process.
///
/// The function reads nothing but the mutant bytes and returns the exit code
/// and diagnostic text it wants to report. A panic becomes a failure with
/// [`PANIC_EXIT_CODE`] and the panic message as diagnostic.
pub struct InProcessTarget<F>
where
    F: FnMut(&[u8]) -> (i32, String),
{
    harness_fn: F,
}

impl<F> InProcessTarget<F>
where
    F: FnMut(&[u8]) -> (i32, String),
{
    pub fn new(harness_fn: F) -> Self {
        Self { harness_fn }
    }
}

impl<F> Target for InProcessTarget<F>
where
    F: FnMut(&[u8]) -> (i32, String),
{
    fn run(&mut self, input: &Path, _output: &Path) -> Result<ExecutionOutcome, HarnessError> {
        let data = fs::read(input).map_err(|source| HarnessError::ReadBack {
            path: input.to_path_buf(),
            source,
        })?;

        let result = catch_unwind(AssertUnwindSafe(|| (self.harness_fn)(&data)));

        let outcome = match result {
            Ok((code, diagnostic)) => {
                ExecutionOutcome::new(ExecutionStatus::Exited(code), diagnostic)
            }
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionOutcome::new(ExecutionStatus::Exited(PANIC_EXIT_CODE), msg)
            }
        };
        Ok(outcome)
    }
}

/// Fixed on-disk locations shared by every execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    /// Overwritten with each mutant before the target runs.
    pub mutant: PathBuf,
    /// Handed to the target for its own output; never read.
    pub output: PathBuf,
}

/// Stages each mutant on disk and runs the target against it.
pub struct TestHarness<T: Target> {
    target: T,
    paths: StagingPaths,
}

impl<T: Target> TestHarness<T> {
    pub fn new(target: T, paths: StagingPaths) -> Self {
        Self { target, paths }
    }

    pub fn paths(&self) -> &StagingPaths {
        &self.paths
    }

    /// Writes `mutant` to the staging path, runs the target to completion and
    /// returns its outcome.
    pub fn execute(&mut self, mutant: &[u8]) -> Result<ExecutionOutcome, HarnessError> {
        fs::write(&self.paths.mutant, mutant).map_err(|source| HarnessError::Stage {
            path: self.paths.mutant.clone(),
            source,
        })?;

        let outcome = self.target.run(&self.paths.mutant, &self.paths.output)?;
        debug!(
            "target finished: {:?}, {} bytes of diagnostic output",
            outcome.status,
            outcome.diagnostic.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod in_process_target_tests {
    use super::*;

    fn staging(dir: &Path) -> StagingPaths {
        StagingPaths {
            mutant: dir.join("input.bin"),
            output: dir.join("output.bin"),
        }
    }

    fn first_byte_harness(data: &[u8]) -> (i32, String) {
        match data.first() {
            Some(0xFF) => panic!("Boom!"),
            Some(0x00) => (3, "  zero leading byte \n".to_string()),
            _ => (0, String::new()),
        }
    }

    #[test]
    fn harness_stages_mutant_and_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness =
            TestHarness::new(InProcessTarget::new(first_byte_harness), staging(dir.path()));

        let outcome = harness.execute(&[1, 2, 3]).unwrap();
        assert_eq!(outcome, ExecutionOutcome::passed());
        assert_eq!(fs::read(&harness.paths().mutant).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn staging_file_is_overwritten_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness =
            TestHarness::new(InProcessTarget::new(first_byte_harness), staging(dir.path()));

        harness.execute(&[9, 9, 9, 9, 9]).unwrap();
        harness.execute(&[7]).unwrap();
        assert_eq!(fs::read(&harness.paths().mutant).unwrap(), vec![7]);
    }

    #[test]
    fn diagnostic_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness =
            TestHarness::new(InProcessTarget::new(first_byte_harness), staging(dir.path()));

        let outcome = harness.execute(&[0x00, 1]).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(3));
        assert_eq!(outcome.diagnostic, "zero leading byte");
    }

    #[test]
    fn panic_becomes_failure_with_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness =
            TestHarness::new(InProcessTarget::new(first_byte_harness), staging(dir.path()));

        let outcome = harness.execute(&[0xFF]).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(PANIC_EXIT_CODE));
        assert!(outcome.status.is_failure());
        assert!(outcome.diagnostic.contains("Boom!"));
    }

    #[test]
    fn staging_into_missing_directory_is_a_harness_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = staging(&dir.path().join("missing").join("nested"));
        let mut harness = TestHarness::new(InProcessTarget::new(first_byte_harness), paths);

        match harness.execute(&[1]) {
            Err(HarnessError::Stage { .. }) => {}
            other => panic!("Expected HarnessError::Stage, got {other:?}"),
        }
    }

    #[test]
    fn status_failure_classification() {
        assert!(!ExecutionStatus::Exited(0).is_failure());
        assert!(ExecutionStatus::Exited(1).is_failure());
        assert!(ExecutionStatus::Exited(-1).is_failure());
        assert!(ExecutionStatus::Signaled(11).is_failure());
        assert!(!ExecutionStatus::TimedOut.is_failure());
    }
}

#[cfg(all(test, unix))]
mod command_target_tests {
    use super::*;

    fn get_test_target_path(name: &str) -> PathBuf {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.join("../test_targets").join(name)
    }

    fn script_harness(script: &str, dir: &Path) -> TestHarness<CommandTarget> {
        let target_path = get_test_target_path(script);
        if !target_path.exists() {
            panic!("Test target missing: {target_path:?}");
        }
        let target = CommandTarget::new(
            vec!["sh".to_string(), target_path.to_str().unwrap().to_string()],
            dir.join("capture.txt"),
        )
        .unwrap();
        TestHarness::new(
            target,
            StagingPaths {
                mutant: dir.join("input.jpg"),
                output: dir.join("temp.bmp"),
            },
        )
    }

    #[test]
    fn cmd_target_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = script_harness("always_ok.sh", dir.path());

        let outcome = harness.execute(b"hello").unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(0));
        assert_eq!(outcome.diagnostic, "converted");
    }

    #[test]
    fn cmd_target_passes_paths_and_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = script_harness("offset_two.sh", dir.path());

        let outcome = harness.execute(&[1, 2, 0, 4]).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(1));
        assert_eq!(outcome.diagnostic, "segfault at offset 2");

        let outcome = harness.execute(&[1, 2, 3, 4]).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(0));
        assert_eq!(outcome.diagnostic, "");
        // The target wrote its own artifact next to the mutant.
        assert!(dir.path().join("temp.bmp").exists());
    }

    #[test]
    fn cmd_target_combines_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = script_harness("noisy_fail.sh", dir.path());

        let outcome = harness.execute(b"x").unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(2));
        assert_eq!(outcome.diagnostic, "reading header\nbad marker");
    }

    #[test]
    fn cmd_target_silent_failure_has_empty_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = script_harness("silent_fail.sh", dir.path());

        let outcome = harness.execute(b"x").unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Exited(1));
        assert!(outcome.diagnostic.is_empty());
    }

    #[test]
    fn cmd_target_reports_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = script_harness("self_kill.sh", dir.path());

        let outcome = harness.execute(b"x").unwrap();
        assert!(outcome.status.is_failure());
        // `sh` either forwards the signal or reports 128 + SIGSEGV.
        assert!(
            matches!(
                outcome.status,
                ExecutionStatus::Signaled(11) | ExecutionStatus::Exited(139)
            ),
            "Unexpected status: {:?}",
            outcome.status
        );
    }

    #[test]
    fn cmd_target_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = script_harness("hang.sh", dir.path());
        harness.target.timeout = Some(Duration::from_millis(100)); // test: 100ms, script: 5s

        let outcome = harness.execute(b"x").unwrap();
        assert_eq!(outcome.status, ExecutionStatus::TimedOut);
        assert!(!outcome.status.is_failure());
    }

    #[test]
    fn cmd_target_invalid_command() {
        let dir = tempfile::tempdir().unwrap();
        let target = CommandTarget::new(
            vec!["./this_command_does_not_exist_ever_12345.sh".to_string()],
            dir.path().join("capture.txt"),
        )
        .unwrap();
        let mut harness = TestHarness::new(
            target,
            StagingPaths {
                mutant: dir.path().join("input.jpg"),
                output: dir.path().join("temp.bmp"),
            },
        );

        match harness.execute(b"x") {
            Err(HarnessError::Launch { command, .. }) => {
                assert_eq!(command, vec!["./this_command_does_not_exist_ever_12345.sh"]);
            }
            other => panic!("Expected Launch error for invalid command, got {other:?}"),
        }
    }

    #[test]
    fn cmd_target_in_working_dir_gets_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let target = CommandTarget::new(vec!["true".to_string()], dir.path().join("capture.txt"))
            .unwrap()
            .with_working_dir(Some(dir.path().to_path_buf()));

        let child_path = target.path_for_child(Path::new("input.jpg")).unwrap();
        assert!(child_path.is_absolute());
        assert_eq!(
            child_path,
            std::env::current_dir().unwrap().join("input.jpg")
        );

        let absolute = dir.path().join("input.jpg");
        assert_eq!(target.path_for_child(&absolute).unwrap(), absolute);
    }

    #[test]
    fn cmd_target_without_working_dir_keeps_relative_paths() {
        let target =
            CommandTarget::new(vec!["true".to_string()], PathBuf::from("capture.txt")).unwrap();
        assert_eq!(
            target.path_for_child(Path::new("input.jpg")).unwrap(),
            PathBuf::from("input.jpg")
        );
    }

    #[test]
    fn cmd_target_rejects_empty_command() {
        let result = CommandTarget::new(Vec::new(), PathBuf::from("capture.txt"));
        assert!(matches!(result, Err(HarnessError::EmptyCommand)));
    }
}

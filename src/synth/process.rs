//! Bounded subprocess execution for the synth tool.
//!
//! Each attempt runs in its own process group so a timeout or cancellation
//! can take down the tool together with the app process it spawned.
use crate::util::truncate_bytes;
use anyhow::{anyhow, Context, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on captured stderr per attempt.
pub const MAX_STDERR_BYTES: usize = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long pipes may stay open after the tool is gone. A descendant that
/// left the process group can hold them open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Shared flag that aborts in-flight and pending synthesis attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct RunRequest<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub termination: Termination,
    pub duration: Duration,
}

/// Executes one synth invocation. Spawn failures are errors; everything the
/// tool itself reports comes back as a `RunOutput`.
pub trait SynthRunner: Sync {
    fn run(&self, request: &RunRequest<'_>, cancel: &CancelToken) -> Result<RunOutput>;
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
    reader_grace: Duration,
    max_stderr_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            reader_grace: READER_GRACE,
            max_stderr_bytes: MAX_STDERR_BYTES,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SynthRunner for ProcessRunner {
    fn run(&self, request: &RunRequest<'_>, cancel: &CancelToken) -> Result<RunOutput> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("synth tool command is empty"))?;
        let program = resolve_program(program, request.cwd)?;

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(request.cwd)
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn synth tool {}", program.display()))?;

        // Drain both pipes so a chatty tool cannot block on a full buffer.
        let stdout_capture = child.stdout.take().map(|stdout| CapturedStream::spawn(stdout, 0));
        let max_stderr_bytes = self.max_stderr_bytes;
        let stderr_capture = child
            .stderr
            .take()
            .map(|stderr| CapturedStream::spawn(stderr, max_stderr_bytes));

        let termination = loop {
            match child.try_wait() {
                Ok(Some(_)) => break Termination::Exited,
                Ok(None) => {}
                Err(err) => {
                    terminate(&mut child);
                    return Err(err).context("check synth tool status");
                }
            }
            if cancel.is_cancelled() {
                terminate(&mut child);
                break Termination::Cancelled;
            }
            if start.elapsed() >= request.timeout {
                terminate(&mut child);
                break Termination::TimedOut;
            }
            thread::sleep(self.poll_interval);
        };

        let status = child.wait().context("wait for synth tool")?;
        if termination == Termination::Exited {
            sweep_process_group(&child);
        }
        let readers_deadline = Instant::now() + self.reader_grace;
        if let Some(capture) = stdout_capture {
            capture.collect(readers_deadline);
        }
        let stderr = stderr_capture
            .map(|capture| capture.collect(readers_deadline))
            .unwrap_or_default();
        let duration = start.elapsed();

        tracing::debug!(
            program = %program.display(),
            elapsed_ms = duration.as_millis() as u64,
            exit_code = status.code(),
            termination = ?termination,
            stderr_bytes = stderr.len(),
            "synth tool finished"
        );

        Ok(RunOutput {
            exit_code: match termination {
                Termination::Exited => status.code(),
                _ => None,
            },
            stderr: truncate_bytes(&stderr, max_stderr_bytes),
            termination,
            duration,
        })
    }
}

fn resolve_program(program: &str, cwd: &Path) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        return Ok(cwd.join(path));
    }
    which::which(program).map_err(|err| anyhow!("synth tool `{program}` not found on PATH: {err}"))
}

/// A pipe drained on its own thread into a shared, bounded buffer.
struct CapturedStream {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl CapturedStream {
    fn spawn(reader: impl Read + Send + 'static, max_bytes: usize) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            read_bounded(reader, max_bytes, &shared);
            let _ = done_tx.send(());
        });
        Self { buffer, done }
    }

    /// Wait for EOF until `deadline`, then return whatever was captured.
    /// A reader still blocked past the deadline is left detached.
    fn collect(self, deadline: Instant) -> Vec<u8> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.done.recv_timeout(remaining).is_err() {
            tracing::debug!("synth tool pipe still open after exit; keeping partial capture");
        }
        match self.buffer.lock() {
            Ok(kept) => kept.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn read_bounded(mut reader: impl Read, max_bytes: usize, kept: &Mutex<Vec<u8>>) {
    let mut chunk = [0u8; 8192];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if let Ok(mut kept) = kept.lock() {
            let room = max_bytes.saturating_sub(kept.len());
            kept.extend_from_slice(&chunk[..read.min(room)]);
        }
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    kill_process_group(child.id());
    let _ = child.kill();
}

/// Reap helpers the tool left behind in its group after a normal exit.
fn sweep_process_group(child: &Child) {
    #[cfg(unix)]
    kill_process_group(child.id());
    #[cfg(not(unix))]
    let _ = child;
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created for this child. ESRCH is expected
    // once the group is empty.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_exit_code_and_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let argv = argv("echo out; echo 'boom' >&2; exit 3");
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_secs(10),
        };
        let output = ProcessRunner::new()
            .run(&request, &CancelToken::new())
            .expect("run");
        assert_eq!(output.termination, Termination::Exited);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[test]
    fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let argv = argv("touch marker");
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_secs(10),
        };
        ProcessRunner::new()
            .run(&request, &CancelToken::new())
            .expect("run");
        assert!(dir.path().join("marker").is_file());
    }

    #[test]
    fn timeout_kills_the_process_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The background sleep would keep the stderr pipe open if the group survived.
        let argv = argv("sleep 30 & sleep 30");
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_millis(200),
        };
        let start = Instant::now();
        let output = ProcessRunner::new()
            .run(&request, &CancelToken::new())
            .expect("run");
        assert_eq!(output.termination, Termination::TimedOut);
        assert_eq!(output.exit_code, None);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellation_stops_a_running_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let argv = argv("sleep 30");
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_secs(60),
        };
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.cancel();
        });
        let start = Instant::now();
        let output = ProcessRunner::new().run(&request, &cancel).expect("run");
        canceller.join().expect("join canceller");
        assert_eq!(output.termination, Termination::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let argv = vec!["cdk-synth-test-no-such-tool".to_string()];
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_secs(1),
        };
        let err = ProcessRunner::new()
            .run(&request, &CancelToken::new())
            .expect_err("missing tool");
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[test]
    fn stderr_capture_is_bounded() {
        let kept = Mutex::new(Vec::new());
        read_bounded(io::Cursor::new(vec![b'x'; 64]), 16, &kept);
        assert_eq!(kept.into_inner().expect("lock").len(), 16);
    }

    #[test]
    fn descendant_outside_the_group_does_not_extend_the_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        // setsid moves the sleeper out of the group; it inherits both pipes.
        let argv = argv("echo started >&2; setsid sleep 8 & sleep 30");
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_millis(200),
        };
        let start = Instant::now();
        let output = ProcessRunner::new()
            .run(&request, &CancelToken::new())
            .expect("run");
        assert_eq!(output.termination, Termination::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(output.stderr.trim(), "started");
    }

    #[test]
    fn descendant_outside_the_group_does_not_delay_cancellation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let argv = argv("setsid sleep 8 & sleep 30");
        let request = RunRequest {
            argv: &argv,
            cwd: dir.path(),
            timeout: Duration::from_secs(60),
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        let output = ProcessRunner::new().run(&request, &cancel).expect("run");
        assert_eq!(output.termination, Termination::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}

//! A pool of long-lived subprocess executors, sized at the worker's job
//! count. `spawn` blocks until a slot in the pool is free, then runs the
//! command under `sh -c`, redirecting the child's stderr into the same pipe
//! as its stdout so the captured output is genuinely interleaved rather than
//! two separately-buffered streams stitched together after the fact.
//!
//! `GitJobDir`'s own `git` invocations go through this same pool rather than
//! a second ad hoc subprocess layer.

use anyhow::{Context as _, Result};
use slog::{debug, warn, Logger};
use std::collections::BTreeMap;
use std::io::Read as _;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL when a command overruns its
/// timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Semaphore {
    state: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut guard = self.state.lock().unwrap();
        while *guard == 0 {
            guard = self.cv.wait(guard).unwrap();
        }
        *guard -= 1;
    }

    fn release(&self) {
        let mut guard = self.state.lock().unwrap();
        *guard += 1;
        self.cv.notify_one();
    }
}

pub struct CmdServerPool {
    sem: Arc<Semaphore>,
    log: Logger,
}

/// The outcome of waiting on a [`CommandHandle`] to completion or timeout.
pub struct CommandOutcome {
    /// Interleaved stdout+stderr, as raw bytes (callers decode lossily).
    pub output: Vec<u8>,
    /// The child's exit code, or `None` if it was killed by a signal.
    pub status: Option<i32>,
    pub timed_out: bool,
}

/// A running (or finished) child process, plus the pool permit it's holding.
pub struct CommandHandle {
    child: Child,
    reader: Option<thread::JoinHandle<Vec<u8>>>,
    start: Instant,
    sem: Arc<Semaphore>,
    released: bool,
}

impl CmdServerPool {
    pub fn new(jobs: usize, log: &Logger) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(jobs.max(1))),
            log: log.new(slog::o!("component" => "runner")),
        }
    }

    /// Block until a pool slot is free, then spawn `command` (interpreted by
    /// `sh -c`) in `cwd` with `env` overlaid on the current process's
    /// environment.
    pub fn spawn(
        &self,
        command: &str,
        cwd: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandHandle> {
        self.sem.acquire();
        let wrapped = format!("({command}) 2>&1");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(wrapped)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let spawn_result = cmd.spawn().context("spawning command");
        let mut child = match spawn_result {
            Ok(c) => c,
            Err(e) => {
                self.sem.release();
                return Err(e);
            }
        };
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });
        debug!(self.log, "spawned command"; "pid" => child.id());
        Ok(CommandHandle {
            child,
            reader: Some(reader),
            start: Instant::now(),
            sem: Arc::clone(&self.sem),
            released: false,
        })
    }
}

impl CommandHandle {
    /// Block until the command exits or `timeout` elapses. On timeout the
    /// child is sent `SIGTERM`, given a grace window, then `SIGKILL`.
    pub fn wait(mut self, timeout: Duration, log: &Logger) -> Result<CommandOutcome> {
        let status = loop {
            if let Some(status) = self.child.try_wait().context("polling child")? {
                break Some(status.code());
            }
            if self.start.elapsed() >= timeout {
                warn!(log, "command exceeded timeout, sending SIGTERM"; "pid" => self.child.id());
                self.signal(libc::SIGTERM);
                let deadline = Instant::now() + KILL_GRACE;
                let exit = loop {
                    if let Some(status) = self.child.try_wait().context("polling child after SIGTERM")? {
                        break Some(status.code());
                    }
                    if Instant::now() >= deadline {
                        warn!(log, "command ignored SIGTERM, sending SIGKILL"; "pid" => self.child.id());
                        self.signal(libc::SIGKILL);
                        let status = self.child.wait().context("waiting for killed child")?;
                        break Some(status.code());
                    }
                    thread::sleep(POLL_INTERVAL);
                };
                let output = self.take_output();
                return Ok(CommandOutcome {
                    output,
                    status: exit.flatten(),
                    timed_out: true,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };
        let output = self.take_output();
        Ok(CommandOutcome {
            output,
            status: status.flatten(),
            timed_out: false,
        })
    }

    fn signal(&self, sig: i32) {
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, sig);
        }
    }

    fn take_output(&mut self) -> Vec<u8> {
        self.released = true;
        self.sem.release();
        // By the time we get here the child has exited (or been killed), so
        // its stdout pipe is closed and the reader thread's `read_to_end`
        // has already returned.
        self.reader.take().and_then(|r| r.join().ok()).unwrap_or_default()
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.sem.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{o, Discard};

    fn test_log() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn captures_interleaved_output_and_exit_code() {
        let pool = CmdServerPool::new(2, &test_log());
        let dir = tempfile::tempdir().unwrap();
        let handle = pool
            .spawn("echo out; echo err 1>&2", dir.path(), &BTreeMap::new())
            .unwrap();
        let outcome = handle.wait(Duration::from_secs(5), &test_log()).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.status, Some(0));
        let text = String::from_utf8_lossy(&outcome.output);
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[test]
    fn kills_and_marks_timeout_on_overrun() {
        let pool = CmdServerPool::new(1, &test_log());
        let dir = tempfile::tempdir().unwrap();
        let handle = pool.spawn("sleep 30", dir.path(), &BTreeMap::new()).unwrap();
        let outcome = handle
            .wait(Duration::from_millis(200), &test_log())
            .unwrap();
        assert!(outcome.timed_out);
    }

    #[test]
    fn env_overlay_is_visible_to_the_command() {
        let pool = CmdServerPool::new(1, &test_log());
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("DWQ_TEST_VAR".to_owned(), "hello".to_owned());
        let handle = pool
            .spawn("echo $DWQ_TEST_VAR", dir.path(), &env)
            .unwrap();
        let outcome = handle.wait(Duration::from_secs(5), &test_log()).unwrap();
        assert_eq!(String::from_utf8_lossy(&outcome.output).trim(), "hello");
    }
}

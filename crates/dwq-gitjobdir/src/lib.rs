//! Capacity-bounded, ref-counted cache of git working-directory checkouts.
//!
//! Entries are keyed by `(repo, commit, token)`. A *shared* lease (an
//! ordinary worker slot's per-slot token) participates in the capacity bound
//! and LRU eviction; an *exclusive* lease (a freshly generated, one-shot
//! token) is never reused by a second caller and is torn down as soon as its
//! refcount drops to zero rather than cached, since keeping it around would
//! just occupy capacity nothing will ever reclaim it from.

use anyhow::{anyhow, bail, Context as _, Result};
use dwq_runner::CmdServerPool;
use slog::{debug, o, warn, Logger};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    repo: String,
    commit: String,
    token: String,
}

enum EntryState {
    Materializing,
    Ready,
    Failed,
}

struct Entry {
    state: EntryState,
    path: PathBuf,
    refcount: u64,
    exclusive: bool,
    last_used: Instant,
}

struct State {
    entries: HashMap<Key, Entry>,
    by_path: HashMap<PathBuf, Key>,
    shared_count: usize,
}

pub struct GitJobDir {
    root: PathBuf,
    capacity: usize,
    runner: Arc<CmdServerPool>,
    log: Logger,
    state: Mutex<State>,
    cv: Condvar,
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl GitJobDir {
    pub fn new(root: PathBuf, capacity: usize, runner: Arc<CmdServerPool>, log: &Logger) -> Result<Self> {
        dwq_util::fs::Fs::new().create_dir_all(&root)?;
        Ok(Self {
            root,
            capacity: capacity.max(1),
            runner,
            log: log.new(o!("component" => "gitjobdir")),
            state: Mutex::new(State {
                entries: HashMap::new(),
                by_path: HashMap::new(),
                shared_count: 0,
            }),
            cv: Condvar::new(),
        })
    }

    /// Acquire a checkout of `(repo, commit)`. `token` identifies the
    /// caller's lease: the same token from concurrent callers shares one
    /// directory and bumps its refcount, a different token always gets a
    /// distinct one. `exclusive` controls whether the entry counts toward
    /// the capacity bound and is cached for reuse, or is torn down as soon
    /// as it's released.
    pub fn get(&self, repo: &str, commit: &str, token: &str, exclusive: bool) -> Result<PathBuf> {
        let key = Key {
            repo: repo.to_owned(),
            commit: commit.to_owned(),
            token: token.to_owned(),
        };

        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(entry) = guard.entries.get_mut(&key) {
                match entry.state {
                    EntryState::Ready => {
                        entry.refcount += 1;
                        entry.last_used = Instant::now();
                        return Ok(entry.path.clone());
                    }
                    EntryState::Materializing => {
                        guard = self.cv.wait(guard).unwrap();
                        continue;
                    }
                    EntryState::Failed => {
                        // The failed materialization already removed itself;
                        // loop around and try to create a fresh entry.
                        continue;
                    }
                }
            }

            if !exclusive {
                while guard.shared_count >= self.capacity {
                    let victim = guard
                        .entries
                        .iter()
                        .filter(|(_, e)| !e.exclusive && e.refcount == 0 && matches!(e.state, EntryState::Ready))
                        .min_by_key(|(_, e)| e.last_used)
                        .map(|(k, _)| k.clone());
                    match victim {
                        Some(vk) => {
                            let entry = guard.entries.remove(&vk).unwrap();
                            guard.by_path.remove(&entry.path);
                            guard.shared_count -= 1;
                            drop(guard);
                            if let Err(e) = dwq_util::fs::Fs::new().remove_dir_all(&entry.path) {
                                warn!(self.log, "failed to remove evicted checkout"; "error" => %e);
                            }
                            guard = self.state.lock().unwrap();
                        }
                        None => {
                            guard = self.cv.wait(guard).unwrap();
                        }
                    }
                }
            }

            let path = self
                .root
                .join(format!("{}-{}-{}", sanitize(repo), sanitize(commit), sanitize(token)));
            guard.entries.insert(
                key.clone(),
                Entry {
                    state: EntryState::Materializing,
                    path: path.clone(),
                    refcount: 1,
                    exclusive,
                    last_used: Instant::now(),
                },
            );
            guard.by_path.insert(path.clone(), key.clone());
            if !exclusive {
                guard.shared_count += 1;
            }
            drop(guard);

            let result = self.materialize(repo, commit, &path);

            guard = self.state.lock().unwrap();
            match result {
                Ok(()) => {
                    if let Some(entry) = guard.entries.get_mut(&key) {
                        entry.state = EntryState::Ready;
                    }
                    self.cv.notify_all();
                    return Ok(path);
                }
                Err(e) => {
                    guard.entries.remove(&key);
                    guard.by_path.remove(&path);
                    if !exclusive {
                        guard.shared_count -= 1;
                    }
                    self.cv.notify_all();
                    return Err(e);
                }
            }
        }
    }

    fn materialize(&self, repo: &str, commit: &str, path: &Path) -> Result<()> {
        debug!(self.log, "materializing checkout"; "repo" => repo, "commit" => commit, "path" => %path.display());
        let env = BTreeMap::new();
        if !path.exists() {
            let parent = path.parent().unwrap_or(&self.root);
            let cmd = format!(
                "git clone --no-checkout {} {}",
                shell_escape(repo),
                shell_escape(&path.to_string_lossy())
            );
            self.run_git(&cmd, parent, &env)?;
        } else {
            self.run_git("git fetch", path, &env)?;
        }
        let checkout = format!("git checkout --force {}", shell_escape(commit));
        self.run_git(&checkout, path, &env)
    }

    fn run_git(&self, cmd: &str, cwd: &Path, env: &BTreeMap<String, String>) -> Result<()> {
        let handle = self.runner.spawn(cmd, cwd, env).context("spawning git")?;
        let outcome = handle.wait(CHECKOUT_TIMEOUT, &self.log)?;
        if outcome.timed_out {
            bail!("git command timed out: {cmd}");
        }
        match outcome.status {
            Some(0) => Ok(()),
            other => bail!(
                "git command failed ({other:?}): {cmd}\n{}",
                String::from_utf8_lossy(&outcome.output)
            ),
        }
    }

    /// Decrement the refcount for the lease at `path`. At refcount zero a
    /// shared entry becomes LRU-eligible; an exclusive entry is torn down
    /// immediately.
    pub fn release(&self, path: &Path) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let key = guard
            .by_path
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("release called on unknown path {}", path.display()))?;
        let (exclusive, refcount, entry_path) = {
            let entry = guard.entries.get_mut(&key).expect("by_path points at entries");
            entry.refcount = entry.refcount.saturating_sub(1);
            (entry.exclusive, entry.refcount, entry.path.clone())
        };
        if exclusive && refcount == 0 {
            guard.entries.remove(&key);
            guard.by_path.remove(&entry_path);
            drop(guard);
            dwq_util::fs::Fs::new().remove_dir_all(&entry_path)?;
            self.cv.notify_all();
            return Ok(());
        }
        self.cv.notify_all();
        Ok(())
    }

    /// Remove every cached checkout, called on worker shutdown.
    pub fn cleanup(&self) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        guard.entries.clear();
        guard.by_path.clear();
        guard.shared_count = 0;
        drop(guard);
        dwq_util::fs::Fs::new().remove_dir_all(&self.root)
    }
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Discard;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn test_log() -> Logger {
        Logger::root(Discard, o!())
    }

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log();
        let runner = Arc::new(CmdServerPool::new(2, &log));
        let cmds = [
            "git init -q",
            "git config user.email t@example.com",
            "git config user.name t",
            "git commit --allow-empty -q -m init",
        ];
        for c in cmds {
            let h = runner.spawn(c, dir.path(), &BTreeMap::new()).unwrap();
            let outcome = h.wait(Duration::from_secs(10), &log).unwrap();
            assert_eq!(outcome.status, Some(0), "{c}: {}", String::from_utf8_lossy(&outcome.output));
        }
        dir
    }

    fn head_commit(repo: &Path) -> String {
        let log = test_log();
        let runner = CmdServerPool::new(1, &log);
        let h = runner.spawn("git rev-parse HEAD", repo, &BTreeMap::new()).unwrap();
        let outcome = h.wait(Duration::from_secs(10), &log).unwrap();
        String::from_utf8_lossy(&outcome.output).trim().to_owned()
    }

    #[test]
    fn shared_token_reuses_same_path_and_bumps_refcount() {
        let log = test_log();
        let repo = make_repo();
        let commit = head_commit(repo.path());
        let cache = tempfile::tempdir().unwrap();
        let runner = Arc::new(CmdServerPool::new(2, &log));
        let gjd = GitJobDir::new(cache.path().to_owned(), 4, runner, &log).unwrap();

        let p1 = gjd.get(&repo.path().to_string_lossy(), &commit, "slot-0", false).unwrap();
        let p2 = gjd.get(&repo.path().to_string_lossy(), &commit, "slot-0", false).unwrap();
        assert_eq!(p1, p2);
        gjd.release(&p1).unwrap();
        gjd.release(&p2).unwrap();
    }

    #[test]
    fn different_tokens_get_distinct_paths() {
        let log = test_log();
        let repo = make_repo();
        let commit = head_commit(repo.path());
        let cache = tempfile::tempdir().unwrap();
        let runner = Arc::new(CmdServerPool::new(2, &log));
        let gjd = GitJobDir::new(cache.path().to_owned(), 4, runner, &log).unwrap();

        let p1 = gjd.get(&repo.path().to_string_lossy(), &commit, "slot-0", false).unwrap();
        let p2 = gjd.get(&repo.path().to_string_lossy(), &commit, "slot-1", false).unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn exclusive_entry_is_removed_on_release() {
        let log = test_log();
        let repo = make_repo();
        let commit = head_commit(repo.path());
        let cache = tempfile::tempdir().unwrap();
        let runner = Arc::new(CmdServerPool::new(2, &log));
        let gjd = GitJobDir::new(cache.path().to_owned(), 4, runner, &log).unwrap();

        let path = gjd.get(&repo.path().to_string_lossy(), &commit, "unique-1", true).unwrap();
        assert!(path.exists());
        gjd.release(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn capacity_bound_evicts_lru_zero_refcount_entry() {
        let log = test_log();
        let repo = make_repo();
        let commit = head_commit(repo.path());
        let cache = tempfile::tempdir().unwrap();
        let runner = Arc::new(CmdServerPool::new(2, &log));
        let gjd = GitJobDir::new(cache.path().to_owned(), 2, runner, &log).unwrap();
        let repo_path = repo.path().to_string_lossy().to_string();

        let pa = gjd.get(&repo_path, &commit, "a", false).unwrap();
        gjd.release(&pa).unwrap();
        let pb = gjd.get(&repo_path, &commit, "b", false).unwrap();
        // shared_count is now at capacity with "a" at refcount 0: the next
        // shared request must evict "a" rather than grow past capacity.
        let pc = gjd.get(&repo_path, &commit, "c", false).unwrap();

        assert!(!pa.exists(), "lru zero-refcount entry should have been evicted");
        assert_ne!(pc, pa);
        gjd.release(&pb).unwrap();
        gjd.release(&pc).unwrap();
    }

    #[test]
    fn blocks_when_no_victim_is_evictable() {
        let log = test_log();
        let repo = make_repo();
        let commit = head_commit(repo.path());
        let cache = tempfile::tempdir().unwrap();
        let runner = Arc::new(CmdServerPool::new(2, &log));
        let gjd = Arc::new(GitJobDir::new(cache.path().to_owned(), 1, runner, &log).unwrap());
        let repo_path = repo.path().to_string_lossy().to_string();

        let pa = gjd.get(&repo_path, &commit, "a", false).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let (gjd2, done2, repo_path2, commit2) =
            (Arc::clone(&gjd), Arc::clone(&done), repo_path.clone(), commit.clone());
        let handle = thread::spawn(move || {
            let p = gjd2.get(&repo_path2, &commit2, "b", false).unwrap();
            done2.store(true, Ordering::SeqCst);
            p
        });

        thread::sleep(Duration::from_millis(300));
        assert!(!done.load(Ordering::SeqCst), "get() should block while the only entry is pinned");

        gjd.release(&pa).unwrap();
        let pb = handle.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_ne!(pb, pa);
    }
}

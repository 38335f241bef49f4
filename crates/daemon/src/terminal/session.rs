//! PTY-backed shell sessions.
//!
//! A [`PtySession`] owns one shell process attached to a pseudo-terminal and
//! guarantees that the process and the PTY handles are released exactly once,
//! no matter how many callers race to close it.
//!
//! The shell runs with the daemon's own privileges. Giving the browser a real
//! shell on the host is the feature, not an accident; deployments that need
//! isolation must put the whole daemon inside it.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::TerminalConfig;

/// Unique identifier for a session.
pub type SessionId = String;

/// How often teardown polls the shell for exit.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long teardown waits for the shell to be reaped after SIGKILL.
const KILL_REAP_LIMIT: Duration = Duration::from_secs(1);

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No PTY or process could be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The session has left the active state.
    #[error("session closed: {0}")]
    Closed(SessionId),

    /// I/O error on the PTY.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// PTY allocated, shell being spawned.
    Starting = 0,
    /// Shell running, relay may read and write.
    Active = 1,
    /// Teardown in progress.
    Closing = 2,
    /// All resources released.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Lowercase name, as reported by the sessions listing.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// What a call to [`PtySession::close`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// This call performed the teardown.
    Released {
        /// Exit code of the shell, if it was reaped.
        exit_code: Option<u32>,
        /// Whether the shell ignored the hang-up and had to be killed.
        escalated: bool,
    },
    /// Another call already performed or is performing the teardown.
    AlreadyClosed,
}

impl CloseOutcome {
    /// Whether this call performed the teardown.
    pub fn is_released(&self) -> bool {
        matches!(self, CloseOutcome::Released { .. })
    }
}

/// The read side of a freshly opened PTY, handed to the outbound pump.
pub struct PtyIo {
    /// Blocking reader on the PTY master.
    pub reader: Box<dyn Read + Send>,
}

/// Blocking reader on a private duplicate of the PTY master.
///
/// Background jobs can keep the slave side open after the shell is gone, so
/// the master may never report end of stream on its own. Every read also
/// waits on one end of a socket pair whose other end the session holds; once
/// teardown drops that end and the PTY has nothing left to read, the reader
/// returns `Ok(0)`.
struct PtyReader {
    pty: File,
    wake: OwnedFd,
    woken: bool,
}

impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.woken {
            return Ok(0);
        }
        loop {
            let (pty_ready, woken) = {
                let mut fds = [
                    PollFd::new(self.pty.as_fd(), PollFlags::POLLIN),
                    PollFd::new(self.wake.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
                (fds[0].any().unwrap_or(true), fds[1].any().unwrap_or(true))
            };
            if pty_ready {
                return self.pty.read(buf);
            }
            if woken {
                self.woken = true;
                return Ok(0);
            }
        }
    }
}

/// A shell process attached to a pseudo-terminal.
pub struct PtySession {
    id: SessionId,
    pid: Option<u32>,
    state: AtomicU8,
    state_tx: watch::Sender<SessionState>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    wake: Mutex<Option<OwnedFd>>,
    exit_code: Mutex<Option<u32>>,
    grace: Duration,
    opened_at: Instant,
}

impl PtySession {
    /// Allocates a PTY and spawns the configured shell on its slave side.
    ///
    /// The slave handle is dropped as soon as the shell has inherited it, so
    /// the shell's exit normally ends the master's read stream. The returned
    /// reader also ends when [`PtySession::close`] finishes, even if other
    /// processes still hold the slave. Any failure is reported as
    /// [`SessionError::ResourceExhausted`] and leaves nothing running.
    pub fn open(
        config: &TerminalConfig,
        cwd: Option<&Path>,
    ) -> Result<(Arc<Self>, PtyIo), SessionError> {
        let id = Uuid::new_v4().to_string();

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResourceExhausted(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        if config.login {
            cmd.arg("-l");
        }
        cmd.env("TERM", &config.term);
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::ResourceExhausted(format!("spawn {}: {e}", config.shell)))?;
        drop(pair.slave);

        let handles = open_reader(&*pair.master)
            .map_err(anyhow::Error::from)
            .and_then(|(reader, wake)| Ok((reader, wake, pair.master.take_writer()?)));
        let (reader, wake, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::ResourceExhausted(format!("pty handles: {e}")));
            }
        };

        let pid = child.process_id();
        let (state_tx, _) = watch::channel(SessionState::Starting);

        let session = Self {
            id,
            pid,
            state: AtomicU8::new(SessionState::Starting as u8),
            state_tx,
            master: Mutex::new(Some(pair.master)),
            writer: Arc::new(Mutex::new(Some(writer))),
            child: Mutex::new(Some(child)),
            wake: Mutex::new(Some(wake)),
            exit_code: Mutex::new(None),
            grace: config.close_grace(),
            opened_at: Instant::now(),
        };
        session.publish(SessionState::Active);

        tracing::info!(
            session_id = %session.id,
            pid = ?session.pid,
            shell = %config.shell,
            "Opened terminal session"
        );

        Ok((
            Arc::new(session),
            PtyIo {
                reader: Box::new(reader),
            },
        ))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns whether the session still accepts input.
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Exit code of the shell once teardown has reaped it.
    pub fn exit_code(&self) -> Option<u32> {
        *lock(&self.exit_code)
    }

    /// Time since the session was opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Writes client input to the PTY verbatim.
    ///
    /// Input arriving after teardown has started is rejected with
    /// [`SessionError::Closed`] and never reaches the shell. The write itself
    /// runs on the blocking pool because a shell that stops reading can fill
    /// the PTY input buffer.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Closed(self.id.clone()));
        }

        let writer = Arc::clone(&self.writer);
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&writer);
            let Some(writer) = guard.as_mut() else {
                return Err(SessionError::Closed(id));
            };
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Io(io::Error::other(e)))?
    }

    /// Tears the session down.
    ///
    /// Only the first caller performs the release: it hangs up every process
    /// group in the shell's session, waits at most the configured grace
    /// period, escalates to SIGKILL if the shell is still alive, reaps the
    /// shell and kills whatever is left of its session. It then drops the
    /// master, the writer and the reader's wake socket, which ends any read
    /// still blocked on the PTY. Every other caller returns
    /// [`CloseOutcome::AlreadyClosed`] immediately.
    pub async fn close(&self) -> CloseOutcome {
        if self
            .state
            .compare_exchange(
                SessionState::Active as u8,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::debug!(session_id = %self.id, state = ?self.state(), "Teardown already done");
            return CloseOutcome::AlreadyClosed;
        }
        let _ = self.state_tx.send(SessionState::Closing);

        let child = lock(&self.child).take();
        let mut escalated = false;
        let mut exit_code = None;

        if let Some(mut child) = child {
            signal_session(self.pid, Signal::SIGHUP);
            exit_code = reap(&mut child, self.grace).await;

            if exit_code.is_none() {
                escalated = true;
                tracing::warn!(
                    session_id = %self.id,
                    pid = ?self.pid,
                    grace_ms = self.grace.as_millis() as u64,
                    "Shell ignored hang-up, sending SIGKILL"
                );
                if !signal_session(self.pid, Signal::SIGKILL) {
                    let _ = child.kill();
                }
                exit_code = reap(&mut child, KILL_REAP_LIMIT).await;
                if exit_code.is_none() {
                    tracing::error!(session_id = %self.id, pid = ?self.pid, "Shell could not be reaped");
                }
            }

            let leftover = self.pid.map(session_groups).unwrap_or_default();
            if !leftover.is_empty() {
                tracing::debug!(
                    session_id = %self.id,
                    groups = ?leftover,
                    "Killing processes left behind by the shell"
                );
                signal_groups(&leftover, Signal::SIGKILL);
            }
        }

        lock(&self.writer).take();
        lock(&self.master).take();
        lock(&self.wake).take();
        *lock(&self.exit_code) = exit_code;

        self.publish(SessionState::Closed);

        tracing::info!(
            session_id = %self.id,
            exit_code = ?exit_code,
            escalated,
            "Terminal session closed"
        );

        CloseOutcome::Released {
            exit_code,
            escalated,
        }
    }

    /// Resolves once the session has reached [`SessionState::Closed`].
    pub async fn wait_closed(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    fn publish(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
        let _ = self.state_tx.send(state);
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        let child = self
            .child
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut child) = child {
            tracing::warn!(session_id = %self.id, "Session dropped without close, killing shell");
            if !signal_session(self.pid, Signal::SIGKILL) {
                let _ = child.kill();
            }
            let _ = child.try_wait();
        }
    }
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// Duplicates the master descriptor and pairs it with a fresh wake socket.
///
/// Returns the reader and the end of the socket pair teardown drops.
fn open_reader(master: &(dyn MasterPty + Send)) -> io::Result<(PtyReader, OwnedFd)> {
    let fd = master
        .as_raw_fd()
        .ok_or_else(|| io::Error::other("PTY master has no descriptor"))?;
    // SAFETY: `master` owns `fd` and outlives this call.
    let pty = unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned()?;
    let (wake, wake_tx) = UnixStream::pair()?;
    let reader = PtyReader {
        pty: File::from(pty),
        wake: OwnedFd::from(wake),
        woken: false,
    };
    Ok((reader, OwnedFd::from(wake_tx)))
}

/// Sends `signal` to every process group in the shell's session, falling
/// back to the shell alone. Returns whether a signal was delivered.
///
/// The shell is spawned as a session leader, so its pid is the session id.
/// An interactive shell puts each background job in a group of its own.
fn signal_session(pid: Option<u32>, signal: Signal) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let mut groups = session_groups(pid);
    if !groups.contains(&raw) {
        groups.push(raw);
    }
    signal_groups(&groups, signal) || kill(Pid::from_raw(raw), signal).is_ok()
}

fn signal_groups(groups: &[i32], signal: Signal) -> bool {
    let mut delivered = false;
    for &group in groups {
        match killpg(Pid::from_raw(group), signal) {
            Ok(()) => delivered = true,
            Err(Errno::ESRCH) => {}
            Err(e) => tracing::debug!(pgid = group, error = %e, "killpg failed"),
        }
    }
    delivered
}

/// Process groups of the live processes in session `sid`.
///
/// Empty where `/proc` is unavailable.
fn session_groups(sid: u32) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    let Ok(sid) = i32::try_from(sid) else {
        return Vec::new();
    };
    let mut groups: Vec<i32> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .filter(|stat| stat.session == sid && stat.state != 'Z')
        .map(|stat| stat.pgrp)
        .collect();
    groups.sort_unstable();
    groups.dedup();
    groups
}

/// Fields of `/proc/<pid>/stat` used by teardown.
#[derive(Debug, PartialEq, Eq)]
struct ProcStat {
    state: char,
    pgrp: i32,
    session: i32,
}

fn parse_stat(stat: &str) -> Option<ProcStat> {
    // The command name may contain spaces and parentheses.
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    let session = fields.next()?.parse().ok()?;
    Some(ProcStat {
        state,
        pgrp,
        session,
    })
}

/// Polls the child for exit for at most `limit`.
async fn reap(child: &mut Box<dyn Child + Send + Sync>, limit: Duration) -> Option<u32> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status.exit_code()),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "try_wait failed");
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(REAP_POLL_INTERVAL).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

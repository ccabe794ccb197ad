//! `poll(2)` reactor
//!
//! Single-threaded event loop for one engine thread. Timers live in a
//! [`TimerHeap`]; fd interests are one-shot and polled together with a
//! self-pipe that [`Remote`] handles write to when another thread posts a
//! callback.

use super::timer::{TimerHeap, TimerHeapStats};
use costack_core::{kerror, ktrace, Interest, IoHandle, Reactor, TimerHandle};
use crossbeam_queue::SegQueue;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::cell::RefCell;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

type RemoteTask = Box<dyn FnOnce() + Send>;

struct IoEntry {
    handle: IoHandle,
    fd: RawFd,
    interest: Interest,
    callback: Box<dyn FnOnce(Interest)>,
}

#[derive(Default)]
struct Inner {
    timers: TimerHeap,
    io: Vec<IoEntry>,
}

struct RemoteShared {
    tasks: SegQueue<RemoteTask>,
    wake_tx: OwnedFd,
}

/// Reference reactor over `poll(2)`
pub struct PollReactor {
    inner: RefCell<Inner>,
    remote: Arc<RemoteShared>,
    wake_rx: OwnedFd,
}

/// Thread-safe handle for posting work onto a [`PollReactor`]'s thread
///
/// Posted callbacks run inside the reactor's next `run_once`. They do not
/// count as pending work, so a loop with nothing else armed will not wait
/// for them.
#[derive(Clone)]
pub struct Remote {
    shared: Arc<RemoteShared>,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Milliseconds until `deadline`, rounded up so the loop never spins
fn poll_timeout(deadline: Option<Instant>, now: Instant) -> libc::c_int {
    match deadline {
        None => -1,
        Some(at) => {
            let left = at.saturating_duration_since(now);
            let ms = left.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

fn revents_to_interest(revents: libc::c_short) -> Interest {
    let mut ready = Interest::NONE;
    if revents & libc::POLLIN != 0 {
        ready = ready | Interest::READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        ready = ready | Interest::WRITABLE;
    }
    if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        ready = ready | Interest::ERROR;
    }
    ready
}

fn interest_to_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.contains(Interest::READABLE) {
        events |= libc::POLLIN;
    }
    if interest.contains(Interest::WRITABLE) {
        events |= libc::POLLOUT;
    }
    events
}

impl PollReactor {
    pub fn new() -> io::Result<Self> {
        let (wake_rx, wake_tx) = nix::unistd::pipe().map_err(io::Error::from)?;
        set_nonblocking(wake_rx.as_raw_fd())?;
        set_nonblocking(wake_tx.as_raw_fd())?;
        Ok(Self {
            inner: RefCell::new(Inner::default()),
            remote: Arc::new(RemoteShared {
                tasks: SegQueue::new(),
                wake_tx,
            }),
            wake_rx,
        })
    }

    /// Handle other threads use to post callbacks onto this loop
    pub fn remote(&self) -> Remote {
        Remote {
            shared: Arc::clone(&self.remote),
        }
    }

    pub fn timer_stats(&self) -> TimerHeapStats {
        self.inner.borrow().timers.stats()
    }

    fn run_remote(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.remote.tasks.pop() {
            task();
            ran += 1;
        }
        ran
    }

    fn drain_wake_pipe(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: reading into a local buffer from our own nonblocking fd
            let n = unsafe {
                libc::read(
                    self.wake_rx.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }

    /// Remove and return the callbacks of every ready fd interest
    fn take_ready(&self, ready: &[(IoHandle, Interest)]) -> Vec<(Box<dyn FnOnce(Interest)>, Interest)> {
        let mut inner = self.inner.borrow_mut();
        let mut fired = Vec::with_capacity(ready.len());
        for &(handle, revents) in ready {
            if let Some(pos) = inner.io.iter().position(|e| e.handle == handle) {
                let entry = inner.io.swap_remove(pos);
                fired.push((entry.callback, revents));
            }
        }
        fired
    }
}

impl Reactor for PollReactor {
    fn run_once(&self) -> bool {
        self.run_remote();

        // Snapshot what to poll; no borrow survives into a callback
        let (mut pollfds, handles, timeout) = {
            let mut inner = self.inner.borrow_mut();
            if inner.io.is_empty() && inner.timers.is_empty() {
                return false;
            }
            let mut pollfds = Vec::with_capacity(inner.io.len() + 1);
            let mut handles = Vec::with_capacity(inner.io.len());
            pollfds.push(libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for entry in &inner.io {
                pollfds.push(libc::pollfd {
                    fd: entry.fd,
                    events: interest_to_events(entry.interest),
                    revents: 0,
                });
                handles.push((entry.handle, entry.interest));
            }
            let timeout = poll_timeout(inner.timers.next_deadline(), Instant::now());
            (pollfds, handles, timeout)
        };

        // SAFETY: pollfds is a valid, exclusively borrowed array
        let ret = unsafe {
            libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                kerror!("poll failed: {}", err);
            }
            for pfd in pollfds.iter_mut() {
                pfd.revents = 0;
            }
        }

        if pollfds[0].revents != 0 {
            self.drain_wake_pipe();
            self.run_remote();
        }

        let ready: Vec<(IoHandle, Interest)> = pollfds[1..]
            .iter()
            .zip(&handles)
            .filter_map(|(pfd, &(handle, wanted))| {
                let got = revents_to_interest(pfd.revents);
                if got.intersects(wanted) || got.contains(Interest::ERROR) {
                    Some((handle, got))
                } else {
                    None
                }
            })
            .collect();

        for (callback, revents) in self.take_ready(&ready) {
            callback(revents);
        }

        let expired = self.inner.borrow_mut().timers.poll_expired(Instant::now());
        if !expired.is_empty() {
            ktrace!("{} timer(s) expired", expired.len());
        }
        for callback in expired {
            callback();
        }

        self.pending() > 0
    }

    fn add_timer(&self, after: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let deadline = Instant::now() + after;
        self.inner.borrow_mut().timers.insert(deadline, callback)
    }

    fn cancel_timer(&self, handle: TimerHandle) -> bool {
        self.inner.borrow_mut().timers.cancel(handle)
    }

    fn add_io(&self, fd: RawFd, interest: Interest, callback: Box<dyn FnOnce(Interest)>) -> IoHandle {
        let handle = IoHandle::new();
        self.inner.borrow_mut().io.push(IoEntry {
            handle,
            fd,
            interest,
            callback,
        });
        handle
    }

    fn cancel_io(&self, handle: IoHandle) -> bool {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            inner
                .io
                .iter()
                .position(|e| e.handle == handle)
                .map(|pos| inner.io.swap_remove(pos))
        };
        // The callback may own engine objects; drop it outside the borrow
        removed.is_some()
    }

    fn pending(&self) -> usize {
        let inner = self.inner.borrow();
        inner.timers.len() + inner.io.len()
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

impl Remote {
    /// Queue `task` to run on the reactor's thread and wake its loop
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.tasks.push(Box::new(task));
        let byte = 1u8;
        // SAFETY: one-byte write from a local to our own nonblocking fd.
        // A full pipe already guarantees a wakeup, so EAGAIN is ignored.
        unsafe {
            libc::write(
                self.shared.wake_tx.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            );
        }
    }
}

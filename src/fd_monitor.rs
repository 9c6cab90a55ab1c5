//! Per-thread descriptor monitor: the cooperative event loop signal queues plug into.
//!
//! Every thread owns its own set of monitors. A monitor pairs a descriptor and
//! an interest mask with a callback; [`service`] polls the calling thread's
//! descriptors once and invokes the callbacks of the ready ones, in the order
//! the monitors were created. Callbacks run on the owning thread and may create
//! or delete monitors themselves.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::cell::RefCell;
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;

/// Callback invoked with the monitored descriptor and the events that occurred on it.
pub type MonitorCallback = Rc<dyn Fn(RawFd, PollFlags)>;

/// Handle to a monitor created on the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRef(u64);

/// Errors returned by the event loop.
#[derive(Debug)]
pub enum MonitorError {
    /// `poll(2)` failed with something other than an interruption.
    Poll(Errno),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Poll(e) => write!(f, "poll failed: {e}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Poll(e) => Some(e),
        }
    }
}

struct Monitor {
    id: u64,
    name: String,
    fd: RawFd,
    interest: PollFlags,
    callback: MonitorCallback,
}

#[derive(Default)]
struct MonitorSet {
    next_id: u64,
    monitors: Vec<Monitor>,
    stop_requested: bool,
}

thread_local! {
    static MONITORS: RefCell<MonitorSet> = RefCell::new(MonitorSet::default());
}

/// Start watching `fd` for `interest` on the calling thread.
///
/// The caller keeps ownership of the descriptor and must [`delete`] the
/// monitor before closing it.
pub fn create(name: &str, fd: RawFd, interest: PollFlags, callback: MonitorCallback) -> MonitorRef {
    MONITORS.with(|set| {
        let mut set = set.borrow_mut();
        set.next_id += 1;
        let id = set.next_id;
        set.monitors.push(Monitor {
            id,
            name: name.to_string(),
            fd,
            interest,
            callback,
        });
        tracing::debug!(monitor = name, fd, "created fd monitor");
        MonitorRef(id)
    })
}

/// Stop watching the descriptor behind `monitor`. Unknown handles are ignored.
pub fn delete(monitor: MonitorRef) {
    MONITORS.with(|set| {
        let mut set = set.borrow_mut();
        if let Some(pos) = set.monitors.iter().position(|m| m.id == monitor.0) {
            let removed = set.monitors.remove(pos);
            tracing::debug!(monitor = %removed.name, fd = removed.fd, "deleted fd monitor");
        }
    });
}

/// Number of monitors registered on the calling thread.
pub fn monitor_count() -> usize {
    MONITORS.with(|set| set.borrow().monitors.len())
}

/// Poll the calling thread's descriptors once and dispatch ready callbacks.
///
/// Returns how many callbacks ran. An interrupted poll counts as an empty pass.
pub fn service(timeout: PollTimeout) -> Result<usize, MonitorError> {
    let watched: Vec<(u64, RawFd, PollFlags)> = MONITORS.with(|set| {
        set.borrow()
            .monitors
            .iter()
            .map(|m| (m.id, m.fd, m.interest))
            .collect()
    });

    // SAFETY: registrants keep their descriptors open until they delete the
    // monitor, and nothing else runs on this thread while poll() is blocked.
    let mut fds: Vec<PollFd<'_>> = watched
        .iter()
        .map(|&(_, fd, interest)| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, interest))
        .collect();

    match poll(&mut fds, timeout) {
        Ok(0) => return Ok(0),
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(0),
        Err(e) => return Err(MonitorError::Poll(e)),
    }

    let ready: Vec<(u64, RawFd, PollFlags)> = watched
        .iter()
        .zip(fds.iter())
        .filter_map(|(&(id, fd, _), pfd)| {
            pfd.revents()
                .filter(|revents| !revents.is_empty())
                .map(|revents| (id, fd, revents))
        })
        .collect();
    drop(fds);

    let mut invoked = 0;
    for (id, fd, revents) in ready {
        // An earlier callback in this pass may have deleted the monitor.
        let callback = MONITORS.with(|set| {
            set.borrow()
                .monitors
                .iter()
                .find(|m| m.id == id)
                .map(|m| Rc::clone(&m.callback))
        });
        if let Some(callback) = callback {
            callback(fd, revents);
            invoked += 1;
        }
    }
    Ok(invoked)
}

/// Service the calling thread's monitors until [`stop`] is called from a callback.
pub fn run() -> Result<(), MonitorError> {
    MONITORS.with(|set| set.borrow_mut().stop_requested = false);
    loop {
        service(PollTimeout::NONE)?;
        let stop = MONITORS.with(|set| std::mem::take(&mut set.borrow_mut().stop_requested));
        if stop {
            return Ok(());
        }
    }
}

/// Ask [`run`] on the calling thread to return after the current pass.
pub fn stop() {
    MONITORS.with(|set| set.borrow_mut().stop_requested = true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::{AsRawFd, OwnedFd};

    fn readable_pipe() -> (OwnedFd, File) {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let mut writer = File::from(write_end);
        writer.write_all(b"x").unwrap();
        (read_end, writer)
    }

    #[test]
    fn test_service_without_ready_descriptors_invokes_nothing() {
        std::thread::spawn(|| {
            let (read_end, _write_end) = nix::unistd::pipe().unwrap();
            let hits = Rc::new(RefCell::new(0));
            let h = Rc::clone(&hits);
            let _m = create(
                "idle",
                read_end.as_raw_fd(),
                PollFlags::POLLIN,
                Rc::new(move |_, _| *h.borrow_mut() += 1),
            );
            assert_eq!(service(PollTimeout::ZERO).unwrap(), 0);
            assert_eq!(*hits.borrow(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_ready_callbacks_run_in_creation_order() {
        std::thread::spawn(|| {
            let (first, _w1) = readable_pipe();
            let (second, _w2) = readable_pipe();
            let order = Rc::new(RefCell::new(Vec::new()));

            let o = Rc::clone(&order);
            create(
                "first",
                first.as_raw_fd(),
                PollFlags::POLLIN,
                Rc::new(move |fd, events| {
                    assert!(events.contains(PollFlags::POLLIN));
                    o.borrow_mut().push(fd);
                }),
            );
            let o = Rc::clone(&order);
            create(
                "second",
                second.as_raw_fd(),
                PollFlags::POLLIN,
                Rc::new(move |fd, _| o.borrow_mut().push(fd)),
            );

            assert_eq!(service(PollTimeout::ZERO).unwrap(), 2);
            assert_eq!(*order.borrow(), vec![first.as_raw_fd(), second.as_raw_fd()]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_callback_can_delete_later_monitor() {
        std::thread::spawn(|| {
            let (first, _w1) = readable_pipe();
            let (second, _w2) = readable_pipe();
            let later: Rc<RefCell<Option<MonitorRef>>> = Rc::new(RefCell::new(None));
            let second_hits = Rc::new(RefCell::new(0));

            let l = Rc::clone(&later);
            create(
                "deleter",
                first.as_raw_fd(),
                PollFlags::POLLIN,
                Rc::new(move |_, _| {
                    if let Some(m) = l.borrow_mut().take() {
                        delete(m);
                    }
                }),
            );
            let h = Rc::clone(&second_hits);
            let m = create(
                "victim",
                second.as_raw_fd(),
                PollFlags::POLLIN,
                Rc::new(move |_, _| *h.borrow_mut() += 1),
            );
            *later.borrow_mut() = Some(m);

            assert_eq!(service(PollTimeout::ZERO).unwrap(), 1);
            assert_eq!(*second_hits.borrow(), 0);
            assert_eq!(monitor_count(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_delete_unknown_monitor_is_ignored() {
        std::thread::spawn(|| {
            let (read_end, _w) = nix::unistd::pipe().unwrap();
            let m = create("once", read_end.as_raw_fd(), PollFlags::POLLIN, Rc::new(|_, _| {}));
            delete(m);
            delete(m);
            assert_eq!(monitor_count(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_run_returns_after_stop() {
        std::thread::spawn(|| {
            let (read_end, _w) = readable_pipe();
            create(
                "stopper",
                read_end.as_raw_fd(),
                PollFlags::POLLIN,
                Rc::new(|_, _| stop()),
            );
            run().unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_monitors_are_per_thread() {
        std::thread::spawn(|| {
            let (read_end, _w) = nix::unistd::pipe().unwrap();
            create("mine", read_end.as_raw_fd(), PollFlags::POLLIN, Rc::new(|_, _| {}));
            let other = std::thread::spawn(monitor_count).join().unwrap();
            assert_eq!(other, 0);
            assert_eq!(monitor_count(), 1);
        })
        .join()
        .unwrap();
    }
}

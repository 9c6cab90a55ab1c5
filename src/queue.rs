//! Kernel signal queue: a non-blocking signalfd whose mask can be changed in place.

use nix::errno::Errno;
use nix::sys::signal::SigSet;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

/// Size of one record read from a signalfd.
const RECORD_LEN: usize = std::mem::size_of::<libc::signalfd_siginfo>();

#[derive(Debug)]
pub(crate) struct SignalQueue {
    fd: OwnedFd,
}

impl SignalQueue {
    /// Create a non-blocking, close-on-exec signalfd accepting the signals in `mask`.
    pub(crate) fn open(mask: &SigSet) -> Result<Self, Errno> {
        // SAFETY: `mask` points to a valid sigset_t for the duration of the call.
        let fd = Errno::result(unsafe {
            libc::signalfd(
                -1,
                mask.as_ref(),
                libc::SFD_NONBLOCK | libc::SFD_CLOEXEC,
            )
        })?;
        // SAFETY: signalfd(-1, ..) returned a fresh descriptor that nothing else owns.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Replace the set of signals this queue accepts.
    pub(crate) fn set_mask(&mut self, mask: &SigSet) -> Result<(), Errno> {
        // SAFETY: the descriptor is a live signalfd owned by `self`.
        Errno::result(unsafe { libc::signalfd(self.fd.as_raw_fd(), mask.as_ref(), 0) })?;
        Ok(())
    }

    /// Read one queued record.
    ///
    /// Returns the record's signal number, or `None` once the queue is empty.
    /// Interrupted reads are retried.
    pub(crate) fn read_record(&self) -> Result<Option<i32>, Errno> {
        let mut record = [0u8; RECORD_LEN];
        loop {
            // SAFETY: `record` is a writable buffer of exactly RECORD_LEN bytes.
            let res = Errno::result(unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    record.as_mut_ptr().cast::<libc::c_void>(),
                    RECORD_LEN,
                )
            });
            match res {
                Ok(0) | Err(Errno::EAGAIN) => return Ok(None),
                Ok(n) => return Ok(Some(signo_of(&record[..n as usize]))),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the descriptor, retrying while the close is interrupted.
    pub(crate) fn close(self) -> Result<(), Errno> {
        let fd = self.fd.into_raw_fd();
        loop {
            // SAFETY: `fd` was released from its OwnedFd above and is closed exactly once.
            match Errno::result(unsafe { libc::close(fd) }) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// `ssi_signo` is the leading `u32` of a signalfd record. Truncated records
/// decode to 0, which no handler can be registered for.
fn signo_of(record: &[u8]) -> i32 {
    match record.get(..4) {
        Some(bytes) => {
            let mut signo = [0u8; 4];
            signo.copy_from_slice(bytes);
            u32::from_ne_bytes(signo) as i32
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{pthread_sigmask, raise, SigmaskHow, Signal};

    fn mask_of(signals: &[Signal]) -> SigSet {
        let mut mask = SigSet::empty();
        for &s in signals {
            mask.add(s);
        }
        mask
    }

    #[test]
    fn test_signo_of_reads_leading_word() {
        let mut record = [0u8; RECORD_LEN];
        record[..4].copy_from_slice(&10u32.to_ne_bytes());
        assert_eq!(signo_of(&record), 10);
    }

    #[test]
    fn test_signo_of_truncated_record_is_zero() {
        assert_eq!(signo_of(&[1, 2]), 0);
        assert_eq!(signo_of(&[]), 0);
    }

    #[test]
    fn test_empty_queue_reads_none() {
        std::thread::spawn(|| {
            let queue = SignalQueue::open(&mask_of(&[Signal::SIGUSR1])).unwrap();
            assert_eq!(queue.read_record().unwrap(), None);
            queue.close().unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_queued_signal_is_read_once() {
        std::thread::spawn(|| {
            let mask = mask_of(&[Signal::SIGUSR2]);
            pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).unwrap();
            let queue = SignalQueue::open(&mask).unwrap();

            raise(Signal::SIGUSR2).unwrap();
            assert_eq!(queue.read_record().unwrap(), Some(libc::SIGUSR2));
            assert_eq!(queue.read_record().unwrap(), None);
            queue.close().unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_set_mask_narrows_accepted_signals() {
        std::thread::spawn(|| {
            let both = mask_of(&[Signal::SIGUSR1, Signal::SIGUSR2]);
            pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&both), None).unwrap();
            let mut queue = SignalQueue::open(&both).unwrap();
            queue.set_mask(&mask_of(&[Signal::SIGUSR1])).unwrap();

            raise(Signal::SIGUSR2).unwrap();
            assert_eq!(queue.read_record().unwrap(), None);
            raise(Signal::SIGUSR1).unwrap();
            assert_eq!(queue.read_record().unwrap(), Some(libc::SIGUSR1));
            queue.close().unwrap();
        })
        .join()
        .unwrap();
    }
}

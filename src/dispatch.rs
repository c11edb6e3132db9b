//! Readiness-based dispatcher.
//!
//! One thread, one `poll(2)` per round: wait for any source's socket to
//! become readable or for the earliest retransmission deadline, then run the
//! receive hooks of the ready sources and the deadline checks of all of them.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// What the dispatcher needs from a managed device.
pub trait EventSource {
    /// Socket to watch for readability, if a capture is open.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Called when `raw_fd` is readable.
    fn on_readable(&mut self);

    fn next_deadline(&self) -> Option<Instant>;

    fn check_deadline(&mut self, now: Instant);
}

/// How long to wait given the sources' deadlines, capped at `max_wait`.
pub fn wait_timeout(
    sources: &[&mut dyn EventSource],
    now: Instant,
    max_wait: Duration,
) -> Duration {
    sources
        .iter()
        .filter_map(|source| source.next_deadline())
        .min()
        .map(|deadline| deadline.saturating_duration_since(now))
        .map_or(max_wait, |until| until.min(max_wait))
}

/// Run one round. Returns the number of sources that were readable.
#[cfg(target_os = "linux")]
pub fn run_once(sources: &mut [&mut dyn EventSource], max_wait: Duration) -> io::Result<usize> {
    let timeout = wait_timeout(sources, Instant::now(), max_wait);

    let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(sources.len());
    let mut owners: Vec<usize> = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        if let Some(fd) = source.raw_fd() {
            pollfds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
            owners.push(index);
        }
    }

    // Round up so a deadline is never polled for just short of.
    let timeout_ms = timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };

    let mut ready = 0;
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            error!("poll: {}", err);
            return Err(err);
        }
    } else if rc > 0 {
        for (pollfd, &index) in pollfds.iter().zip(owners.iter()) {
            if pollfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                debug!("fd {} ready (revents {:#x})", pollfd.fd, pollfd.revents);
                sources[index].on_readable();
                ready += 1;
            }
        }
    }

    let now = Instant::now();
    for source in sources.iter_mut() {
        source.check_deadline(now);
    }

    Ok(ready)
}

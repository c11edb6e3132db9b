//! Retransmission deadlines.
//!
//! The capture layer runs no clock of its own. The dispatcher asks for the
//! next deadline to bound its wait, and calls back once time has passed.

use std::time::Instant;

/// Something with at most one pending retransmission.
pub trait Retransmit {
    /// The instant at which the last request must be resent, if any.
    fn retransmit_deadline(&self) -> Option<Instant>;

    /// Resend. Responsible for clearing or moving the deadline.
    fn retransmit(&mut self);
}

pub fn next_deadline<R: Retransmit + ?Sized>(device: &R) -> Option<Instant> {
    device.retransmit_deadline()
}

/// Trigger a retransmission if the deadline has been reached.
///
/// Returns whether `retransmit` was called. The deadline itself is left for
/// the retransmit trigger to update.
pub fn check_deadline<R: Retransmit + ?Sized>(device: &mut R, now: Instant) -> bool {
    match device.retransmit_deadline() {
        Some(deadline) if now >= deadline => {
            device.retransmit();
            true
        }
        _ => false,
    }
}

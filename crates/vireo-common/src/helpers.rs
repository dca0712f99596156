use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed since a process-wide monotonic epoch.
///
/// Used as the presentation-timestamp correlation key handed to the
/// hardware decoder, so it must never go backwards; wall-clock time is
/// deliberately avoided here.
pub fn now_us() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as u64
}

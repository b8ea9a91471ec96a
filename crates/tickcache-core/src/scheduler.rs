//! Interval checks driven by the host's tick clock.
//!
//! Each periodic behavior keeps its own accumulator of elapsed tick time.
//! Accumulating the host's delta (instead of arming wall-clock timers) keeps
//! everything on the clock the rest of the overlay uses, and pauses for free
//! when the host stops ticking.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Interval;

/// What happens to the accumulator after an action fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carry {
    /// Reset to zero.
    Discard,
    /// Keep the overshoot so the cadence stays strictly periodic.
    Remainder,
}

/// Result of an asynchronous interval check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    /// Interval not reached yet (or never fires).
    Idle,
    /// Interval reached but the previous task is still running.
    Busy,
    /// A new task was spawned.
    Fired,
}

fn accumulate(elapsed: Duration, interval: Interval, acc: &mut Duration) -> Option<Duration> {
    let period = interval.period()?;
    *acc = acc.saturating_add(elapsed);
    (*acc >= period).then_some(period)
}

fn reset(acc: &mut Duration, period: Duration, carry: Carry) {
    *acc = match carry {
        Carry::Remainder if !period.is_zero() => {
            let rest = acc.as_nanos() % period.as_nanos();
            Duration::from_nanos(rest as u64)
        }
        _ => Duration::ZERO,
    };
}

/// Add `elapsed` to `acc` and run `action` once `acc` reaches `interval`.
///
/// Returns whether the action ran.
pub fn run_if_due<F>(action: F, elapsed: Duration, interval: Interval, acc: &mut Duration, carry: Carry) -> bool
where
    F: FnOnce(),
{
    let Some(period) = accumulate(elapsed, interval, acc) else {
        return false;
    };
    action();
    reset(acc, period, carry);
    true
}

/// Asynchronous variant of [`run_if_due`].
///
/// The future built by `spawn` runs as a tokio task whose handle is kept in
/// `slot`. While that task is unfinished the check returns [`Due::Busy`] and
/// the accumulator stays elevated, so the next tick retries right away.
pub fn spawn_if_due<F, Fut>(
    spawn: F,
    elapsed: Duration,
    interval: Interval,
    acc: &mut Duration,
    carry: Carry,
    slot: &mut Option<JoinHandle<()>>,
) -> Due
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Some(period) = accumulate(elapsed, interval, acc) else {
        return Due::Idle;
    };
    if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
        return Due::Busy;
    }
    *slot = Some(tokio::spawn(spawn()));
    reset(acc, period, carry);
    Due::Fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_fires_once_interval_is_reached() {
        let mut acc = Duration::ZERO;
        let mut fired = 0;
        let interval = Interval::from_mins(5);

        assert!(!run_if_due(|| fired += 1, 4 * MINUTE, interval, &mut acc, Carry::Discard));
        assert_eq!(acc, 4 * MINUTE);
        assert!(run_if_due(|| fired += 1, 2 * MINUTE, interval, &mut acc, Carry::Discard));
        assert_eq!(fired, 1);
        assert_eq!(acc, Duration::ZERO);
    }

    #[test]
    fn test_remainder_keeps_overshoot() {
        let mut acc = Duration::ZERO;
        let interval = Interval::from_mins(5);

        run_if_due(|| {}, 4 * MINUTE, interval, &mut acc, Carry::Remainder);
        assert!(run_if_due(|| {}, 2 * MINUTE, interval, &mut acc, Carry::Remainder));
        assert_eq!(acc, MINUTE);

        // A long stall does not queue up several firings
        assert!(run_if_due(|| {}, 12 * MINUTE, interval, &mut acc, Carry::Remainder));
        assert_eq!(acc, 3 * MINUTE);
    }

    #[test]
    fn test_never_interval_does_not_accumulate() {
        let mut acc = Duration::ZERO;
        assert!(!run_if_due(|| panic!("must not run"), 60 * MINUTE, Interval::Never, &mut acc, Carry::Discard));
        assert_eq!(acc, Duration::ZERO);
    }

    #[test]
    fn test_zero_interval_fires_every_tick() {
        let mut acc = Duration::ZERO;
        let interval = Interval::from_millis(0);
        assert!(run_if_due(|| {}, Duration::from_millis(16), interval, &mut acc, Carry::Remainder));
        assert!(run_if_due(|| {}, Duration::ZERO, interval, &mut acc, Carry::Remainder));
        assert_eq!(acc, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_spawn_skips_while_previous_task_runs() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut acc = Duration::ZERO;
        let mut slot = None;
        let interval = Interval::from_secs(1);

        let counter = runs.clone();
        let due = spawn_if_due(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.await;
            },
            Duration::from_secs(1),
            interval,
            &mut acc,
            Carry::Discard,
            &mut slot,
        );
        assert_eq!(due, Due::Fired);
        assert_eq!(acc, Duration::ZERO);

        let due = spawn_if_due(|| async {}, Duration::from_secs(2), interval, &mut acc, Carry::Discard, &mut slot);
        assert_eq!(due, Due::Busy);
        assert_eq!(acc, Duration::from_secs(2), "accumulator stays elevated");

        release_tx.send(()).unwrap();
        slot.take().unwrap().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let due = spawn_if_due(|| async {}, Duration::ZERO, interval, &mut acc, Carry::Discard, &mut slot);
        assert_eq!(due, Due::Fired, "retries on the next tick");
    }
}

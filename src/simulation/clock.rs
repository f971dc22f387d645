//! Logical clock and pending-event queue.
//!
//! The queue is a `BTreeMap` keyed by `(timestamp, sequence)`, so iteration order
//! is timestamp ascending and, within a timestamp, scheduling order. The sequence
//! number doubles as the cancellation handle.
//!
//! Time is kept in integer nanoseconds; seconds (`f64`) are only used at the API
//! boundary. This keeps tie detection exact across long runs.

use std::collections::BTreeMap;
use std::fmt;

use super::error::{SimError, SimResult};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A point (or span) of simulated time, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    /// Saturates at [`SimTime::MAX`].
    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    /// Convert seconds to simulated time, rounding to the nearest nanosecond.
    ///
    /// Negative, NaN and infinite inputs are rejected.
    pub fn from_secs(secs: f64) -> SimResult<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(SimError::config(format!("time must be a finite non-negative number of seconds, got {secs}")));
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos >= u64::MAX as f64 {
            return Err(SimError::config(format!("time {secs}s does not fit the simulation clock")));
        }
        Ok(SimTime(nanos as u64))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    pub fn saturating_add(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs())
    }
}

/// Opaque handle returned by [`Clock::schedule`], used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    at: SimTime,
    seq: u64,
}

impl EventHandle {
    pub fn at(&self) -> SimTime {
        self.at
    }
}

/// Why a call to [`Clock::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No pending events were left.
    Drained,
    /// The next event lay beyond the `until` limit and was discarded.
    LimitReached,
    /// A handler called [`Clock::halt`].
    Halted,
}

/// Result of a [`Clock::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: u64,
    pub reason: StopReason,
}

/// Single-threaded discrete-event clock over events of type `E`.
#[derive(Debug)]
pub struct Clock<E> {
    now: SimTime,
    next_seq: u64,
    queue: BTreeMap<(SimTime, u64), E>,
    halted: bool,
    dispatched: u64,
}

impl<E> Default for Clock<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clock<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            queue: BTreeMap::new(),
            halted: false,
            dispatched: 0,
        }
    }

    /// Current simulated time: the timestamp of the last dispatched event.
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total number of events dispatched over the clock's lifetime.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Insert an event at an absolute time.
    ///
    /// Fails with [`SimError::InvalidTime`] if `at` lies before [`Clock::now`].
    pub fn schedule(&mut self, at: SimTime, event: E) -> SimResult<EventHandle> {
        if at < self.now {
            return Err(SimError::InvalidTime {
                requested: at.as_secs(),
                now: self.now.as_secs(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((at, seq), event);
        Ok(EventHandle { at, seq })
    }

    /// Insert an event `delay` after the current time.
    pub fn schedule_in(&mut self, delay: SimTime, event: E) -> SimResult<EventHandle> {
        self.schedule(self.now.saturating_add(delay), event)
    }

    /// Remove a not-yet-dispatched event. Returns `false` if it was already
    /// dispatched, discarded or cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.queue.remove(&(handle.at, handle.seq)).is_some()
    }

    /// Ask the running loop to return after the current dispatch.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Timestamp of the earliest pending event.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Dispatch events in timestamp order until the queue drains, a handler
    /// halts the clock, or the next event lies beyond `until`.
    ///
    /// The first event found beyond `until` is discarded unprocessed and the
    /// clock is moved to `until`. Later events stay queued. A handler error
    /// aborts the loop and is returned as is.
    pub fn run<F>(&mut self, until: SimTime, mut dispatch: F) -> SimResult<RunSummary>
    where
        F: FnMut(&mut Self, SimTime, E) -> SimResult<()>,
    {
        self.halted = false;
        let mut dispatched = 0;
        loop {
            if self.halted {
                return Ok(RunSummary {
                    dispatched,
                    reason: StopReason::Halted,
                });
            }
            let Some(((at, seq), event)) = self.queue.pop_first() else {
                return Ok(RunSummary {
                    dispatched,
                    reason: StopReason::Drained,
                });
            };
            if at > until {
                log::trace!("discarding event #{seq} at {at}, beyond limit {until}");
                self.now = self.now.max(until);
                return Ok(RunSummary {
                    dispatched,
                    reason: StopReason::LimitReached,
                });
            }
            debug_assert!(at >= self.now, "event queue went backwards: {at} < {}", self.now);
            self.now = at;
            self.dispatched += 1;
            dispatched += 1;
            dispatch(self, at, event)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(clock: &mut Clock<u32>, until: SimTime) -> Vec<(SimTime, u32)> {
        let mut seen = Vec::new();
        clock
            .run(until, |_, at, e| {
                seen.push((at, e));
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn from_secs_rounds_to_nanos() {
        assert_eq!(SimTime::from_secs(1.5).unwrap().as_nanos(), 1_500_000_000);
        assert_eq!(SimTime::from_secs(0.008).unwrap().as_nanos(), 8_000_000);
        assert!(SimTime::from_secs(-1.0).is_err());
        assert!(SimTime::from_secs(f64::NAN).is_err());
    }

    #[test]
    fn from_millis_saturates() {
        assert_eq!(SimTime::from_millis(8).as_nanos(), 8_000_000);
        assert_eq!(SimTime::from_millis(u64::MAX), SimTime::MAX);
        assert_eq!(SimTime::from_millis(u64::MAX / 1_000_000 + 1), SimTime::MAX);
    }

    #[test]
    fn dispatches_in_time_order_with_fifo_ties() {
        let mut clock = Clock::new();
        clock.schedule(SimTime::from_millis(30), 1).unwrap();
        clock.schedule(SimTime::from_millis(10), 2).unwrap();
        clock.schedule(SimTime::from_millis(30), 3).unwrap();
        clock.schedule(SimTime::from_millis(10), 4).unwrap();

        let order: Vec<u32> = drain(&mut clock, SimTime::MAX).into_iter().map(|(_, e)| e).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
        assert_eq!(clock.now(), SimTime::from_millis(30));
    }

    #[test]
    fn scheduling_in_the_past_fails() {
        let mut clock = Clock::new();
        clock.schedule(SimTime::from_millis(5), 0).unwrap();
        drain(&mut clock, SimTime::MAX);
        let err = clock.schedule(SimTime::from_millis(4), 1).unwrap_err();
        assert!(matches!(err, SimError::InvalidTime { .. }));
        // Scheduling exactly at "now" is allowed.
        assert!(clock.schedule(SimTime::from_millis(5), 2).is_ok());
    }

    #[test]
    fn cancel_removes_pending_event_only_once() {
        let mut clock = Clock::new();
        let keep = clock.schedule(SimTime::from_millis(1), 1).unwrap();
        let gone = clock.schedule(SimTime::from_millis(2), 2).unwrap();
        assert!(clock.cancel(gone));
        assert!(!clock.cancel(gone));

        let seen = drain(&mut clock, SimTime::MAX);
        assert_eq!(seen, vec![(SimTime::from_millis(1), 1)]);
        // Already processed: no-op.
        assert!(!clock.cancel(keep));
    }

    #[test]
    fn run_discards_first_event_beyond_limit() {
        let mut clock = Clock::new();
        clock.schedule(SimTime::from_millis(1), 1).unwrap();
        clock.schedule(SimTime::from_millis(20), 2).unwrap();
        clock.schedule(SimTime::from_millis(30), 3).unwrap();

        let mut seen = Vec::new();
        let summary = clock
            .run(SimTime::from_millis(10), |_, _, e| {
                seen.push(e);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![1]);
        assert_eq!(summary.reason, StopReason::LimitReached);
        assert_eq!(clock.now(), SimTime::from_millis(10));
        // Event 2 was consumed by the hard stop, event 3 is still queued.
        assert_eq!(clock.pending(), 1);
        assert_eq!(clock.peek_time(), Some(SimTime::from_millis(30)));
    }

    #[test]
    fn handlers_can_schedule_follow_ups_and_halt() {
        let mut clock = Clock::new();
        clock.schedule(SimTime::ZERO, 0).unwrap();
        let mut seen = Vec::new();
        let summary = clock
            .run(SimTime::MAX, |clock, _, e| {
                seen.push(e);
                if e == 3 {
                    clock.halt();
                } else {
                    clock.schedule_in(SimTime::from_millis(1), e + 1)?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(summary.reason, StopReason::Halted);
        assert_eq!(summary.dispatched, 4);
        assert_eq!(clock.now(), SimTime::from_millis(3));
    }

    #[test]
    fn handler_error_aborts_run() {
        let mut clock = Clock::new();
        clock.schedule(SimTime::from_millis(1), 1).unwrap();
        clock.schedule(SimTime::from_millis(2), 2).unwrap();
        let err = clock
            .run(SimTime::MAX, |clock, _, _| clock.schedule(SimTime::ZERO, 9).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidTime { .. }));
        assert_eq!(clock.dispatched(), 1);
    }

    proptest! {
        #[test]
        fn dispatch_order_is_time_then_schedule_order(times in proptest::collection::vec(0u64..50, 0..200)) {
            let mut clock = Clock::new();
            for (i, t) in times.iter().enumerate() {
                clock.schedule(SimTime::from_nanos(*t), i as u32).unwrap();
            }
            let seen = drain(&mut clock, SimTime::MAX);
            prop_assert_eq!(seen.len(), times.len());
            for pair in seen.windows(2) {
                let (t0, i0) = pair[0];
                let (t1, i1) = pair[1];
                prop_assert!(t0 <= t1);
                if t0 == t1 {
                    prop_assert!(i0 < i1);
                }
            }
        }
    }
}

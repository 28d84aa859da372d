//! Time-ordered execution of scheduled callbacks.
//!
//! The scheduler owns the virtual clock. Events are ordered by
//! `(fire_time, sequence)`: earlier times first, and among equal times the one
//! scheduled first fires first. Actions receive `&mut EventScheduler`, which is
//! how periodic work reschedules itself.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use super::error::SimError;
use super::time::{SimDuration, SimTime};

/// Callback executed when an event fires.
pub type Action = Box<dyn FnOnce(&mut EventScheduler)>;

/// Identifies a scheduled event for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

/// A pending event. Consumed exactly once, either fired or discarded.
pub struct Event {
    pub fire_time: SimTime,
    pub sequence: u64,
    action: Action,
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time && self.sequence == other.sequence
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, reverse so the earliest (time, sequence) pops first.
        other.fire_time.cmp(&self.fire_time).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a call to [`EventScheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Actions executed during this run.
    pub events_executed: u64,
    /// Events dropped because they were cancelled or fell past the stop time.
    pub events_discarded: u64,
    /// Clock value when the run returned.
    pub final_time: SimTime,
}

/// Single-threaded discrete-event scheduler.
pub struct EventScheduler {
    now: SimTime,
    next_sequence: u64,
    queue: BinaryHeap<Event>,
    /// Sequences of events that are scheduled and not yet fired or cancelled.
    pending: HashSet<u64>,
    stop_requested: bool,
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventScheduler {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_sequence: 0,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            stop_requested: false,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events still waiting to fire.
    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Schedule `action` to run `delay` after the current time.
    ///
    /// # Errors
    /// - `SimError::InvalidSchedule` - `delay` is negative or the fire time overflows
    pub fn schedule(&mut self, delay: SimDuration, action: impl FnOnce(&mut EventScheduler) + 'static) -> Result<EventHandle, SimError> {
        if delay.is_negative() {
            return Err(SimError::invalid_schedule(format!("delay {}s is negative", delay.as_secs_f64())));
        }
        let fire_time = self
            .now
            .checked_add(delay)
            .ok_or_else(|| SimError::invalid_schedule(format!("fire time {} + {}s overflows", self.now, delay.as_secs_f64())))?;
        Ok(self.insert(fire_time, Box::new(action)))
    }

    /// Schedule `action` at an absolute time.
    ///
    /// # Errors
    /// - `SimError::InvalidSchedule` - `time` lies before the current time
    pub fn schedule_at(&mut self, time: SimTime, action: impl FnOnce(&mut EventScheduler) + 'static) -> Result<EventHandle, SimError> {
        if time < self.now {
            return Err(SimError::invalid_schedule(format!("target time {} is before now ({})", time, self.now)));
        }
        Ok(self.insert(time, Box::new(action)))
    }

    fn insert(&mut self, fire_time: SimTime, action: Action) -> EventHandle {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push(Event { fire_time, sequence, action });
        self.pending.insert(sequence);
        EventHandle(sequence)
    }

    /// Cancel a pending event. Unknown or already fired handles are ignored.
    pub fn cancel(&mut self, handle: EventHandle) {
        if self.pending.remove(&handle.0) {
            log::trace!("Cancelled event #{} at {}", handle.0, self.now);
        }
    }

    /// Ask the running loop to return once the current action completes.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// Execute events in time order until the queue drains, `stop()` is called,
    /// or the next event would fire after `stop_time`.
    ///
    /// When the stop time is reached the offending event and everything queued
    /// behind it is discarded and the clock is pinned to `stop_time`. When the
    /// queue simply drains the clock stays at the last executed event.
    pub fn run(&mut self, stop_time: SimTime) -> RunSummary {
        log::debug!("Running scheduler from {} until {} ({} pending)", self.now, stop_time, self.pending.len());
        self.stop_requested = false;
        let mut executed = 0u64;
        let mut discarded = 0u64;

        while let Some(event) = self.queue.pop() {
            if !self.pending.remove(&event.sequence) {
                discarded += 1;
                continue;
            }
            if event.fire_time > stop_time {
                // Cancelled entries still in the heap count too, wherever they sat.
                discarded += 1 + self.queue.len() as u64;
                self.queue.clear();
                self.pending.clear();
                if stop_time > self.now {
                    self.now = stop_time;
                }
                break;
            }

            self.now = event.fire_time;
            (event.action)(self);
            executed += 1;

            if self.stop_requested {
                log::debug!("Stop requested at {}", self.now);
                break;
            }
        }

        log::debug!("Scheduler returned at {}: {} executed, {} discarded", self.now, executed, discarded);
        RunSummary {
            events_executed: executed,
            events_discarded: discarded,
            final_time: self.now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<(u64, &'static str)>>>, impl Fn(&'static str) -> Box<dyn FnOnce(&mut EventScheduler)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| {
            let sink = sink.clone();
            Box::new(move |s: &mut EventScheduler| sink.borrow_mut().push((s.now().as_nanos(), label))) as Box<dyn FnOnce(&mut EventScheduler)>
        };
        (log, make)
    }

    #[test]
    fn fires_in_time_order_with_insertion_tie_break() {
        let (log, make) = recorder();
        let mut s = EventScheduler::new();
        s.schedule(SimDuration::from_millis(30), make("c")).unwrap();
        s.schedule(SimDuration::from_millis(10), make("a1")).unwrap();
        s.schedule(SimDuration::from_millis(20), make("b")).unwrap();
        s.schedule(SimDuration::from_millis(10), make("a2")).unwrap();
        s.schedule(SimDuration::from_millis(10), make("a3")).unwrap();

        let summary = s.run(SimTime::from_millis(100));
        assert_eq!(summary.events_executed, 5);
        let labels: Vec<_> = log.borrow().iter().map(|(_, l)| *l).collect();
        assert_eq!(labels, vec!["a1", "a2", "a3", "b", "c"]);
        let times: Vec<_> = log.borrow().iter().map(|(t, _)| *t).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn negative_delay_is_rejected_and_not_enqueued() {
        let mut s = EventScheduler::new();
        let err = s.schedule(SimDuration::from_millis(-1), |_| {}).unwrap_err();
        assert!(matches!(err, SimError::InvalidSchedule { .. }));
        assert_eq!(s.pending_events(), 0);
    }

    #[test]
    fn schedule_at_rejects_past_times() {
        let mut s = EventScheduler::new();
        s.schedule(SimDuration::from_secs(2), |s| {
            assert!(s.schedule_at(SimTime::from_millis(1000), |_| {}).is_err());
            assert!(s.schedule_at(SimTime::from_millis(2000), |_| {}).is_ok());
        })
        .unwrap();
        s.run(SimTime::from_millis(5000));
    }

    #[test]
    fn cancel_removes_pending_and_ignores_unknown_handles() {
        let (log, make) = recorder();
        let mut s = EventScheduler::new();
        let keep = s.schedule(SimDuration::from_millis(1), make("keep")).unwrap();
        let dropped = s.schedule(SimDuration::from_millis(2), make("drop")).unwrap();
        s.cancel(dropped);
        s.cancel(dropped);
        assert!(s.is_pending(keep));
        assert!(!s.is_pending(dropped));

        let summary = s.run(SimTime::from_millis(10));
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0].1, "keep");
        assert_eq!(summary.events_discarded, 1);

        // Already fired: no-op.
        s.cancel(keep);
    }

    #[test]
    fn stop_time_discards_late_event_and_pins_clock() {
        let (log, make) = recorder();
        let mut s = EventScheduler::new();
        s.schedule(SimDuration::from_secs(1), make("in")).unwrap();
        s.schedule(SimDuration::from_secs(5), make("at-stop")).unwrap();
        s.schedule(SimDuration::from_secs(6), make("late")).unwrap();
        s.schedule(SimDuration::from_secs(7), make("later")).unwrap();

        let summary = s.run(SimTime::from_millis(5000));
        let labels: Vec<_> = log.borrow().iter().map(|(_, l)| *l).collect();
        assert_eq!(labels, vec!["in", "at-stop"]);
        assert_eq!(summary.events_discarded, 2);
        assert_eq!(s.now(), SimTime::from_millis(5000));
        assert_eq!(s.pending_events(), 0);
    }

    #[test]
    fn drained_queue_leaves_clock_at_last_event() {
        let mut s = EventScheduler::new();
        s.schedule(SimDuration::from_secs(2), |_| {}).unwrap();
        let summary = s.run(SimTime::from_millis(10_000));
        assert_eq!(summary.final_time, SimTime::from_millis(2000));
    }

    #[test]
    fn actions_can_reschedule_themselves() {
        fn tick(count: Rc<RefCell<u32>>, s: &mut EventScheduler) {
            *count.borrow_mut() += 1;
            s.schedule(SimDuration::from_secs(1), move |s| tick(count, s)).unwrap();
        }

        let count = Rc::new(RefCell::new(0));
        let mut s = EventScheduler::new();
        let first = count.clone();
        s.schedule(SimDuration::from_secs(1), move |s| tick(first, s)).unwrap();
        s.run(SimTime::from_millis(10_000));
        assert_eq!(*count.borrow(), 10);
        assert_eq!(s.now(), SimTime::from_millis(10_000));
    }

    #[test]
    fn stop_request_returns_after_current_action() {
        let (log, make) = recorder();
        let mut s = EventScheduler::new();
        s.schedule(SimDuration::from_secs(1), |s| s.stop()).unwrap();
        s.schedule(SimDuration::from_secs(2), make("after-stop")).unwrap();

        let summary = s.run(SimTime::from_millis(10_000));
        assert_eq!(summary.events_executed, 1);
        assert_eq!(s.now(), SimTime::from_millis(1000));
        assert!(log.borrow().is_empty());
        assert_eq!(s.pending_events(), 1);

        // Resuming picks up where it left off.
        s.run(SimTime::from_millis(10_000));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn zero_delay_from_action_fires_in_same_tick_after_current() {
        let (log, make) = recorder();
        let mut s = EventScheduler::new();
        let follow = make("follow");
        let sibling = make("sibling");
        s.schedule(SimDuration::from_secs(1), move |s| {
            s.schedule(SimDuration::ZERO, follow).unwrap();
        })
        .unwrap();
        s.schedule(SimDuration::from_secs(1), sibling).unwrap();
        s.run(SimTime::from_millis(5000));

        let entries = log.borrow();
        assert_eq!(entries[0], (1_000_000_000, "sibling"));
        assert_eq!(entries[1], (1_000_000_000, "follow"));
    }
    #[test]
    fn discard_count_includes_cancellations_on_either_side_of_the_stop_time() {
        for cancelled_secs in [4, 7] {
            let mut s = EventScheduler::new();
            s.schedule(SimDuration::from_secs(1), |_| {}).unwrap();
            let cancelled = s.schedule(SimDuration::from_secs(cancelled_secs), |_| {}).unwrap();
            s.schedule(SimDuration::from_secs(6), |_| {}).unwrap();
            s.cancel(cancelled);

            let summary = s.run(SimTime::from_millis(5000));
            assert_eq!(summary.events_executed, 1);
            assert_eq!(summary.events_discarded, 2, "cancelled event at {}s", cancelled_secs);
        }
    }

    #[test]
    fn pseudo_random_schedules_fire_in_time_then_insertion_order() {
        // Small LCG so the sequence is reproducible without extra crates.
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            state >> 33
        };

        for round in 0..20 {
            let fired = Rc::new(RefCell::new(Vec::new()));
            let mut s = EventScheduler::new();
            let count = 50 + (next() % 200) as usize;
            for index in 0..count {
                // Few distinct delays so ties are frequent.
                let delay = SimDuration::from_millis((next() % 16) as i64);
                let log = fired.clone();
                s.schedule(delay, move |s| log.borrow_mut().push((s.now(), index))).unwrap();
            }
            let summary = s.run(SimTime::from_millis(1000));
            assert_eq!(summary.events_executed, count as u64);

            let fired = fired.borrow();
            assert_eq!(fired.len(), count);
            for pair in fired.windows(2) {
                let ((t0, i0), (t1, i1)) = (pair[0], pair[1]);
                assert!(t0 < t1 || (t0 == t1 && i0 < i1), "round {}: {:?} before {:?}", round, pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn pseudo_random_nested_schedules_never_run_backwards() {
        let mut state: u64 = 42;
        let mut next = move || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            state >> 33
        };
        let delays: Vec<i64> = (0..300).map(|_| (next() % 5) as i64).collect();

        fn spawn(s: &mut EventScheduler, delays: Rc<Vec<i64>>, at: usize, seen: Rc<RefCell<Vec<SimTime>>>) {
            let Some(&delay) = delays.get(at) else {
                return;
            };
            s.schedule(SimDuration::from_millis(delay), move |s| {
                seen.borrow_mut().push(s.now());
                spawn(s, delays.clone(), 2 * at + 1, seen.clone());
                spawn(s, delays, 2 * at + 2, seen);
            })
            .unwrap();
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut s = EventScheduler::new();
        spawn(&mut s, Rc::new(delays), 0, seen.clone());
        s.run(SimTime::from_millis(100_000));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 300);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}

//! Observers that turn simulation state into trace records.
//!
//! - `ThroughputMonitor` samples a sink's byte counter every interval.
//! - `SnrMonitor` reports the SNR of every frame a device's radio receives.
//!
//! Neither monitor mutates the state it observes. Both hold weak references
//! to their targets, so an observed object that disappears mid-run turns the
//! corresponding callback into a no-op.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::error::SimError;
use super::phy::{LinkPhysicalLayer, NetDevice, SubscriptionHandle};
use super::scheduler::{EventHandle, EventScheduler};
use super::time::SimDuration;
use super::trace::{SharedTrace, SnrSample, ThroughputSample, TraceLog, TraceRecord};
use super::traffic::Sink;

type TickFn = Box<dyn FnMut(&mut EventScheduler)>;

struct PeriodicState {
    interval: SimDuration,
    pending: Cell<Option<EventHandle>>,
    stopped: Cell<bool>,
    tick: RefCell<TickFn>,
}

/// Callback that re-arms itself every `interval` until cancelled.
///
/// The first tick fires one interval after `start`. The task owns its pending
/// event handle, so it can be cancelled without waiting for the scheduler's
/// stop time. Dropping the task also ends it: the queued event only holds a
/// weak reference and does nothing once the task is gone.
pub struct PeriodicTask {
    state: Rc<PeriodicState>,
}

impl PeriodicTask {
    /// # Errors
    /// - `SimError::InvalidSchedule` - `interval` is zero or negative
    pub fn start(scheduler: &mut EventScheduler, interval: SimDuration, tick: impl FnMut(&mut EventScheduler) + 'static) -> Result<Self, SimError> {
        if interval <= SimDuration::ZERO {
            return Err(SimError::invalid_schedule(format!(
                "periodic interval must be positive, got {}s",
                interval.as_secs_f64()
            )));
        }
        let state = Rc::new(PeriodicState {
            interval,
            pending: Cell::new(None),
            stopped: Cell::new(false),
            tick: RefCell::new(Box::new(tick)),
        });
        Self::arm(&state, scheduler)?;
        Ok(Self { state })
    }

    fn arm(state: &Rc<PeriodicState>, scheduler: &mut EventScheduler) -> Result<(), SimError> {
        let weak = Rc::downgrade(state);
        let handle = scheduler.schedule(state.interval, move |s| Self::fire(&weak, s))?;
        state.pending.set(Some(handle));
        Ok(())
    }

    fn fire(weak: &Weak<PeriodicState>, scheduler: &mut EventScheduler) {
        let Some(state) = weak.upgrade() else {
            return;
        };
        state.pending.set(None);
        if state.stopped.get() {
            return;
        }
        {
            let mut tick = state.tick.borrow_mut();
            (*tick)(scheduler);
        }
        if let Err(e) = Self::arm(&state, scheduler) {
            log::warn!("Periodic task stops at {}: {}", scheduler.now(), e);
            state.stopped.set(true);
        }
    }

    /// Stop ticking. Safe to call more than once.
    pub fn cancel(&self, scheduler: &mut EventScheduler) {
        self.state.stopped.set(true);
        if let Some(handle) = self.state.pending.take() {
            scheduler.cancel(handle);
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.stopped.get()
    }

    pub fn interval(&self) -> SimDuration {
        self.state.interval
    }
}

struct ThroughputState {
    sink: Weak<RefCell<Sink>>,
    trace: Weak<RefCell<TraceLog>>,
    interval_secs: f64,
    last_total: u64,
}

impl ThroughputState {
    fn tick(&mut self, scheduler: &mut EventScheduler) {
        let Some(sink) = self.sink.upgrade() else {
            log::debug!("Throughput monitor target is gone at {}", scheduler.now());
            return;
        };
        let total = sink.borrow().total_bytes_received();
        let delta = total.saturating_sub(self.last_total);
        self.last_total = total;

        let mbps = delta as f64 * 8.0 / (self.interval_secs * 1e6);
        if let Some(trace) = self.trace.upgrade() {
            trace.borrow_mut().record(TraceRecord::Throughput(ThroughputSample { time: scheduler.now(), mbps }));
        }
    }
}

/// Reports the sink's receive rate once per interval.
///
/// ```text
/// mbps = (total - last_total) * 8 / (interval_seconds * 1e6)
/// ```
///
/// Each monitor keeps its own `last_total`, so several monitors can watch the
/// same sink at different intervals without interfering.
pub struct ThroughputMonitor {
    state: Rc<RefCell<ThroughputState>>,
    task: PeriodicTask,
}

impl ThroughputMonitor {
    /// Create the monitor and schedule its first tick one `interval` from now.
    ///
    /// # Errors
    /// - `SimError::InvalidSchedule` - `interval` is zero or negative
    pub fn start(scheduler: &mut EventScheduler, sink: &Rc<RefCell<Sink>>, interval: SimDuration, trace: &SharedTrace) -> Result<Self, SimError> {
        let state = Rc::new(RefCell::new(ThroughputState {
            sink: Rc::downgrade(sink),
            trace: Rc::downgrade(trace),
            interval_secs: interval.as_secs_f64(),
            last_total: 0,
        }));
        let ticking = state.clone();
        let task = PeriodicTask::start(scheduler, interval, move |s| ticking.borrow_mut().tick(s))?;
        log::debug!("Throughput monitor armed, first sample at {}s", interval.as_secs_f64());
        Ok(Self { state, task })
    }

    /// Byte count seen at the last tick.
    pub fn last_total(&self) -> u64 {
        self.state.borrow().last_total
    }

    pub fn interval(&self) -> SimDuration {
        self.task.interval()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_active()
    }

    /// Cancel the pending tick. No further samples are produced.
    pub fn stop(&self, scheduler: &mut EventScheduler) {
        self.task.cancel(scheduler);
    }
}

/// Reports `signal - noise` for every frame received by one device.
pub struct SnrMonitor {
    device: String,
    subscription: Option<(Weak<RefCell<LinkPhysicalLayer>>, SubscriptionHandle)>,
    samples: Rc<Cell<u64>>,
}

impl SnrMonitor {
    /// Subscribe to the device's receive events.
    ///
    /// # Errors
    /// - `SimError::UnsupportedCapability` - the device has no radio
    pub fn try_attach(device: &dyn NetDevice, trace: &SharedTrace) -> Result<Self, SimError> {
        let capability = device.as_wireless_capable().ok_or_else(|| SimError::UnsupportedCapability {
            device: device.name().to_string(),
        })?;

        let samples = Rc::new(Cell::new(0u64));
        let counter = samples.clone();
        let trace = Rc::downgrade(trace);
        let handle = capability.subscribe(move |sample| {
            let Some(trace) = trace.upgrade() else {
                return;
            };
            trace.borrow_mut().record(TraceRecord::Snr(SnrSample {
                time: sample.time,
                snr_db: sample.snr_db(),
            }));
            counter.set(counter.get() + 1);
        });

        log::debug!("SNR monitor attached to {}", device.name());
        Ok(Self {
            device: device.name().to_string(),
            subscription: Some((Rc::downgrade(capability.phy()), handle)),
            samples,
        })
    }

    /// Like `try_attach`, but a device without a radio yields a detached
    /// monitor instead of an error.
    pub fn attach(device: &dyn NetDevice, trace: &SharedTrace) -> Self {
        match Self::try_attach(device, trace) {
            Ok(monitor) => monitor,
            Err(e) => {
                log::debug!("SNR monitor not attached: {}", e);
                Self {
                    device: device.name().to_string(),
                    subscription: None,
                    samples: Rc::new(Cell::new(0)),
                }
            }
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples.get()
    }

    /// Remove the subscription. Returns `false` if the monitor was not attached.
    pub fn detach(&mut self) -> bool {
        let Some((phy, handle)) = self.subscription.take() else {
            return false;
        };
        match phy.upgrade() {
            Some(phy) => match phy.try_borrow_mut() {
                Ok(mut phy) => phy.unsubscribe(handle),
                Err(_) => {
                    log::warn!("Cannot detach SNR monitor from {} while its radio is busy", self.device);
                    self.subscription = Some((Rc::downgrade(&phy), handle));
                    false
                }
            },
            None => false,
        }
    }
}

impl Drop for SnrMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

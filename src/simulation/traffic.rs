//! Constant-rate traffic between a source and a sink over the simulated link.
//!
//! The source emits fixed-size frames every `packet_size·8 / data_rate`
//! seconds while its active window is open. Each emission reaches the
//! physical layer as a frame arrival and, when the frame is delivered and
//! the sink's own window is open, credits the sink. Frames outside either
//! window are dropped, never retried.
//!
//! When the physical layer carries a rate table, the link only sustains the
//! rate the current SNR allows. Frames offered beyond that rate are dropped
//! deterministically: each delivered frame earns `link_rate / offered_rate`
//! of a credit and the sink is only credited once a whole credit is available.
//!
//! Scheduled events only hold weak references to the endpoints: if an
//! endpoint is gone when its event fires, the event does nothing.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::error::SimError;
use super::mobility::{EntityId, MobilityModel};
use super::phy::LinkPhysicalLayer;
use super::scheduler::{EventHandle, EventScheduler};
use super::signal_calculations::PropagationDelay;
use super::time::{SimDuration, SimTime};

/// Half-open interval `[start, stop)` during which an endpoint participates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: SimTime,
    pub stop: SimTime,
}

impl ActiveWindow {
    /// # Errors
    /// - `SimError::Configuration` - `start` is after `stop`
    pub fn new(start: SimTime, stop: SimTime) -> Result<Self, SimError> {
        if start > stop {
            return Err(SimError::configuration(format!("active window starts at {} after it stops at {}", start, stop)));
        }
        Ok(Self { start, stop })
    }

    pub fn contains(&self, t: SimTime) -> bool {
        self.start <= t && t < self.stop
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }
}

/// Constant bit-rate frame generator.
#[derive(Debug, Clone)]
pub struct Source {
    data_rate_bps: u64,
    packet_size_bytes: u32,
    window: ActiveWindow,
    packets_sent: u64,
    bytes_sent: u64,
}

impl Source {
    /// # Errors
    /// - `SimError::Configuration` - zero data rate or packet size
    pub fn new(data_rate_bps: u64, packet_size_bytes: u32, window: ActiveWindow) -> Result<Self, SimError> {
        if data_rate_bps == 0 {
            return Err(SimError::configuration("data rate must be positive"));
        }
        if packet_size_bytes == 0 {
            return Err(SimError::configuration("packet size must be positive"));
        }
        Ok(Self {
            data_rate_bps,
            packet_size_bytes,
            window,
            packets_sent: 0,
            bytes_sent: 0,
        })
    }

    /// Gap between two emissions, rounded to the nearest nanosecond and at least 1 ns.
    pub fn inter_arrival(&self) -> SimDuration {
        let bits = self.packet_size_bytes as u128 * 8;
        let rate = self.data_rate_bps as u128;
        let nanos = (bits * 1_000_000_000 + rate / 2) / rate;
        SimDuration::from_nanos(nanos.clamp(1, i64::MAX as u128) as i64)
    }

    /// Emission frequency in frames per second.
    pub fn frame_rate_hz(&self) -> f64 {
        self.data_rate_bps as f64 / (self.packet_size_bytes as f64 * 8.0)
    }

    pub fn data_rate_bps(&self) -> u64 {
        self.data_rate_bps
    }

    pub fn packet_size_bytes(&self) -> u32 {
        self.packet_size_bytes
    }

    pub fn window(&self) -> ActiveWindow {
        self.window
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn record_emission(&mut self) {
        self.packets_sent += 1;
        self.bytes_sent += self.packet_size_bytes as u64;
    }
}

/// Byte counter for frames received while its window is open.
#[derive(Debug, Clone)]
pub struct Sink {
    window: ActiveWindow,
    total_bytes_received: u64,
    packets_received: u64,
}

impl Sink {
    pub fn new(window: ActiveWindow) -> Self {
        Self {
            window,
            total_bytes_received: 0,
            packets_received: 0,
        }
    }

    /// Monotonic snapshot of the byte counter.
    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn window(&self) -> ActiveWindow {
        self.window
    }

    /// Count a frame arriving at `now`. Returns `false` (and counts nothing)
    /// when the window is closed.
    pub fn receive(&mut self, bytes: u32, now: SimTime) -> bool {
        if !self.window.contains(now) {
            return false;
        }
        self.total_bytes_received = self.total_bytes_received.saturating_add(bytes as u64);
        self.packets_received += 1;
        true
    }
}

/// What travels from the source to the receiver.
#[derive(Debug, Clone, Copy)]
struct Frame {
    size_bytes: u32,
    offered_bps: u64,
}

/// Connects a source on one entity to a sink on another across the link.
///
/// Cheap to clone: clones share the rate-limit state, every other field is
/// a weak reference or a copyable id.
#[derive(Clone)]
pub struct FrameFlow {
    source: Weak<RefCell<Source>>,
    sink: Weak<RefCell<Sink>>,
    phy: Weak<RefCell<LinkPhysicalLayer>>,
    mobility: Weak<RefCell<MobilityModel>>,
    tx: EntityId,
    rx: EntityId,
    delay: PropagationDelay,
    capacity: Rc<CapacityState>,
}

#[derive(Debug, Default)]
struct CapacityState {
    /// Fraction of a frame the link can still carry, in `[0, 1)`.
    credit: Cell<f64>,
    frames_over_capacity: Cell<u64>,
}

impl FrameFlow {
    pub fn new(
        source: &Rc<RefCell<Source>>,
        sink: &Rc<RefCell<Sink>>,
        phy: &Rc<RefCell<LinkPhysicalLayer>>,
        mobility: &Rc<RefCell<MobilityModel>>,
        tx: EntityId,
        rx: EntityId,
    ) -> Self {
        Self {
            source: Rc::downgrade(source),
            sink: Rc::downgrade(sink),
            phy: Rc::downgrade(phy),
            mobility: Rc::downgrade(mobility),
            tx,
            rx,
            delay: PropagationDelay::Instantaneous,
            capacity: Rc::new(CapacityState::default()),
        }
    }

    pub fn with_propagation_delay(mut self, delay: PropagationDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Frames that reached the receiver but exceeded the rate the link sustained.
    pub fn frames_over_capacity(&self) -> u64 {
        self.capacity.frames_over_capacity.get()
    }

    /// Schedule the first emission at the later of the window start and now.
    /// Returns `None` when the window has already closed or is empty.
    ///
    /// # Errors
    /// - `SimError::Configuration` - the source no longer exists
    pub fn start(&self, scheduler: &mut EventScheduler) -> Result<Option<EventHandle>, SimError> {
        let source = self.source.upgrade().ok_or_else(|| SimError::configuration("traffic source was dropped before start"))?;
        let window = source.borrow().window();
        let first = window.start.max(scheduler.now());
        if first >= window.stop {
            log::debug!("Source window [{}, {}) has no room for emissions after {}", window.start, window.stop, scheduler.now());
            return Ok(None);
        }

        log::debug!(
            "Source starts at {}: {} b/s, {} byte frames every {}s",
            first,
            source.borrow().data_rate_bps(),
            source.borrow().packet_size_bytes(),
            source.borrow().inter_arrival().as_secs_f64()
        );
        let flow = self.clone();
        scheduler.schedule_at(first, move |s| flow.emit(s)).map(Some)
    }

    fn emit(&self, scheduler: &mut EventScheduler) {
        let Some(source) = self.source.upgrade() else {
            log::debug!("Source gone at {}, emission skipped", scheduler.now());
            return;
        };
        let now = scheduler.now();
        let (window, interval, frame) = {
            let mut source = source.borrow_mut();
            if now >= source.window().stop {
                return;
            }
            source.record_emission();
            let frame = Frame {
                size_bytes: source.packet_size_bytes(),
                offered_bps: source.data_rate_bps(),
            };
            (source.window(), source.inter_arrival(), frame)
        };

        match self.arrival_delay(now) {
            None => self.deliver(now, frame),
            Some(delay) => {
                let flow = self.clone();
                if let Err(e) = scheduler.schedule(delay, move |s| flow.deliver(s.now(), frame)) {
                    log::warn!("Dropping frame emitted at {}: {}", now, e);
                }
            }
        }

        match now.checked_add(interval) {
            Some(next) if next < window.stop => {
                let flow = self.clone();
                if let Err(e) = scheduler.schedule(interval, move |s| flow.emit(s)) {
                    log::warn!("Source stops early at {}: {}", now, e);
                }
            }
            _ => log::debug!("Source emitted its last frame at {}", now),
        }
    }

    fn arrival_delay(&self, now: SimTime) -> Option<SimDuration> {
        if self.delay == PropagationDelay::Instantaneous {
            return None;
        }
        let mobility = self.mobility.upgrade()?;
        let distance = mobility.borrow().distance_between(self.tx, self.rx, now)?;
        self.delay.delay_for(distance)
    }

    fn deliver(&self, now: SimTime, frame: Frame) {
        let (Some(phy), Some(mobility)) = (self.phy.upgrade(), self.mobility.upgrade()) else {
            log::debug!("Link gone at {}, frame dropped", now);
            return;
        };
        let Some(sample) = phy.borrow_mut().on_frame_arrival(&mobility.borrow(), self.tx, self.rx, now) else {
            return;
        };
        let link_rate = phy.borrow().link_rate_bps(&sample);
        if let Some(link_rate) = link_rate {
            if !self.within_capacity(link_rate, frame.offered_bps) {
                log::trace!("Frame at {} over link capacity ({} b/s of {} b/s offered)", now, link_rate, frame.offered_bps);
                return;
            }
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.borrow_mut().receive(frame.size_bytes, now);
        }
    }

    fn within_capacity(&self, link_rate_bps: u64, offered_bps: u64) -> bool {
        if link_rate_bps >= offered_bps {
            self.capacity.credit.set(0.0);
            return true;
        }
        let credit = self.capacity.credit.get() + link_rate_bps as f64 / offered_bps as f64;
        if credit >= 1.0 {
            self.capacity.credit.set(credit - 1.0);
            true
        } else {
            self.capacity.credit.set(credit);
            self.capacity.frames_over_capacity.set(self.capacity.frames_over_capacity.get() + 1);
            false
        }
    }
}

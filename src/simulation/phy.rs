//! Physical layer of the simulated wireless link.
//!
//! Turns geometry into received signal: for each frame arrival the distance
//! between transmitter and receiver is computed from the mobility model, the
//! active propagation model converts it into path loss, and the resulting
//! `SignalSample` is handed synchronously to every subscriber in subscription
//! order.
//!
//! Devices expose the layer through a capability query instead of a type
//! check: only devices that return a `WirelessCapability` can be observed.

use std::cell::RefCell;
use std::rc::Rc;

use super::error::SimError;
use super::mobility::{EntityId, MobilityModel};
use super::signal_calculations::{MIN_PATH_LOSS_DISTANCE, PropagationModel, RateTable, calculate_received_power};
use super::time::SimTime;

/// Signal and noise observed for one received frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSample {
    pub time: SimTime,
    pub signal_dbm: f64,
    pub noise_dbm: f64,
}

impl SignalSample {
    /// Signal-to-noise ratio in dB.
    pub fn snr_db(&self) -> f64 {
        self.signal_dbm - self.noise_dbm
    }
}

/// Receive-event callback.
pub type SignalCallback = Box<dyn FnMut(&SignalSample)>;

/// Identifies a subscription for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Transmit power, noise floor and propagation for one link.
pub struct LinkPhysicalLayer {
    tx_power_dbm: f64,
    noise_floor_dbm: f64,
    propagation: PropagationModel,
    /// Frames received below this power are not delivered.
    rx_sensitivity_dbm: Option<f64>,
    /// SNR-driven rate limit. `None` carries whatever the source offers.
    rate_table: Option<RateTable>,
    subscribers: Vec<(SubscriptionHandle, SignalCallback)>,
    next_subscription: u64,
    frames_received: u64,
    frames_below_sensitivity: u64,
}

impl LinkPhysicalLayer {
    /// # Errors
    /// - `SimError::Configuration` - non-finite power values or invalid propagation parameters
    pub fn new(tx_power_dbm: f64, noise_floor_dbm: f64, propagation: PropagationModel) -> Result<Self, SimError> {
        if !tx_power_dbm.is_finite() {
            return Err(SimError::configuration(format!("tx_power_dbm must be finite, got {}", tx_power_dbm)));
        }
        if !noise_floor_dbm.is_finite() {
            return Err(SimError::configuration(format!("noise_floor_dbm must be finite, got {}", noise_floor_dbm)));
        }
        propagation.validate()?;

        Ok(Self {
            tx_power_dbm,
            noise_floor_dbm,
            propagation,
            rx_sensitivity_dbm: None,
            rate_table: None,
            subscribers: Vec::new(),
            next_subscription: 0,
            frames_received: 0,
            frames_below_sensitivity: 0,
        })
    }

    /// Drop frames whose signal falls below `sensitivity_dbm`. `None` delivers every frame.
    pub fn with_rx_sensitivity(mut self, sensitivity_dbm: Option<f64>) -> Self {
        self.rx_sensitivity_dbm = sensitivity_dbm;
        self
    }

    pub fn with_rate_table(mut self, rate_table: Option<RateTable>) -> Self {
        self.rate_table = rate_table;
        self
    }

    pub fn tx_power_dbm(&self) -> f64 {
        self.tx_power_dbm
    }

    pub fn noise_floor_dbm(&self) -> f64 {
        self.noise_floor_dbm
    }

    pub fn rx_sensitivity_dbm(&self) -> Option<f64> {
        self.rx_sensitivity_dbm
    }

    pub fn rate_table(&self) -> Option<&RateTable> {
        self.rate_table.as_ref()
    }

    /// Rate the link sustains for `sample`, or `None` when no rate table is set.
    pub fn link_rate_bps(&self, sample: &SignalSample) -> Option<u64> {
        self.rate_table.as_ref().map(|table| table.rate_for(sample.snr_db()))
    }

    pub fn propagation(&self) -> &PropagationModel {
        &self.propagation
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn frames_below_sensitivity(&self) -> u64 {
        self.frames_below_sensitivity
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Register a receive-event callback. Callbacks run in subscription order
    /// and must not call back into this layer.
    pub fn subscribe(&mut self, callback: impl FnMut(&SignalSample) + 'static) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((handle, Box::new(callback)));
        handle
    }

    /// Remove a subscription. Returns `false` for unknown handles.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(h, _)| *h != handle);
        self.subscribers.len() != before
    }

    /// Received signal power (dBm) at `distance` meters.
    pub fn signal_at(&self, distance: f64) -> f64 {
        calculate_received_power(self.tx_power_dbm, self.propagation.path_loss_db(distance))
    }

    /// Process one frame travelling from `tx` to `rx` and arriving at `time`.
    ///
    /// Returns the delivered sample, or `None` when the frame is lost (unknown
    /// entity or signal below the receive sensitivity). Subscribers only see
    /// delivered frames.
    pub fn on_frame_arrival(&mut self, mobility: &MobilityModel, tx: EntityId, rx: EntityId, time: SimTime) -> Option<SignalSample> {
        let Some(distance) = mobility.distance_between(tx, rx, time) else {
            log::warn!("Frame arrival at {} references an unknown entity ({:?} -> {:?})", time, tx, rx);
            return None;
        };
        if distance < MIN_PATH_LOSS_DISTANCE {
            log::trace!("Distance {} m at {} clamped to {} m", distance, time, MIN_PATH_LOSS_DISTANCE);
        }

        let signal_dbm = self.signal_at(distance);
        if let Some(sensitivity) = self.rx_sensitivity_dbm {
            if signal_dbm < sensitivity {
                self.frames_below_sensitivity += 1;
                log::trace!("Frame at {} below sensitivity: {:.2} dBm < {:.2} dBm", time, signal_dbm, sensitivity);
                return None;
            }
        }

        let sample = SignalSample {
            time,
            signal_dbm,
            noise_dbm: self.noise_floor_dbm,
        };
        self.frames_received += 1;
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&sample);
        }
        Some(sample)
    }
}

/// Handle to a device's physical layer, granted only by wireless-capable devices.
///
/// Devices on the same link share one `LinkPhysicalLayer`, so subscribing
/// through either end observes the same stream of samples: every frame
/// crossing the link, whichever device it was attached from.
#[derive(Clone)]
pub struct WirelessCapability {
    phy: Rc<RefCell<LinkPhysicalLayer>>,
}

impl WirelessCapability {
    pub fn new(phy: Rc<RefCell<LinkPhysicalLayer>>) -> Self {
        Self { phy }
    }

    pub fn phy(&self) -> &Rc<RefCell<LinkPhysicalLayer>> {
        &self.phy
    }

    pub fn subscribe(&self, callback: impl FnMut(&SignalSample) + 'static) -> SubscriptionHandle {
        self.phy.borrow_mut().subscribe(callback)
    }
}

/// A network device attached to a mobile entity.
pub trait NetDevice {
    fn name(&self) -> &str;

    /// Entity the device is mounted on.
    fn entity(&self) -> EntityId;

    /// Physical-layer access, for devices that have a radio.
    fn as_wireless_capable(&self) -> Option<WirelessCapability> {
        None
    }
}

/// Device with a radio on the shared link.
pub struct WifiNetDevice {
    name: String,
    entity: EntityId,
    phy: Rc<RefCell<LinkPhysicalLayer>>,
}

impl WifiNetDevice {
    pub fn new(name: impl Into<String>, entity: EntityId, phy: Rc<RefCell<LinkPhysicalLayer>>) -> Self {
        Self {
            name: name.into(),
            entity,
            phy,
        }
    }
}

impl NetDevice for WifiNetDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn as_wireless_capable(&self) -> Option<WirelessCapability> {
        Some(WirelessCapability::new(self.phy.clone()))
    }
}

/// Device without a radio; it never produces signal samples.
pub struct WiredNetDevice {
    name: String,
    entity: EntityId,
}

impl WiredNetDevice {
    pub fn new(name: impl Into<String>, entity: EntityId) -> Self {
        Self { name: name.into(), entity }
    }
}

impl NetDevice for WiredNetDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn entity(&self) -> EntityId {
        self.entity
    }
}

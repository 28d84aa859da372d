//! Owning context for one access point, one station and the link between them.
//!
//! Setup order mirrors how the pieces depend on each other:
//! 1) Mobility arena with the access point and the station.
//! 2) Shared physical layer (propagation, transmit power, noise floor).
//! 3) One radio device per node.
//! 4) Source on the access point, sink on the station, and the frame flow.
//! 5) Monitors, created last because they observe what already exists.
//!
//! Everything is owned here and torn down together when the context drops.
//! Scheduled events only hold weak references into it. Changes that must
//! happen mid-run, such as a new station velocity, are scheduled as events
//! before `run` rather than applied between partial runs: reaching a stop
//! time discards everything still queued.

use std::cell::RefCell;
use std::rc::Rc;

use crate::common::scenario::{Scenario, ScenarioMode, validate_scenario};

use super::error::SimError;
use super::geometry::Vector3;
use super::mobility::{EntityId, MobilityModel};
use super::monitors::{SnrMonitor, ThroughputMonitor};
use super::phy::{LinkPhysicalLayer, NetDevice, WifiNetDevice};
use super::scheduler::{EventHandle, EventScheduler, RunSummary};
use super::signal_calculations::calculate_effective_distance;
use super::time::SimTime;
use super::trace::{SharedTrace, TraceLog};
use super::traffic::{ActiveWindow, FrameFlow, Sink, Source};

/// Fully wired single-link simulation, ready to run.
pub struct LinkSimulation {
    scheduler: EventScheduler,
    mobility: Rc<RefCell<MobilityModel>>,
    phy: Rc<RefCell<LinkPhysicalLayer>>,
    access_point: WifiNetDevice,
    station: WifiNetDevice,
    source: Rc<RefCell<Source>>,
    sink: Rc<RefCell<Sink>>,
    flow: FrameFlow,
    throughput_monitor: ThroughputMonitor,
    snr_monitor: SnrMonitor,
    trace: SharedTrace,
    stop_time: SimTime,
}

impl LinkSimulation {
    /// Build the simulation described by `scenario`, writing observations to `trace`.
    ///
    /// # Errors
    /// - `SimError::Configuration` - the scenario fails validation
    /// - `SimError::InvalidSchedule` - the monitor interval cannot be scheduled
    pub fn new(scenario: &Scenario, trace: TraceLog) -> Result<Self, SimError> {
        validate_scenario(scenario, ScenarioMode::Simulation).map_err(SimError::Configuration)?;

        let mut scheduler = EventScheduler::new();
        let now = scheduler.now();

        let mut mobility = MobilityModel::new();
        let ap_entity = mobility.add_entity(scenario.access_point.position, scenario.access_point.velocity, now);
        let sta_entity = mobility.add_entity(scenario.station.position, scenario.station.velocity, now);
        let mobility = Rc::new(RefCell::new(mobility));

        let radio = &scenario.radio;
        let noise_floor_dbm = radio.noise_floor_dbm();
        let phy = LinkPhysicalLayer::new(radio.tx_power_dbm, noise_floor_dbm, scenario.propagation.clone())?
            .with_rx_sensitivity(radio.rx_sensitivity_dbm)
            .with_rate_table(radio.rate_table()?);
        let phy = Rc::new(RefCell::new(phy));

        let receiving_limit = radio.rx_sensitivity_dbm.unwrap_or(noise_floor_dbm);
        log::info!(
            "Link: {} propagation, tx {:.2} dBm, noise floor {:.2} dBm, effective range {:.1} m",
            scenario.propagation.name(),
            radio.tx_power_dbm,
            noise_floor_dbm,
            calculate_effective_distance(radio.tx_power_dbm, receiving_limit, &scenario.propagation)
        );

        let access_point = WifiNetDevice::new("ap-wifi", ap_entity, phy.clone());
        let station = WifiNetDevice::new("sta-wifi", sta_entity, phy.clone());

        let traffic = &scenario.traffic;
        let source_window = ActiveWindow::new(traffic.source_window.start(), traffic.source_window.stop())?;
        let sink_window = ActiveWindow::new(traffic.sink_window.start(), traffic.sink_window.stop())?;
        let source = Rc::new(RefCell::new(Source::new(traffic.data_rate_bps, traffic.packet_size_bytes, source_window)?));
        let sink = Rc::new(RefCell::new(Sink::new(sink_window)));

        let flow = FrameFlow::new(&source, &sink, &phy, &mobility, ap_entity, sta_entity).with_propagation_delay(scenario.propagation_delay);
        flow.start(&mut scheduler)?;

        let trace = trace.into_shared();
        let throughput_monitor = ThroughputMonitor::start(&mut scheduler, &sink, scenario.throughput_interval(), &trace)?;
        let snr_monitor = SnrMonitor::attach(&access_point, &trace);

        log::info!(
            "Scenario: {} s, station at ({}, {}, {}) moving at ({}, {}, {}) m/s, {} b/s in {} byte frames",
            scenario.duration_secs,
            scenario.station.position.x,
            scenario.station.position.y,
            scenario.station.position.z,
            scenario.station.velocity.x,
            scenario.station.velocity.y,
            scenario.station.velocity.z,
            traffic.data_rate_bps,
            traffic.packet_size_bytes
        );

        Ok(Self {
            scheduler,
            mobility,
            phy,
            access_point,
            station,
            source,
            sink,
            flow,
            throughput_monitor,
            snr_monitor,
            trace,
            stop_time: scenario.stop_time(),
        })
    }

    /// Run until the scenario's stop time, then flush the trace.
    pub fn run(&mut self) -> RunSummary {
        let summary = self.scheduler.run(self.stop_time);
        self.trace.borrow_mut().flush();

        let source = self.source.borrow();
        let sink = self.sink.borrow();
        log::info!(
            "Finished at {}: {} events, {} frames sent, {} received ({} bytes)",
            summary.final_time,
            summary.events_executed,
            source.packets_sent(),
            sink.packets_received(),
            sink.total_bytes_received()
        );
        let phy = self.phy.borrow();
        if phy.frames_below_sensitivity() > 0 {
            log::info!("{} frames lost below receive sensitivity", phy.frames_below_sensitivity());
        }
        if self.flow.frames_over_capacity() > 0 {
            log::info!("{} frames exceeded the link rate", self.flow.frames_over_capacity());
        }
        summary
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_time
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn scheduler_mut(&mut self) -> &mut EventScheduler {
        &mut self.scheduler
    }

    pub fn trace(&self) -> &SharedTrace {
        &self.trace
    }

    pub fn phy(&self) -> &Rc<RefCell<LinkPhysicalLayer>> {
        &self.phy
    }

    pub fn mobility(&self) -> &Rc<RefCell<MobilityModel>> {
        &self.mobility
    }

    pub fn source(&self) -> &Rc<RefCell<Source>> {
        &self.source
    }

    pub fn sink(&self) -> &Rc<RefCell<Sink>> {
        &self.sink
    }

    pub fn access_point(&self) -> &WifiNetDevice {
        &self.access_point
    }

    pub fn station(&self) -> &WifiNetDevice {
        &self.station
    }

    pub fn flow(&self) -> &FrameFlow {
        &self.flow
    }

    pub fn throughput_monitor(&self) -> &ThroughputMonitor {
        &self.throughput_monitor
    }

    pub fn snr_monitor(&self) -> &SnrMonitor {
        &self.snr_monitor
    }

    /// Position of the station at `t`.
    pub fn station_position(&self, t: SimTime) -> Option<Vector3> {
        self.mobility.borrow().position_at(self.station.entity(), t)
    }

    /// Access point to station distance at `t`.
    pub fn link_distance(&self, t: SimTime) -> Option<f64> {
        self.mobility.borrow().distance_between(self.access_point.entity(), self.station.entity(), t)
    }

    /// Give the station `velocity` from time `at` onwards.
    ///
    /// # Errors
    /// - `SimError::InvalidSchedule` - `at` lies before the current time
    pub fn schedule_station_velocity(&mut self, at: SimTime, velocity: Vector3) -> Result<EventHandle, SimError> {
        let mobility = Rc::downgrade(&self.mobility);
        let entity: EntityId = self.station.entity();
        self.scheduler.schedule_at(at, move |s| {
            let Some(mobility) = mobility.upgrade() else {
                return;
            };
            if mobility.borrow_mut().set_velocity(entity, velocity, s.now()) {
                log::debug!("Station velocity set to ({}, {}, {}) m/s at {}", velocity.x, velocity.y, velocity.z, s.now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scenario::{ScenarioFormat, WindowConfig, parse_scenario};
    use crate::simulation::monitors::PeriodicTask;
    use crate::simulation::signal_calculations::{PropagationDelay, PropagationModel, RateStep};
    use crate::simulation::time::SimDuration;

    fn friis_snr(scenario: &Scenario, t: SimTime) -> f64 {
        let distance = scenario.distance_at(t.as_secs_f64());
        scenario.radio.tx_power_dbm - scenario.propagation.path_loss_db(distance) - scenario.radio.noise_floor_dbm()
    }

    #[test]
    fn reference_experiment_end_to_end() {
        let scenario = Scenario::default();
        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();
        let summary = sim.run();
        assert_eq!(summary.final_time, SimTime::from_millis(35_000));

        // Geometry: 26 m at 10.5 s, and the loss there is the Friis value at 26 m.
        let t = SimTime::from_millis(10_500);
        let d = sim.link_distance(t).unwrap();
        assert!((d - 26.0).abs() < 1e-9);
        let friis_26 = 20.0 * (4.0 * std::f64::consts::PI * 26.0 * 2.412e9 / 299_792_458.0).log10();
        assert!((sim.phy().borrow().propagation().path_loss_db(d) - friis_26).abs() < 1e-9);

        let trace = sim.trace().borrow();
        let throughput: Vec<_> = trace.throughput_samples().copied().collect();
        assert_eq!(throughput.len(), 35);
        assert_eq!(throughput[0].time, SimTime::from_millis(1000));
        // Only half of the first interval carries traffic.
        assert!((throughput[0].mbps - 150.0).abs() < 0.05, "first sample {}", throughput[0].mbps);
        for sample in &throughput[1..] {
            assert!((sample.mbps - 300.0).abs() < 0.05, "sample at {} = {}", sample.time, sample.mbps);
        }

        let window = ActiveWindow::new(SimTime::from_millis(500), SimTime::from_millis(35_000)).unwrap();
        let mut snr_count = 0u64;
        for sample in trace.snr_samples() {
            assert!(window.contains(sample.time), "SNR sample outside source window at {}", sample.time);
            assert!((sample.snr_db - friis_snr(&scenario, sample.time)).abs() < 1e-9);
            snr_count += 1;
        }
        assert_eq!(snr_count, sim.source().borrow().packets_sent());
        assert_eq!(sim.snr_monitor().samples_recorded(), snr_count);

        // SNR falls as the station moves away.
        let first = trace.snr_samples().next().unwrap().snr_db;
        let last = trace.snr_samples().last().unwrap().snr_db;
        assert!(first > last + 20.0);

        // Records come out in time order.
        assert!(trace.records().windows(2).all(|w| w[0].time() <= w[1].time()));
    }

    #[test]
    fn throughput_drops_to_zero_after_the_source_stops() {
        let mut scenario = Scenario::default();
        scenario.duration_secs = 6.0;
        scenario.traffic.data_rate_bps = 8_000_000;
        scenario.traffic.packet_size_bytes = 1000;
        scenario.traffic.source_window = WindowConfig {
            start_secs: 0.0,
            stop_secs: 3.0,
        };
        scenario.traffic.sink_window = scenario.traffic.source_window;

        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();
        sim.run();

        let rates: Vec<f64> = sim.trace().borrow().throughput_samples().map(|s| s.mbps).collect();
        // 1000 frames per second. A frame emitted exactly on a tick was
        // scheduled after the tick, so it counts towards the next interval.
        assert_eq!(rates, vec![8.0, 8.0, 8.0, 0.0, 0.0, 0.0]);
        assert_eq!(sim.sink().borrow().packets_received(), 3000);
    }

    #[test]
    fn sensitivity_cuts_the_link_at_range() {
        let mut scenario = Scenario::default();
        scenario.duration_secs = 20.0;
        scenario.traffic.data_rate_bps = 80_000;
        scenario.traffic.packet_size_bytes = 1000;
        scenario.radio.rx_sensitivity_dbm = Some(-50.0);

        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();
        sim.run();

        // Signal crosses -50 dBm around 7.4 s, about 19.8 m out.
        let trace = sim.trace().borrow();
        let last_snr = trace.snr_samples().last().unwrap();
        assert!(last_snr.time > SimTime::from_millis(7000));
        assert!(last_snr.time < SimTime::from_millis(8000));
        let tail: Vec<f64> = trace.throughput_samples().skip(8).map(|s| s.mbps).collect();
        assert_eq!(tail.len(), 12);
        assert!(tail.iter().all(|r| *r == 0.0));
        assert!(sim.phy().borrow().frames_below_sensitivity() > 0);
    }

    #[test]
    fn propagation_delay_shifts_arrivals() {
        let mut scenario = Scenario::default();
        scenario.duration_secs = 2.0;
        scenario.traffic.data_rate_bps = 80_000;
        scenario.traffic.packet_size_bytes = 1000;
        scenario.propagation_delay = PropagationDelay::speed_of_light();

        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();
        sim.run();

        let trace = sim.trace().borrow();
        let first = trace.snr_samples().next().unwrap();
        // The station is 6 m out at 0.5 s: about 20 ns at c.
        assert_eq!(first.time, SimTime::from_nanos(500_000_020));
    }

    #[test]
    fn invalid_scenarios_fail_before_running() {
        let mut scenario = Scenario::default();
        scenario.propagation = PropagationModel::FriisFreeSpace {
            frequency_hz: 0.0,
            system_loss: 1.0,
        };
        assert!(matches!(LinkSimulation::new(&scenario, TraceLog::in_memory()), Err(SimError::Configuration(_))));

        let mut scenario = Scenario::default();
        scenario.throughput_interval_secs = 0.0;
        assert!(LinkSimulation::new(&scenario, TraceLog::in_memory()).is_err());
    }

    #[test]
    fn scheduled_velocity_change_reshapes_the_rest_of_the_run() {
        let mut scenario = Scenario::default();
        scenario.duration_secs = 4.0;
        scenario.traffic.data_rate_bps = 80_000;
        scenario.traffic.packet_size_bytes = 1000;
        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();

        sim.schedule_station_velocity(SimTime::from_millis(2000), Vector3::ZERO).unwrap();
        let summary = sim.run();
        assert_eq!(summary.final_time, SimTime::from_millis(4000));

        // The station stops 9 m out and stays there.
        assert_eq!(sim.station_position(SimTime::from_millis(3000)), Some(Vector3::new(9.0, 0.0, 0.0)));
        assert_eq!(sim.station_position(SimTime::from_millis(4000)), Some(Vector3::new(9.0, 0.0, 0.0)));

        let trace = sim.trace().borrow();
        assert_eq!(trace.throughput_count(), 4);
        let parked = scenario.radio.tx_power_dbm - scenario.propagation.path_loss_db(9.0) - scenario.radio.noise_floor_dbm();
        let (mut before, mut after) = (0, 0);
        for sample in trace.snr_samples() {
            if sample.time >= SimTime::from_millis(2000) {
                assert!((sample.snr_db - parked).abs() < 1e-9, "SNR at {} = {}", sample.time, sample.snr_db);
                after += 1;
            } else {
                assert!((sample.snr_db - friis_snr(&scenario, sample.time)).abs() < 1e-9);
                before += 1;
            }
        }
        // 10 frames per second from 0.5 s; the one due exactly at the 4 s stop time still runs.
        assert_eq!(before, 15);
        assert_eq!(after, 21);
    }

    #[test]
    fn velocity_change_in_the_past_is_rejected() {
        let mut sim = LinkSimulation::new(&Scenario::default(), TraceLog::in_memory()).unwrap();
        sim.scheduler_mut().run(SimTime::from_millis(1000));
        let err = sim.schedule_station_velocity(SimTime::from_millis(500), Vector3::ZERO).unwrap_err();
        assert!(matches!(err, SimError::InvalidSchedule { .. }));
    }

    #[test]
    fn rate_adaptation_makes_throughput_fall_with_distance() {
        let scenario = parse_scenario(include_str!("../../scenarios/friis.toml"), ScenarioFormat::Toml).unwrap();
        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();
        sim.run();

        let trace = sim.trace().borrow();
        let rates: Vec<f64> = trace.throughput_samples().map(|s| s.mbps).collect();
        assert_eq!(rates.len(), 35);
        // Above 37 dB of SNR the link runs at the top rate, well below the 300 Mb/s offered.
        assert!((rates[4] - 143.4).abs() < 0.1, "rate at 5 s = {}", rates[4]);
        // The last second sits between 31 and 34 dB.
        assert!((rates[34] - 114.7).abs() < 0.1, "rate at 35 s = {}", rates[34]);
        assert!(rates[1..].windows(2).all(|w| w[1] <= w[0] + 0.05), "{:?}", rates);
        assert!(sim.flow().frames_over_capacity() > 0);
        // Rate adaptation does not hide frames from the SNR monitor.
        assert_eq!(trace.snr_count(), sim.source().borrow().packets_sent());
    }

    #[test]
    fn sink_counter_never_decreases_while_frames_interleave_with_observers() {
        let mut scenario = Scenario::default();
        scenario.duration_secs = 3.0;
        scenario.traffic.data_rate_bps = 8_000_000;
        scenario.traffic.packet_size_bytes = 1000;
        scenario.traffic.source_window = WindowConfig {
            start_secs: 0.0,
            stop_secs: 2.5,
        };
        scenario.traffic.sink_window = WindowConfig {
            start_secs: 0.2,
            stop_secs: 2.0,
        };
        scenario.radio.rate_table = Some(vec![RateStep {
            min_snr_db: 0.0,
            rate_bps: 3_000_000,
        }]);
        let mut sim = LinkSimulation::new(&scenario, TraceLog::in_memory()).unwrap();

        // Read the counter on a period that never lines up with the 1 ms
        // emissions, and again at zero delay behind whatever shares that instant.
        let readings = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::downgrade(sim.sink());
        let seen = readings.clone();
        let _observer = PeriodicTask::start(sim.scheduler_mut(), SimDuration::from_nanos(333_333), move |s| {
            if let Some(sink) = sink.upgrade() {
                seen.borrow_mut().push(sink.borrow().total_bytes_received());
            }
            let (sink, seen) = (sink.clone(), seen.clone());
            s.schedule(SimDuration::ZERO, move |_| {
                if let Some(sink) = sink.upgrade() {
                    seen.borrow_mut().push(sink.borrow().total_bytes_received());
                }
            })
            .unwrap();
        })
        .unwrap();
        sim.run();

        let readings = readings.borrow();
        assert!(readings.len() > 17_000);
        assert!(readings.windows(2).all(|w| w[0] <= w[1]));
        let total = sim.sink().borrow().total_bytes_received();
        assert_eq!(readings.last().copied(), Some(total));
        assert!(total > 0);
        assert!(total < sim.source().borrow().bytes_sent());
    }
}

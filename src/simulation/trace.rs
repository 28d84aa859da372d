//! Observable output of a run.
//!
//! Monitors append records here in event order. Each record renders as one
//! line:
//!
//! ```text
//! 1s: Throughput = 150 Mbps
//! 0.500038s: SNR = 55.9358 dB
//! ```
//!
//! The log can keep records in memory, stream lines to a writer as they are
//! appended, or both. Trace output is independent of the `log` level.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use super::time::{SimTime, format_seconds};

/// Throughput observed over one monitor interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub time: SimTime,
    pub mbps: f64,
}

/// Signal-to-noise ratio of one received frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnrSample {
    pub time: SimTime,
    pub snr_db: f64,
}

/// One line of trace output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceRecord {
    Throughput(ThroughputSample),
    Snr(SnrSample),
}

impl TraceRecord {
    pub fn time(&self) -> SimTime {
        match self {
            TraceRecord::Throughput(s) => s.time,
            TraceRecord::Snr(s) => s.time,
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceRecord::Throughput(s) => write!(f, "{}: Throughput = {} Mbps", s.time, format_seconds(s.mbps)),
            TraceRecord::Snr(s) => write!(f, "{}: SNR = {} dB", s.time, format_seconds(s.snr_db)),
        }
    }
}

/// Trace log shared between the monitors of one simulation.
pub type SharedTrace = Rc<RefCell<TraceLog>>;

/// Append-only, time-ordered record sink.
pub struct TraceLog {
    records: Vec<TraceRecord>,
    retain: bool,
    writer: Option<Box<dyn Write>>,
    throughput_count: u64,
    snr_count: u64,
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TraceLog {
    /// Keep every record in memory, write nothing.
    pub fn in_memory() -> Self {
        Self {
            records: Vec::new(),
            retain: true,
            writer: None,
            throughput_count: 0,
            snr_count: 0,
        }
    }

    /// Write each record as a line to `writer` without keeping it in memory.
    pub fn streaming(writer: impl Write + 'static) -> Self {
        Self {
            records: Vec::new(),
            retain: false,
            writer: Some(Box::new(writer)),
            throughput_count: 0,
            snr_count: 0,
        }
    }

    pub fn retain_records(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn into_shared(self) -> SharedTrace {
        Rc::new(RefCell::new(self))
    }

    pub fn record(&mut self, record: TraceRecord) {
        match record {
            TraceRecord::Throughput(_) => self.throughput_count += 1,
            TraceRecord::Snr(_) => self.snr_count += 1,
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writeln!(writer, "{}", record) {
                // A broken sink must not stop the run: keep counting, stop writing.
                log::warn!("Trace output failed, further lines are dropped: {}", e);
                self.writer = None;
            }
        }
        if self.retain {
            self.records.push(record);
        }
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn throughput_samples(&self) -> impl Iterator<Item = &ThroughputSample> {
        self.records.iter().filter_map(|r| match r {
            TraceRecord::Throughput(s) => Some(s),
            TraceRecord::Snr(_) => None,
        })
    }

    pub fn snr_samples(&self) -> impl Iterator<Item = &SnrSample> {
        self.records.iter().filter_map(|r| match r {
            TraceRecord::Snr(s) => Some(s),
            TraceRecord::Throughput(_) => None,
        })
    }

    pub fn throughput_count(&self) -> u64 {
        self.throughput_count
    }

    pub fn snr_count(&self) -> u64 {
        self.snr_count
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                log::warn!("Failed to flush trace output: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that appends into a shared buffer so the test can inspect it.
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn records_render_as_trace_lines() {
        let throughput = TraceRecord::Throughput(ThroughputSample {
            time: SimTime::from_millis(3010),
            mbps: 97.48021,
        });
        let snr = TraceRecord::Snr(SnrSample {
            time: SimTime::from_secs_f64(34.978312),
            snr_db: 32.39511,
        });
        assert_eq!(throughput.to_string(), "3.01s: Throughput = 97.4802 Mbps");
        assert_eq!(snr.to_string(), "34.9783s: SNR = 32.3951 dB");

        let zero = TraceRecord::Throughput(ThroughputSample {
            time: SimTime::from_millis(1000),
            mbps: 0.0,
        });
        assert_eq!(zero.to_string(), "1s: Throughput = 0 Mbps");
    }

    #[test]
    fn streaming_writes_lines_without_retaining() {
        let buffer = SharedBuffer::default();
        let mut log = TraceLog::streaming(buffer.clone());
        log.record(TraceRecord::Snr(SnrSample {
            time: SimTime::from_millis(500),
            snr_db: 50.0,
        }));
        log.record(TraceRecord::Throughput(ThroughputSample {
            time: SimTime::from_millis(1000),
            mbps: 150.0,
        }));
        log.flush();

        let text = String::from_utf8(buffer.0.borrow().clone()).unwrap();
        assert_eq!(text, "0.5s: SNR = 50 dB\n1s: Throughput = 150 Mbps\n");
        assert!(log.records().is_empty());
        assert_eq!(log.snr_count(), 1);
        assert_eq!(log.throughput_count(), 1);
    }

    #[test]
    fn in_memory_log_filters_by_kind() {
        let mut log = TraceLog::in_memory();
        for i in 0..3 {
            log.record(TraceRecord::Snr(SnrSample {
                time: SimTime::from_millis(i),
                snr_db: i as f64,
            }));
        }
        log.record(TraceRecord::Throughput(ThroughputSample {
            time: SimTime::from_millis(1000),
            mbps: 1.0,
        }));
        assert_eq!(log.snr_samples().count(), 3);
        assert_eq!(log.throughput_samples().count(), 1);
        assert_eq!(log.records().last().unwrap().time(), SimTime::from_millis(1000));
    }

    #[test]
    fn broken_writer_is_dropped_and_counting_continues() {
        let mut log = TraceLog::streaming(BrokenPipe).retain_records(true);
        for _ in 0..2 {
            log.record(TraceRecord::Throughput(ThroughputSample {
                time: SimTime::ZERO,
                mbps: 0.0,
            }));
        }
        assert_eq!(log.throughput_count(), 2);
        assert_eq!(log.records().len(), 2);
    }
}

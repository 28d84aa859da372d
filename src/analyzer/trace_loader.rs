//! Sequential trace file reading.

use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::simulation::trace::TraceRecord;

use super::trace_parser::parse_trace_line;

/// Buffer size for reading trace files (8KB).
const BUFFER_SIZE: usize = 8 * 1024;

/// Records recovered from a trace, plus how many lines were not trace records.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadedTrace {
    pub records: Vec<TraceRecord>,
    pub skipped_lines: u64,
}

/// Line reader over a trace file (or any buffered reader).
pub struct TraceLoader<R> {
    reader: R,
    eof_reached: bool,
    line_buffer: String,
    lines_read: u64,
}

impl TraceLoader<BufReader<File>> {
    /// Open a trace file for reading from the start.
    pub fn open(path: &str) -> Result<Self, std::io::Error> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::with_capacity(BUFFER_SIZE, file)))
    }
}

impl<R: BufRead> TraceLoader<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            eof_reached: false,
            line_buffer: String::with_capacity(128),
            lines_read: 0,
        }
    }

    /// Read the next non-empty line with trailing whitespace removed.
    ///
    /// Returns `None` at EOF. A read error is logged and treated as EOF.
    pub fn next_line(&mut self) -> Option<String> {
        if self.eof_reached {
            return None;
        }
        loop {
            self.line_buffer.clear();

            match self.reader.read_line(&mut self.line_buffer) {
                Ok(0) => {
                    self.eof_reached = true;
                    return None;
                }
                Ok(_) => {
                    self.lines_read += 1;
                    let line = self.line_buffer.trim_end();
                    if !line.trim_start().is_empty() {
                        return Some(line.to_string());
                    }
                }
                Err(e) => {
                    log::warn!("Error reading trace file after {} lines: {}", self.lines_read, e);
                    self.eof_reached = true;
                    return None;
                }
            }
        }
    }

    /// Parse every remaining line. Lines that are not trace records are counted and skipped.
    pub fn load_records(&mut self) -> LoadedTrace {
        let mut loaded = LoadedTrace::default();
        while let Some(line) = self.next_line() {
            match parse_trace_line(&line) {
                Some(record) => loaded.records.push(record),
                None => {
                    log::trace!("Skipping line {}: {}", self.lines_read, line);
                    loaded.skipped_lines += 1;
                }
            }
        }
        loaded
    }

    pub fn is_eof(&self) -> bool {
        self.eof_reached
    }

    /// Physical lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TRACE: &str = "\
0.5s: SNR = 55.9358 dB

   \t
Some framework log line
1s: Throughput = 150.009 Mbps
1.00004s: SNR = 55.6 dB
";

    #[test]
    fn blank_lines_are_skipped() {
        let mut loader = TraceLoader::from_reader(Cursor::new(TRACE));
        let mut lines = Vec::new();
        while let Some(line) = loader.next_line() {
            lines.push(line);
        }
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "0.5s: SNR = 55.9358 dB");
        assert!(loader.is_eof());
        assert_eq!(loader.lines_read(), 6);
        assert!(loader.next_line().is_none());
    }

    #[test]
    fn load_records_counts_unparseable_lines() {
        let loaded = TraceLoader::from_reader(Cursor::new(TRACE)).load_records();
        assert_eq!(loaded.records.len(), 3);
        assert_eq!(loaded.skipped_lines, 1);
        assert!(matches!(loaded.records[1], TraceRecord::Throughput(s) if s.mbps == 150.009));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(TraceLoader::open("/nonexistent/trace.txt").is_err());
    }
}

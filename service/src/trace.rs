//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Trace sinks recording device traffic

use crate::config::{PortConfig, TraceConfig};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Which side of the device a traced span belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceDirection {
    /// Bytes read from the device
    Read,
    /// Bytes written to the device
    Write,
}

impl TraceDirection {
    fn tag(self) -> &'static str {
        match self {
            TraceDirection::Read => "read",
            TraceDirection::Write => "write",
        }
    }
}

/// A destination for traced byte spans
pub trait TraceSink: Send {
    /// Append one record
    fn write_record(&mut self, direction: TraceDirection, data: &[u8]) -> io::Result<()>;

    /// Mark the device being opened
    fn header(&mut self, port: &str, device: &str) -> io::Result<()>;

    /// Mark the device being closed
    fn footer(&mut self, reason: &str) -> io::Result<()>;
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// Format `data` as hexdump lines of 16 bytes with an ASCII column
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {:02x}", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

/// Writes records to any `Write`, usually an append-mode file
pub struct FileTraceSink<W: Write + Send = File> {
    out: W,
    hexdump: bool,
    timestamp: bool,
}

impl FileTraceSink<File> {
    /// Open (creating if needed) the file named by `config` in append mode
    pub fn create(config: &TraceConfig) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        Ok(Self::new(file, config.hexdump, config.timestamp))
    }
}

impl<W: Write + Send> FileTraceSink<W> {
    /// Wrap a writer
    pub fn new(out: W, hexdump: bool, timestamp: bool) -> Self {
        Self {
            out,
            hexdump,
            timestamp,
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TraceSink for FileTraceSink<W> {
    fn write_record(&mut self, direction: TraceDirection, data: &[u8]) -> io::Result<()> {
        if self.hexdump {
            let mut record = String::new();
            if self.timestamp {
                let _ = write!(record, "{} ", timestamp());
            }
            let _ = writeln!(record, "{} ({} bytes):", direction.tag(), data.len());
            record.push_str(&hexdump(data));
            self.out.write_all(record.as_bytes())?;
        } else {
            if self.timestamp {
                write!(self.out, "[{} {}] ", timestamp(), direction.tag())?;
            }
            self.out.write_all(data)?;
        }
        self.out.flush()
    }

    fn header(&mut self, port: &str, device: &str) -> io::Result<()> {
        writeln!(self.out, "\n--- {} opened {} at {} ---", port, device, timestamp())?;
        self.out.flush()
    }

    fn footer(&mut self, reason: &str) -> io::Result<()> {
        writeln!(self.out, "\n--- closed at {}: {} ---", timestamp(), reason)?;
        self.out.flush()
    }
}

/// The read, write and both traces of one port.
///
/// Configs naming the same path share one sink, and a span routed to the
/// same sink twice is only written once.
#[derive(Default)]
pub struct TraceSet {
    sinks: Vec<Box<dyn TraceSink>>,
    read: Option<usize>,
    write: Option<usize>,
    both: Option<usize>,
}

impl TraceSet {
    /// No traces
    pub fn empty() -> Self {
        Self::default()
    }

    /// Open the trace files of `config`
    pub fn open(config: &PortConfig) -> Self {
        Self::open_with(config, |trace| {
            FileTraceSink::create(trace).map(|s| Box::new(s) as Box<dyn TraceSink>)
        })
    }

    /// Open traces through `opener`; failures are logged and that trace is skipped
    pub fn open_with<F>(config: &PortConfig, mut opener: F) -> Self
    where
        F: FnMut(&TraceConfig) -> io::Result<Box<dyn TraceSink>>,
    {
        let mut set = TraceSet::default();
        let mut paths: Vec<std::path::PathBuf> = Vec::new();
        let mut resolve = |trace: &Option<TraceConfig>, set: &mut TraceSet| -> Option<usize> {
            let trace = trace.as_ref()?;
            if let Some(index) = paths.iter().position(|p| *p == trace.path) {
                return Some(index);
            }
            match opener(trace) {
                Ok(sink) => {
                    set.sinks.push(sink);
                    // Keep `paths` aligned with `sinks`.
                    paths.push(trace.path.clone());
                    Some(set.sinks.len() - 1)
                }
                Err(err) => {
                    warn!(port = %config.name, path = %trace.path.display(), error = %err, "unable to open trace file");
                    None
                }
            }
        };
        set.read = resolve(&config.trace_read, &mut set);
        set.write = resolve(&config.trace_write, &mut set);
        set.both = resolve(&config.trace_both, &mut set);
        set
    }

    /// Whether no trace is active
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Number of distinct open sinks
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    fn targets(&self, direction: TraceDirection) -> impl Iterator<Item = usize> {
        let first = match direction {
            TraceDirection::Read => self.read,
            TraceDirection::Write => self.write,
        };
        let second = self.both.filter(|b| Some(*b) != first);
        first.into_iter().chain(second)
    }

    /// Record a span
    pub fn record(&mut self, direction: TraceDirection, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let targets: Vec<usize> = self.targets(direction).collect();
        for index in targets {
            if let Some(sink) = self.sinks.get_mut(index) {
                if let Err(err) = sink.write_record(direction, data) {
                    warn!(error = %err, "trace write failed");
                }
            }
        }
    }

    /// Write the open header to every sink
    pub fn header(&mut self, port: &str, device: &str) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.header(port, device) {
                warn!(port = %port, error = %err, "trace header failed");
            }
        }
    }

    /// Write the close footer to every sink and drop them
    pub fn close(&mut self, reason: &str) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.footer(reason) {
                warn!(error = %err, "trace footer failed");
            }
        }
        *self = TraceSet::default();
    }
}

impl std::fmt::Debug for TraceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSet")
            .field("sinks", &self.sinks.len())
            .field("read", &self.read)
            .field("write", &self.write)
            .field("both", &self.both)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_hexdump_layout() {
        let dump = hexdump(b"AT\r\n");
        assert!(dump.starts_with("0000: 41 54 0d 0a"));
        assert!(dump.ends_with("|AT..|\n"));
    }

    #[test]
    fn test_raw_sink_passes_bytes() {
        let out = Shared::default();
        let mut sink = FileTraceSink::new(out.clone(), false, false);
        sink.write_record(TraceDirection::Read, b"\x00\xffdata").unwrap();
        assert_eq!(&out.0.lock().unwrap()[..], b"\x00\xffdata");
    }

    #[test]
    fn test_aliased_traces_share_one_sink() {
        let opened = Arc::new(Mutex::new(0));
        let out = Shared::default();
        let config = PortConfig::new("p", "127.0.0.1:0", "/dev/null").with_traces(
            Some(TraceConfig::new("/tmp/trace.log")),
            None,
            Some(TraceConfig::new("/tmp/trace.log")),
        );
        let counter = opened.clone();
        let sink_out = out.clone();
        let mut set = TraceSet::open_with(&config, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(Box::new(FileTraceSink::new(sink_out.clone(), false, false)) as Box<dyn TraceSink>)
        });
        assert_eq!(*opened.lock().unwrap(), 1);
        assert_eq!(set.sink_count(), 1);

        // Read goes to read and both, which alias: written once.
        set.record(TraceDirection::Read, b"abc");
        // Write only reaches the both trace.
        set.record(TraceDirection::Write, b"xyz");
        assert_eq!(&out.0.lock().unwrap()[..], b"abcxyz");
    }

    #[test]
    fn test_failed_open_is_skipped() {
        let config = PortConfig::new("p", "127.0.0.1:0", "/dev/null").with_traces(
            Some(TraceConfig::new("/nonexistent/dir/trace.log")),
            None,
            None,
        );
        let mut set = TraceSet::open_with(&config, |_| Err(io::Error::from(io::ErrorKind::NotFound)));
        assert!(set.is_empty());
        set.record(TraceDirection::Read, b"ignored");
    }
}

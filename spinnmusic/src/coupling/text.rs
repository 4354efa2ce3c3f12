//! Stream-backed coupling.
//!
//! Events travel as text lines of the form `<time> <id>`, with the time in
//! seconds. Empty lines and lines starting with `#` are ignored.
//!
//! - The input port replays an event stream: each tick hands the mapped
//!   handler every event due before the end of the following tick, so the
//!   adapter always holds one tick of lookahead.
//! - The output port collects inserted events and writes them, sorted by
//!   time, when the tick that consumes them runs.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    CouplingError, EventHandler, EventInputPort, EventOutputPort, IndexRange, Runtime, Setup,
};
use crate::queue::UnitId;
use crate::trace::{debug, trace};

/// Parses one `<time> <id>` line. Returns `None` for blank and comment lines.
fn parse_line(line: &str, number: usize) -> Result<Option<(f64, UnitId)>, CouplingError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let err = |reason: &str| CouplingError::Parse {
        line: number,
        reason: reason.to_owned(),
    };
    let mut fields = line.split_whitespace();
    let time = fields
        .next()
        .ok_or_else(|| err("missing time"))?
        .parse::<f64>()
        .map_err(|_| err("invalid time"))?;
    let id = fields
        .next()
        .ok_or_else(|| err("missing id"))?
        .parse::<u32>()
        .map_err(|_| err("invalid id"))?;
    if fields.next().is_some() {
        return Err(err("trailing fields"));
    }
    if !time.is_finite() || time < 0.0 {
        return Err(err("time must be finite and non-negative"));
    }
    Ok(Some((time, UnitId::new(id))))
}

/// Reads a whole event stream, sorted by time.
///
/// # Errors
///
/// Returns [`CouplingError::Parse`] for malformed lines and
/// [`CouplingError::Io`] if the stream cannot be read.
pub fn read_events(reader: impl BufRead) -> Result<Vec<(f64, UnitId)>, CouplingError> {
    let mut events = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if let Some(event) = parse_line(&line?, i + 1)? {
            events.push(event);
        }
    }
    events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    Ok(events)
}

struct MappedInput {
    range: IndexRange,
    handler: EventHandler,
}

#[derive(Default)]
struct OutputState {
    range: Option<IndexRange>,
    pending: Vec<(f64, UnitId)>,
}

/// Setup phase of the stream-backed coupling.
pub struct TextCoupling {
    events: Vec<(f64, UnitId)>,
    sink: Option<Box<dyn Write + Send>>,
    input: Arc<Mutex<Option<MappedInput>>>,
    output: Arc<Mutex<OutputState>>,
}

impl Default for TextCoupling {
    fn default() -> Self {
        Self::new()
    }
}

impl TextCoupling {
    /// Creates a coupling with no events to replay and no sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            sink: None,
            input: Arc::default(),
            output: Arc::default(),
        }
    }

    /// Loads the event stream replayed through the input port.
    ///
    /// # Errors
    ///
    /// See [`read_events`].
    pub fn with_events(mut self, reader: impl BufRead) -> Result<Self, CouplingError> {
        self.events = read_events(reader)?;
        debug!(events = self.events.len(), "event stream loaded");
        Ok(self)
    }

    /// Sets the stream receiving events inserted through the output port.
    #[must_use]
    pub fn with_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }
}

/// Input port of a [`TextCoupling`].
pub struct TextInputPort {
    name: String,
    slot: Arc<Mutex<Option<MappedInput>>>,
}

impl EventInputPort for TextInputPort {
    fn map(
        &mut self,
        indices: IndexRange,
        handler: EventHandler,
        max_buffered: Option<u32>,
    ) -> Result<(), CouplingError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(CouplingError::AlreadyMapped(self.name.clone()));
        }
        debug!(port = %self.name, range = %indices, ?max_buffered, "input port mapped");
        *slot = Some(MappedInput {
            range: indices,
            handler,
        });
        Ok(())
    }
}

/// Output port of a [`TextCoupling`].
pub struct TextOutputPort {
    name: String,
    state: Arc<Mutex<OutputState>>,
}

impl EventOutputPort for TextOutputPort {
    fn map(&mut self, indices: IndexRange) -> Result<(), CouplingError> {
        let mut state = self.state.lock();
        if state.range.is_some() {
            return Err(CouplingError::AlreadyMapped(self.name.clone()));
        }
        debug!(port = %self.name, range = %indices, "output port mapped");
        state.range = Some(indices);
        Ok(())
    }

    fn insert_event(&mut self, time: f64, id: UnitId) {
        let mut state = self.state.lock();
        if state.range.is_some_and(|r| r.contains(id)) {
            state.pending.push((time, id));
        } else {
            trace!(%id, "event outside mapped range dropped");
        }
    }
}

/// Runtime of a [`TextCoupling`].
pub struct TextRuntime {
    events: VecDeque<(f64, UnitId)>,
    sink: Option<Box<dyn Write + Send>>,
    input: Arc<Mutex<Option<MappedInput>>>,
    output: Arc<Mutex<OutputState>>,
    timestep: f64,
    time: f64,
    finalized: bool,
}

impl TextRuntime {
    fn deliver_before(&mut self, limit: f64) {
        let mut input = self.input.lock();
        let Some(mapped) = input.as_mut() else {
            return;
        };
        while let Some(&(t, id)) = self.events.front() {
            if t >= limit {
                break;
            }
            self.events.pop_front();
            if mapped.range.contains(id) {
                (mapped.handler)(t, id);
            }
        }
    }

    fn write_pending(&mut self) -> Result<(), CouplingError> {
        let mut pending = std::mem::take(&mut self.output.lock().pending);
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        pending.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (t, id) in pending {
            writeln!(sink, "{t:.6} {id}")?;
        }
        Ok(())
    }
}

impl Runtime for TextRuntime {
    fn tick(&mut self) -> Result<(), CouplingError> {
        if self.finalized {
            return Err(CouplingError::Finalized);
        }
        self.write_pending()?;
        self.time += self.timestep;
        self.deliver_before(self.time + self.timestep);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CouplingError> {
        if self.finalized {
            return Err(CouplingError::Finalized);
        }
        self.finalized = true;
        self.write_pending()?;
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        debug!(time = self.time, undelivered = self.events.len(), "text runtime finalized");
        Ok(())
    }

    fn time(&self) -> f64 {
        self.time
    }
}

impl Setup for TextCoupling {
    type InputPort = TextInputPort;
    type OutputPort = TextOutputPort;
    type Runtime = TextRuntime;

    fn publish_event_input(&mut self, name: &str) -> Result<TextInputPort, CouplingError> {
        Ok(TextInputPort {
            name: name.to_owned(),
            slot: Arc::clone(&self.input),
        })
    }

    fn publish_event_output(&mut self, name: &str) -> Result<TextOutputPort, CouplingError> {
        Ok(TextOutputPort {
            name: name.to_owned(),
            state: Arc::clone(&self.output),
        })
    }

    // A single process has no group to wait for.
    fn barrier(&mut self) -> Result<(), CouplingError> {
        Ok(())
    }

    fn into_runtime(self, timestep: Duration) -> Result<TextRuntime, CouplingError> {
        let mut runtime = TextRuntime {
            events: self.events.into(),
            sink: self.sink,
            input: self.input,
            output: self.output,
            timestep: timestep.as_secs_f64(),
            time: 0.0,
            finalized: false,
        };
        runtime.deliver_before(runtime.timestep);
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn parses_sorted_events_and_skips_comments() {
        let input = "# header\n0.5 3\n\n0.25 1\n";
        let events = read_events(Cursor::new(input)).unwrap();
        assert_eq!(events, vec![(0.25, UnitId::new(1)), (0.5, UnitId::new(3))]);
    }

    #[test]
    fn reports_line_of_malformed_event() {
        let err = read_events(Cursor::new("0.1 1\n0.2 x\n")).unwrap_err();
        assert!(matches!(err, CouplingError::Parse { line: 2, .. }));
        assert!(read_events(Cursor::new("-1 4\n")).is_err());
        assert!(read_events(Cursor::new("0.1 4 9\n")).is_err());
    }

    #[test]
    fn replays_one_tick_ahead() {
        let stream = "0.001 0\n0.009 1\n0.011 2\n0.025 3\n0.002 99\n";
        let mut setup = TextCoupling::new().with_events(Cursor::new(stream)).unwrap();
        let mut port = setup.publish_event_input("in").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        port.map(
            IndexRange::new(0, 10),
            Box::new(move |t, id| sink.lock().push((t, id.get()))),
            None,
        )
        .unwrap();

        let mut runtime = setup.into_runtime(Duration::from_millis(10)).unwrap();
        assert_eq!(*seen.lock(), vec![(0.001, 0), (0.009, 1)]);
        runtime.tick().unwrap();
        assert_eq!(seen.lock().len(), 3);
        runtime.tick().unwrap();
        assert_eq!(seen.lock().last(), Some(&(0.025, 3)));
        assert_eq!(seen.lock().len(), 4);
    }

    #[test]
    fn writes_inserted_events_on_tick() {
        let buf = SharedBuf::default();
        let mut setup = TextCoupling::new().with_sink(buf.clone());
        let mut port = setup.publish_event_output("out").unwrap();
        port.map(IndexRange::new(0, 8)).unwrap();
        let mut runtime = setup.into_runtime(Duration::from_millis(1)).unwrap();

        port.insert_event(1.0, UnitId::new(5));
        port.insert_event(0.5, UnitId::new(4));
        port.insert_event(0.5, UnitId::new(8));
        assert_eq!(buf.text(), "");

        runtime.tick().unwrap();
        assert_eq!(buf.text(), "0.500000 4\n1.000000 5\n");

        port.insert_event(2.0, UnitId::new(1));
        runtime.finalize().unwrap();
        assert!(buf.text().ends_with("2.000000 1\n"));
    }
}

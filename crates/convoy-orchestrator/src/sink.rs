use crate::event::MissionEvent;
use convoy_core::ConvoyResult;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receives every event a mission store commits, in order.
pub trait EventSink: Send + Sync {
    /// Receive one committed event. Errors are logged by the store, not propagated.
    fn publish(&self, event: &MissionEvent) -> ConvoyResult<()>;
}

/// Appends events to a file, one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> ConvoyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// File the sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonLinesSink {
    fn publish(&self, event: &MissionEvent) -> ConvoyResult<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps events in memory. Useful for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<MissionEvent>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event received so far.
    pub fn events(&self) -> Vec<MissionEvent> {
        self.events.lock().clone()
    }

    /// Number of events received.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True before the first event.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &MissionEvent) -> ConvoyResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Read a JSON-lines event log. Blank lines are ignored.
pub fn read_jsonl(path: impl AsRef<Path>) -> ConvoyResult<Vec<MissionEvent>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str::<MissionEvent>(line)?))
        .collect()
}

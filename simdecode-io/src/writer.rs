//! Event file writer.

use crate::Result;
use simdecode_sbs::SimEvent;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes event records back to back.
pub struct SimFileWriter {
    writer: BufWriter<File>,
    events: usize,
}

impl SimFileWriter {
    /// Creates (or truncates) an event file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            events: 0,
        })
    }

    /// Appends one event.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_event(&mut self, event: &SimEvent) -> Result<()> {
        for word in event.to_words() {
            self.writer.write_all(&word.to_le_bytes())?;
        }
        self.events += 1;
        Ok(())
    }

    /// Number of events written so far.
    #[must_use]
    pub fn events_written(&self) -> usize {
        self.events
    }

    /// Flushes buffered data to disk.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

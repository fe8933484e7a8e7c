//! Memory-mapped file readers.

use crate::{Error, Result};
use log::debug;
use memmap2::Mmap;
use simdecode_sbs::event::{record_len, words_from_le_bytes, HEADER_WORDS};
use simdecode_sbs::SimEvent;
use std::fs::File;
use std::path::{Path, PathBuf};

const WORD_SIZE: usize = 4;

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader for files of concatenated event records.
pub struct SimFileReader {
    reader: MappedFileReader,
}

impl SimFileReader {
    /// Opens an event file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        debug!(
            "opened {} ({} bytes)",
            reader.path().display(),
            reader.len()
        );
        Ok(Self { reader })
    }

    /// Underlying mapped file.
    #[must_use]
    pub fn mapped(&self) -> &MappedFileReader {
        &self.reader
    }

    /// Iterates over the events in file order.
    ///
    /// Iteration stops after the first error.
    #[must_use]
    pub fn events(&self) -> EventIter<'_> {
        EventIter::new(self.reader.as_bytes())
    }
}

/// Iterator over event records in a byte buffer.
pub struct EventIter<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> EventIter<'a> {
    /// Iterates over the records in `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn next_record(&mut self) -> Result<SimEvent> {
        let (data, offset) = (self.data, self.offset);
        let rest = &data[offset..];
        let header_bytes = HEADER_WORDS * WORD_SIZE;
        let truncated = |needed: usize| Error::Truncated {
            offset,
            needed,
            available: rest.len(),
        };
        let record = |source| Error::Record { offset, source };

        let header = rest.get(..header_bytes).ok_or_else(|| truncated(header_bytes))?;
        let header = words_from_le_bytes(header).map_err(record)?;
        let needed = record_len(&header).map_err(record)? * WORD_SIZE;
        let bytes = rest.get(..needed).ok_or_else(|| truncated(needed))?;
        let event = SimEvent::from_bytes(bytes).map_err(record)?;
        self.offset += needed;
        Ok(event)
    }
}

impl Iterator for EventIter<'_> {
    type Item = Result<SimEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }
        let item = self.next_record();
        self.failed = item.is_err();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u32) -> SimEvent {
        let mut ev = SimEvent::new(id, 1.0);
        ev.push(2, id, vec![0, 1, id]);
        ev
    }

    #[test]
    fn test_iterate_buffer() {
        let mut data = event(1).to_le_bytes();
        data.extend(event(2).to_le_bytes());
        let ids: Vec<u32> = EventIter::new(&data)
            .map(|ev| ev.unwrap().event_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(EventIter::new(&[]).count(), 0);
    }

    #[test]
    fn test_truncated_tail() {
        let mut data = event(1).to_le_bytes();
        let second = event(2).to_le_bytes();
        data.extend_from_slice(&second[..second.len() - 4]);

        let mut iter = EventIter::new(&data);
        assert!(iter.next().unwrap().is_ok());
        let first_len = iter.offset();
        match iter.next() {
            Some(Err(Error::Truncated { offset, .. })) => assert_eq!(offset, first_len),
            other => panic!("expected truncation, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_corrupt_record_stops_iteration() {
        let mut data = event(1).to_le_bytes();
        data[0] ^= 0xFF;
        data.extend(event(2).to_le_bytes());
        let results: Vec<_> = EventIter::new(&data).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::Record { offset: 0, .. })));
    }
}

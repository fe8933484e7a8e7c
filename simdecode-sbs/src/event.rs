//! Simulated event records.
//!
//! An event travels as a record of little-endian `u32` words:
//!
//! | word   | content                                               |
//! |--------|-------------------------------------------------------|
//! | 0      | magic [`EVENT_MAGIC`]                                 |
//! | 1      | format version [`EVENT_FORMAT_VERSION`]               |
//! | 2      | record length in words, header included               |
//! | 3      | event id                                              |
//! | 4, 5   | event weight as `f64` bits, low word first            |
//! | 6      | number of detector data entries                       |
//! | ...    | per entry: detector id, channel, data length, data    |
//!
//! Parsing validates every length before reading, so a malformed buffer
//! yields an [`EventFormatError`] rather than a bogus event.

use thiserror::Error;

/// Record magic ("SBSE").
pub const EVENT_MAGIC: u32 = 0x5342_5345;

/// Current record format version.
pub const EVENT_FORMAT_VERSION: u32 = 1;

/// Number of header words before the first entry.
pub const HEADER_WORDS: usize = 7;

const ENTRY_HEADER_WORDS: usize = 3;

/// Event record layout violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventFormatError {
    /// First word is not [`EVENT_MAGIC`].
    #[error("bad record magic: {0:#010x}")]
    BadMagic(u32),

    /// Record written by an unknown format version.
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u32),

    /// Buffer ends before the data it announces.
    #[error("record truncated: need {needed} words, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Declared record length disagrees with the buffer or its contents.
    #[error("record length mismatch: declared {declared} words, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Byte buffer is not a whole number of words.
    #[error("byte length {0} is not a multiple of 4")]
    Misaligned(usize),
}

/// Digitized data of one detector channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorData {
    /// Detector id.
    pub det_id: i32,
    /// Channel (module) index within the detector.
    pub channel: u32,
    /// Payload words; the meaning of the first word is detector specific.
    pub data: Vec<u32>,
}

impl DetectorData {
    /// Creates an entry.
    #[must_use]
    pub fn new(det_id: i32, channel: u32, data: Vec<u32>) -> Self {
        Self {
            det_id,
            channel,
            data,
        }
    }
}

/// One simulated event.
#[derive(Debug, Clone, PartialEq)]
pub struct SimEvent {
    /// Event id.
    pub event_id: u32,
    /// Event weight.
    pub weight: f64,
    /// Detector data entries in simulation order.
    pub detector_data: Vec<DetectorData>,
}

struct WordCursor<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u32], EventFormatError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.words.len());
        let Some(end) = end else {
            return Err(EventFormatError::Truncated {
                needed: self.pos.saturating_add(n),
                available: self.words.len(),
            });
        };
        let out = &self.words[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn word(&mut self) -> Result<u32, EventFormatError> {
        Ok(self.take(1)?[0])
    }
}

/// Reads the declared length of the record starting at `words[0]`.
///
/// # Errors
/// Returns an error if the header is short, the magic or version is wrong,
/// or the declared length is smaller than the header.
pub fn record_len(words: &[u32]) -> Result<usize, EventFormatError> {
    if words.len() < HEADER_WORDS {
        return Err(EventFormatError::Truncated {
            needed: HEADER_WORDS,
            available: words.len(),
        });
    }
    if words[0] != EVENT_MAGIC {
        return Err(EventFormatError::BadMagic(words[0]));
    }
    if words[1] != EVENT_FORMAT_VERSION {
        return Err(EventFormatError::UnsupportedVersion(words[1]));
    }
    let declared = words[2] as usize;
    if declared < HEADER_WORDS {
        return Err(EventFormatError::LengthMismatch {
            declared,
            actual: HEADER_WORDS,
        });
    }
    Ok(declared)
}

/// Converts little-endian bytes to words.
///
/// # Errors
/// Returns [`EventFormatError::Misaligned`] if the length is not a multiple of 4.
pub fn words_from_le_bytes(bytes: &[u8]) -> Result<Vec<u32>, EventFormatError> {
    if bytes.len() % 4 != 0 {
        return Err(EventFormatError::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl SimEvent {
    /// Creates an empty event.
    #[must_use]
    pub fn new(event_id: u32, weight: f64) -> Self {
        Self {
            event_id,
            weight,
            detector_data: Vec::new(),
        }
    }

    /// Appends a detector data entry.
    pub fn push(&mut self, det_id: i32, channel: u32, data: Vec<u32>) {
        self.detector_data.push(DetectorData::new(det_id, channel, data));
    }

    /// Parses exactly one record.
    ///
    /// # Errors
    /// Returns an [`EventFormatError`] if the buffer is not a complete,
    /// well-formed record.
    #[allow(clippy::cast_possible_wrap)]
    pub fn parse(words: &[u32]) -> Result<Self, EventFormatError> {
        let declared = record_len(words)?;
        if declared != words.len() {
            return Err(EventFormatError::LengthMismatch {
                declared,
                actual: words.len(),
            });
        }

        let mut cur = WordCursor { words, pos: 3 };
        let event_id = cur.word()?;
        let lo = u64::from(cur.word()?);
        let hi = u64::from(cur.word()?);
        let weight = f64::from_bits(lo | (hi << 32));
        let n_entries = cur.word()? as usize;

        // Every entry needs at least its own header.
        let max_entries = (words.len() - HEADER_WORDS) / ENTRY_HEADER_WORDS;
        if n_entries > max_entries {
            return Err(EventFormatError::Truncated {
                needed: HEADER_WORDS + n_entries.saturating_mul(ENTRY_HEADER_WORDS),
                available: words.len(),
            });
        }

        let mut detector_data = Vec::with_capacity(n_entries);
        for _ in 0..n_entries {
            let det_id = cur.word()? as i32;
            let channel = cur.word()?;
            let len = cur.word()? as usize;
            let data = cur.take(len)?.to_vec();
            detector_data.push(DetectorData {
                det_id,
                channel,
                data,
            });
        }

        if cur.pos != declared {
            return Err(EventFormatError::LengthMismatch {
                declared,
                actual: cur.pos,
            });
        }

        Ok(Self {
            event_id,
            weight,
            detector_data,
        })
    }

    /// Parses exactly one record from little-endian bytes.
    ///
    /// # Errors
    /// Returns an [`EventFormatError`] if the bytes are not a well-formed record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventFormatError> {
        Self::parse(&words_from_le_bytes(bytes)?)
    }

    /// Encodes the event as a record.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_words(&self) -> Vec<u32> {
        let payload: usize = self
            .detector_data
            .iter()
            .map(|d| ENTRY_HEADER_WORDS + d.data.len())
            .sum();
        let mut words = Vec::with_capacity(HEADER_WORDS + payload);
        let bits = self.weight.to_bits();

        words.push(EVENT_MAGIC);
        words.push(EVENT_FORMAT_VERSION);
        words.push((HEADER_WORDS + payload) as u32);
        words.push(self.event_id);
        words.push(bits as u32);
        words.push((bits >> 32) as u32);
        words.push(self.detector_data.len() as u32);
        for d in &self.detector_data {
            words.push(d.det_id as u32);
            words.push(d.channel);
            words.push(d.data.len() as u32);
            words.extend_from_slice(&d.data);
        }
        words
    }

    /// Encodes the event as little-endian bytes.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.to_words().iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

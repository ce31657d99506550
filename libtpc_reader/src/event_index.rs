use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use super::constants::{START_OF_EVENT_TOKENS, TOKEN_SIZE};
use super::error::ScanError;
use super::item::Item;
use super::token_decoder::TokenDecoder;

/// Location of one event in an acquisition stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIndexEntry {
    /// Byte offset of the first start of event token
    pub offset: u64,
    pub event_number: u32,
}

/// Statistics of one scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Number of events in the index after the scan
    pub events: usize,
    /// Event number of the last start of event decoded
    pub last_event_number: Option<u32>,
    /// Bytes decoded during this pass
    pub bytes_read: u64,
    /// Indexed events whose number does not follow the previous one
    pub event_number_gaps: u64,
    /// End of event records whose declared size differs from the decoded size
    pub size_mismatches: u64,
}

/// EventIndexer maps event positions to byte offsets in a token stream.
///
/// The index persists between scans so that a growing file only has its new tail decoded.
#[derive(Debug, Clone, Default)]
pub struct EventIndexer {
    entries: Vec<EventIndexEntry>,
}

impl EventIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EventIndexEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[EventIndexEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Decode the stream and record the offset of every event.
    ///
    /// A full scan rebuilds the index from byte 0. Otherwise decoding resumes at the
    /// entry `start` (clamped to the last entry), and entries after it are rebuilt.
    /// Repeated start of event records for one event number are coalesced into a single
    /// entry. The scan stops at the end of the stream.
    pub fn scan<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        decoder: &mut TokenDecoder,
        start: usize,
        full: bool,
    ) -> Result<ScanReport, ScanError> {
        let resume_offset = if full || self.entries.is_empty() {
            self.entries.clear();
            0
        } else {
            let resume = start.min(self.entries.len() - 1);
            self.entries.truncate(resume + 1);
            self.entries[resume].offset
        };

        decoder.reset();
        reader.seek(SeekFrom::Start(resume_offset))?;

        let mut report = ScanReport::default();
        let mut position = resume_offset;
        let mut previous_number: Option<u32> = None;
        loop {
            let token = match reader.read_u16::<LittleEndian>() {
                Ok(token) => token,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let token_offset = position;
            position += TOKEN_SIZE;
            report.bytes_read += TOKEN_SIZE;

            let item = decoder
                .decode(token)
                .map_err(|source| ScanError::Decode {
                    offset: token_offset,
                    source,
                })?
                .cloned();

            match item {
                Some(Item::StartOfEvent(header)) => {
                    let offset = position - START_OF_EVENT_TOKENS * TOKEN_SIZE;
                    let number = header.event_number;
                    if previous_number != Some(number) {
                        self.record(offset, number, &mut report);
                    }
                    previous_number = Some(number);
                    report.last_event_number = Some(number);
                }
                Some(Item::EndOfEvent { size, .. }) => {
                    let found = decoder.counters().event_size_found;
                    if size != found {
                        log::debug!(
                            "End of event at {token_offset} declares {size} bytes but {found} were decoded"
                        );
                        report.size_mismatches += 1;
                    }
                }
                Some(unknown @ Item::Unknown { .. }) => {
                    return Err(ScanError::UnknownItem {
                        offset: token_offset,
                        item: unknown.to_string(),
                    });
                }
                _ => (),
            }
        }

        report.events = self.entries.len();
        log::debug!(
            "Scan from offset {resume_offset} indexed {} events ({} bytes decoded)",
            report.events,
            report.bytes_read
        );
        Ok(report)
    }

    fn record(&mut self, offset: u64, event_number: u32, report: &mut ScanReport) {
        if let Some(last) = self.entries.last() {
            if last.offset == offset {
                return;
            }
            if event_number != last.event_number.wrapping_add(1) {
                log::debug!(
                    "Event number jumps from {} to {event_number} at offset {offset}",
                    last.event_number
                );
                report.event_number_gaps += 1;
            }
        }
        self.entries.push(EventIndexEntry {
            offset,
            event_number,
        });
    }
}

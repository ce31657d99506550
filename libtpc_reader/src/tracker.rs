use fxhash::FxHashMap;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::constants::{TRACKER_FILLER_COLUMNS, TRACKER_MISSING_VALUE, TRACKER_POSITIONS};
use super::error::TrackerError;

/// Beam positions measured by the external tracker for one trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerEvent {
    /// 0-based event number
    pub event_number: i64,
    /// x/y pairs of the four tracker planes
    pub positions: [f32; TRACKER_POSITIONS],
}

impl TrackerEvent {
    /// Positions with unmeasured (non-positive) values replaced by a sentinel
    pub fn measured_positions(&self) -> [f32; TRACKER_POSITIONS] {
        self.positions
            .map(|value| if value > 0.0 { value } else { TRACKER_MISSING_VALUE })
    }
}

/// Parse one line: the positions, the unused columns, then the 1-based event number
fn parse_line(line: &str, line_number: u64) -> Result<TrackerEvent, TrackerError> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    let event_column = TRACKER_POSITIONS + TRACKER_FILLER_COLUMNS;
    if columns.len() <= event_column {
        return Err(TrackerError::BadLine(line_number));
    }
    let mut positions = [0.0; TRACKER_POSITIONS];
    for (position, column) in positions.iter_mut().zip(columns.iter()) {
        *position = column.parse::<f32>()?;
    }
    let event_number = columns[event_column].parse::<i64>()? - 1;
    Ok(TrackerEvent {
        event_number,
        positions,
    })
}

/// TrackerFile gives random access to the lines of a tracker companion file.
#[derive(Debug)]
pub struct TrackerFile {
    path: PathBuf,
    reader: BufReader<File>,
    offsets: FxHashMap<i64, u64>,
}

impl TrackerFile {
    pub fn open(path: &Path) -> Result<Self, TrackerError> {
        if !path.exists() {
            return Err(TrackerError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(File::open(path)?),
            offsets: FxHashMap::default(),
        })
    }

    /// Index every line by its event number. Malformed lines are skipped.
    pub fn scan(&mut self) -> Result<usize, TrackerError> {
        self.offsets.clear();
        self.reader.seek(SeekFrom::Start(0))?;
        let mut offset: u64 = 0;
        let mut line_number: u64 = 0;
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            line_number += 1;
            if !line.trim().is_empty() {
                match parse_line(&line, line_number) {
                    Ok(event) => {
                        self.offsets.insert(event.event_number, offset);
                    }
                    Err(e) => log::warn!("Skipping line in {:?}: {e}", self.path),
                }
            }
            offset += read as u64;
        }
        log::info!(
            "{} events in the tracker file {:?}",
            self.offsets.len(),
            self.path
        );
        Ok(self.offsets.len())
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn has_event(&self, id: usize) -> bool {
        self.offsets.contains_key(&(id as i64))
    }

    /// Read the tracker data of an event. A line whose event number disagrees with the
    /// requested one means the file changed since the scan.
    pub fn get_event(&mut self, id: usize) -> Result<Option<TrackerEvent>, TrackerError> {
        let offset = match self.offsets.get(&(id as i64)) {
            Some(offset) => *offset,
            None => return Ok(None),
        };
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        let event = parse_line(&line, 0)?;
        if event.event_number != id as i64 {
            return Err(TrackerError::EventMismatch {
                found: event.event_number,
                requested: id as i64,
            });
        }
        log::trace!("Read tracker data for event {id}");
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tracker_line(positions: [f32; 8], event_number: i64) -> String {
        let mut columns: Vec<String> = positions.iter().map(|p| format!("{p:.2}")).collect();
        columns.extend((0..TRACKER_FILLER_COLUMNS).map(|i| i.to_string()));
        columns.push(event_number.to_string());
        columns.join(" ")
    }

    #[test]
    fn test_scan_and_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", tracker_line([1.5, 2.0, 0.0, 4.0, 5.0, 6.0, 7.0, 8.0], 1)).unwrap();
        writeln!(file, "not a tracker line").unwrap();
        writeln!(file, "{}", tracker_line([9.0; 8], 3)).unwrap();
        file.flush().unwrap();

        let mut tracker = TrackerFile::open(file.path()).unwrap();
        assert_eq!(tracker.scan().unwrap(), 2);
        assert!(tracker.has_event(0));
        assert!(!tracker.has_event(1));
        assert!(tracker.has_event(2));

        let event = tracker.get_event(0).unwrap().unwrap();
        assert_eq!(event.positions[0], 1.5);
        assert_eq!(event.measured_positions()[2], TRACKER_MISSING_VALUE);
        assert_eq!(tracker.get_event(2).unwrap().unwrap().positions, [9.0; 8]);
        assert!(tracker.get_event(1).unwrap().is_none());
    }

    #[test]
    fn test_event_mismatch_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", tracker_line([1.0; 8], 1)).unwrap();
        file.flush().unwrap();
        let mut tracker = TrackerFile::open(file.path()).unwrap();
        tracker.scan().unwrap();

        // Rewrite the file behind the index
        let mut rewritten = File::create(file.path()).unwrap();
        writeln!(rewritten, "{}", tracker_line([1.0; 8], 5)).unwrap();
        rewritten.flush().unwrap();
        let mut tracker_after = TrackerFile {
            path: tracker.path.clone(),
            reader: BufReader::new(File::open(file.path()).unwrap()),
            offsets: tracker.offsets.clone(),
        };
        let err = tracker_after.get_event(0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_short_line() {
        assert!(matches!(parse_line("1 2 3", 4), Err(TrackerError::BadLine(4))));
    }
}

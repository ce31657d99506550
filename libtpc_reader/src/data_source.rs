use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

use super::aqs_file::AqsFile;
use super::config::Config;
use super::constants::{MIDAS_BOR_EVENT_ID, MIDAS_MAGIC};
use super::error::{DataSourceError, ScanError, TrackerError};
use super::event_index::ScanReport;
use super::midas_source::MidasSource;
use super::raw_event::RawEvent;
use super::tracker::{TrackerEvent, TrackerFile};
use super::transport::new_reader;

/// DataSource is the common face of every event container.
///
/// A source must be scanned before events can be requested. `get_event` returns Ok(None)
/// when there is no event at that position, and an event with its error set when the
/// record is inconsistent.
pub trait DataSource {
    /// Find the events of the source. `start` is the first position which may have
    /// changed since the last scan; `refresh` forces a scan from the beginning.
    fn scan(&mut self, start: usize, refresh: bool) -> Result<ScanReport, ScanError>;

    fn get_event(&mut self, index: usize) -> Result<Option<RawEvent>, DataSourceError>;

    /// Number of events found by the scans so far
    fn event_count(&self) -> usize;

    /// Number of tracker entries, None if no tracker is attached
    fn tracker_event_count(&self) -> Option<usize> {
        None
    }

    fn has_tracker(&self) -> bool {
        self.tracker_event_count().is_some()
    }

    fn get_tracker_event(&mut self, _index: usize) -> Result<Option<TrackerEvent>, TrackerError> {
        Ok(None)
    }
}

/// A DataSource paired with the tracker file recorded alongside it
pub struct TrackedSource {
    source: Box<dyn DataSource>,
    tracker: TrackerFile,
}

impl TrackedSource {
    pub fn new(source: Box<dyn DataSource>, tracker: TrackerFile) -> Self {
        Self { source, tracker }
    }
}

impl DataSource for TrackedSource {
    fn scan(&mut self, start: usize, refresh: bool) -> Result<ScanReport, ScanError> {
        let report = self.source.scan(start, refresh)?;
        self.tracker.scan()?;
        Ok(report)
    }

    fn get_event(&mut self, index: usize) -> Result<Option<RawEvent>, DataSourceError> {
        self.source.get_event(index)
    }

    fn event_count(&self) -> usize {
        self.source.event_count()
    }

    fn tracker_event_count(&self) -> Option<usize> {
        Some(self.tracker.len())
    }

    fn get_tracker_event(&mut self, index: usize) -> Result<Option<TrackerEvent>, TrackerError> {
        self.tracker.get_event(index)
    }
}

/// Supported containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Indexed token stream
    Aqs,
    /// Bank container, read forward only
    Midas,
}

const MIDAS_SUFFIXES: [&str; 4] = [".mid", ".mid.gz", ".mid.lz4", ".mid.bz2"];

/// Identify the container of a source, first by suffix, then by the first record
pub fn detect_format(location: &str) -> Result<SourceFormat, DataSourceError> {
    let lower = location.to_lowercase();
    if lower.ends_with(".aqs") {
        return Ok(SourceFormat::Aqs);
    }
    if MIDAS_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return Ok(SourceFormat::Midas);
    }

    // A bank container run starts with a begin-of-run record
    let mut reader = new_reader(location)?;
    let mut magic = [0u8; 4];
    let read = reader.read(&mut magic)?;
    reader.close()?;
    if read == magic.len()
        && LittleEndian::read_u16(&magic[0..2]) == MIDAS_BOR_EVENT_ID
        && LittleEndian::read_u16(&magic[2..4]) == MIDAS_MAGIC
    {
        return Ok(SourceFormat::Midas);
    }
    Err(DataSourceError::UnknownFormat(location.to_string()))
}

/// Open the source named by a configuration, with its tracker if one is configured
pub fn open_source(config: &Config) -> Result<Box<dyn DataSource>, DataSourceError> {
    let location = config.input.as_str();
    let source: Box<dyn DataSource> = match detect_format(location)? {
        SourceFormat::Aqs => {
            log::info!("Opening token stream {location}");
            Box::new(AqsFile::open(
                Path::new(location),
                config.sample_index_offset_zs,
            )?)
        }
        SourceFormat::Midas => {
            log::info!("Opening bank container {location}");
            Box::new(MidasSource::open(location)?)
        }
    };

    match &config.tracker_path {
        Some(path) => {
            log::info!("Attaching tracker file {}", path.to_string_lossy());
            Ok(Box::new(TrackedSource::new(source, TrackerFile::open(path)?)))
        }
        None => Ok(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_id::ChannelId;
    use crate::constants::{SRC_TYPE_BACK_END, TRACKER_FILLER_COLUMNS};
    use crate::item::Timestamp;
    use crate::midas_event::MidasEvent;
    use crate::token_writer::TokenWriter;
    use std::io::Write;

    #[test]
    fn test_detect_by_suffix() {
        assert_eq!(detect_format("run_0001.aqs").unwrap(), SourceFormat::Aqs);
        assert_eq!(detect_format("run_0001.mid.lz4").unwrap(), SourceFormat::Midas);
        assert_eq!(detect_format("RUN_0001.MID.GZ").unwrap(), SourceFormat::Midas);
    }

    #[test]
    fn test_detect_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0001.dat");
        let mut event = MidasEvent::new();
        event.init(MIDAS_BOR_EVENT_ID, MIDAS_MAGIC, 1, 1, 0);
        std::fs::write(&path, event.data()).unwrap();
        assert_eq!(
            detect_format(path.to_str().unwrap()).unwrap(),
            SourceFormat::Midas
        );

        let other = dir.path().join("notes.txt");
        std::fs::write(&other, b"hello world").unwrap();
        assert!(matches!(
            detect_format(other.to_str().unwrap()),
            Err(DataSourceError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_open_tracked_source() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("run_0002.aqs");
        let mut writer = TokenWriter::new();
        for number in 0..2 {
            writer
                .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), number)
                .channel_hit_header(ChannelId::new(0, 0, 30))
                .time_bin(1)
                .adc_sample(50)
                .end_of_event(SRC_TYPE_BACK_END, 0);
        }
        std::fs::write(&data_path, writer.to_bytes()).unwrap();

        let tracker_path = dir.path().join("run_0002.trk");
        let mut tracker = std::fs::File::create(&tracker_path).unwrap();
        let filler = vec!["0"; TRACKER_FILLER_COLUMNS].join(" ");
        writeln!(tracker, "1 2 3 4 5 6 7 8 {filler} 1").unwrap();
        writeln!(tracker, "8 7 6 5 4 3 2 1 {filler} 2").unwrap();
        tracker.flush().unwrap();

        let config = Config {
            input: data_path.to_string_lossy().to_string(),
            tracker_path: Some(tracker_path),
            ..Default::default()
        };
        let mut source = open_source(&config).unwrap();
        assert_eq!(source.tracker_event_count(), Some(0));
        assert_eq!(source.scan(0, true).unwrap().events, 2);
        assert!(source.has_tracker());
        assert_eq!(source.tracker_event_count(), Some(2));
        assert_eq!(source.get_event(1).unwrap().unwrap().event_number, 1);
        let tracker_event = source.get_tracker_event(1).unwrap().unwrap();
        assert_eq!(tracker_event.positions[0], 8.0);
    }

    #[test]
    fn test_unreadable_tracker_fails_scan() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("run_0003.aqs");
        let mut writer = TokenWriter::new();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), 0)
            .end_of_event(SRC_TYPE_BACK_END, 0);
        std::fs::write(&data_path, writer.to_bytes()).unwrap();

        // A directory opens, but reading lines from it fails
        let tracker_path = dir.path().join("run_0003.trk");
        std::fs::create_dir(&tracker_path).unwrap();

        let config = Config {
            input: data_path.to_string_lossy().to_string(),
            tracker_path: Some(tracker_path),
            ..Default::default()
        };
        let mut source = open_source(&config).unwrap();
        let err = source.scan(0, true).unwrap_err();
        assert!(matches!(err, ScanError::TrackerError(_)));
        assert!(!err.is_fatal());
    }
}

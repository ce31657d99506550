use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::data_source::DataSource;
use super::error::{DataSourceError, ScanError, TransportError};
use super::event_builder::EventBuilder;
use super::event_index::{EventIndexer, ScanReport};
use super::item::Item;
use super::raw_event::RawEvent;
use super::token_decoder::TokenDecoder;

/// AqsFile gives random access to the events of a token stream file.
///
/// The whole file is indexed by [`DataSource::scan`]; events are then decoded on request
/// by seeking to their indexed offset. The index and the extraction share one reader, so
/// an AqsFile must not be shared between threads. Open a second one instead.
#[derive(Debug)]
pub struct AqsFile<R: Read + Seek> {
    reader: R,
    decoder: TokenDecoder,
    indexer: EventIndexer,
    builder: EventBuilder,
}

impl AqsFile<BufReader<File>> {
    /// Open an acquisition file on disk
    pub fn open(path: &Path, sample_index_offset_zs: i32) -> Result<Self, TransportError> {
        if !path.exists() {
            return Err(TransportError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), sample_index_offset_zs))
    }
}

impl<R: Read + Seek> AqsFile<R> {
    pub fn new(reader: R, sample_index_offset_zs: i32) -> Self {
        Self {
            reader,
            decoder: TokenDecoder::new(sample_index_offset_zs),
            indexer: EventIndexer::new(),
            builder: EventBuilder::new(),
        }
    }

    pub fn indexer(&self) -> &EventIndexer {
        &self.indexer
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Decode the event at an index position.
    ///
    /// Decoding starts at the indexed offset and stops at the first end of event. Only
    /// samples following the start of event carrying the indexed event number are kept.
    fn extract(&mut self, index: usize) -> Result<Option<RawEvent>, DataSourceError> {
        let entry = match self.indexer.get(index) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        log::debug!(
            "Getting event {index} at offset {} with number {}",
            entry.offset,
            entry.event_number
        );

        self.decoder.reset();
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        self.builder.start_event(index, entry.event_number);

        let mut matched = false;
        loop {
            let token = match self.reader.read_u16::<LittleEndian>() {
                Ok(token) => token,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.builder
                        .set_error("Reached end of file before the end of event");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            match self.decoder.decode(token) {
                Ok(Some(Item::StartOfEvent(header))) => {
                    self.builder.set_timestamp(header.timestamp);
                    if header.event_number == entry.event_number {
                        matched = true;
                    }
                }
                Ok(Some(Item::AdcSample(sample))) if matched => {
                    self.builder
                        .add_sample(sample.channel, sample.absolute_index, sample.value);
                }
                Ok(Some(Item::EndOfEvent { .. })) => break,
                Ok(_) => (),
                Err(e) => {
                    self.builder.set_error(&e.to_string());
                    break;
                }
            }
        }

        if !matched {
            self.builder.set_error(&format!(
                "No start of event with number {} at offset {}",
                entry.event_number, entry.offset
            ));
        }
        Ok(self.builder.build())
    }
}

impl<R: Read + Seek> DataSource for AqsFile<R> {
    fn scan(&mut self, start: usize, refresh: bool) -> Result<ScanReport, ScanError> {
        self.indexer
            .scan(&mut self.reader, &mut self.decoder, start, refresh)
    }

    fn get_event(&mut self, index: usize) -> Result<Option<RawEvent>, DataSourceError> {
        self.extract(index)
    }

    fn event_count(&self) -> usize {
        self.indexer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_id::ChannelId;
    use crate::constants::SRC_TYPE_BACK_END;
    use crate::item::Timestamp;
    use crate::token_writer::TokenWriter;
    use std::io::{Cursor, Write};

    #[test]
    fn test_get_event_scenario() {
        let mut writer = TokenWriter::new();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp { lsb: 1, mid: 2, msb: 3 }, 5)
            .channel_hit_header(ChannelId::new(0, 1, 10))
            .time_bin(20)
            .adc_sample(123)
            .end_of_event(SRC_TYPE_BACK_END, 0);
        let mut source = AqsFile::new(Cursor::new(writer.to_bytes()), 0);
        let report = source.scan(0, true).unwrap();
        assert_eq!(report.events, 1);

        let event = source.get_event(0).unwrap().unwrap();
        assert!(event.is_ok());
        assert_eq!(event.event_number, 5);
        assert_eq!(event.timestamp, Timestamp { lsb: 1, mid: 2, msb: 3 });
        assert_eq!(event.hits.len(), 1);
        let hit = &event.hits[0];
        assert_eq!(hit.channel, ChannelId::new(0, 1, 10));
        assert_eq!(hit.amplitude_at(20), 123);

        assert!(source.get_event(1).unwrap().is_none());
    }

    #[test]
    fn test_interleaved_channels_merge() {
        let a = ChannelId::new(1, 0, 40);
        let b = ChannelId::new(1, 0, 41);
        let mut writer = TokenWriter::new();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), 0)
            .channel_hit_header(a)
            .time_bin(10)
            .adc_sample(1)
            .channel_hit_header(b)
            .time_bin(10)
            .adc_sample(2)
            .channel_hit_header(a)
            .time_bin(11)
            .adc_sample(3)
            .channel_hit_header(ChannelId::new(1, 0, 15))
            .time_bin(10)
            .adc_sample(4)
            .end_of_event(SRC_TYPE_BACK_END, 0);
        let mut source = AqsFile::new(Cursor::new(writer.to_bytes()), 0);
        source.scan(0, true).unwrap();
        let event = source.get_event(0).unwrap().unwrap();
        assert_eq!(event.hits.len(), 2);
        assert_eq!(event.find_hit(&a).unwrap().waveform, vec![1, 3]);
        assert_eq!(event.find_hit(&b).unwrap().waveform, vec![2]);
    }

    #[test]
    fn test_truncated_event_flagged() {
        let mut writer = TokenWriter::new();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), 0)
            .channel_hit_header(ChannelId::new(0, 0, 10))
            .time_bin(0)
            .adc_sample(7);
        let mut source = AqsFile::new(Cursor::new(writer.to_bytes()), 0);
        source.scan(0, true).unwrap();
        let event = source.get_event(0).unwrap().unwrap();
        assert!(event.error.is_some());
        assert_eq!(event.hits.len(), 1);
    }

    #[test]
    fn test_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0001.aqs");
        let mut file = File::create(&path).unwrap();
        let mut writer = TokenWriter::new();
        for number in 0..3 {
            writer
                .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), number)
                .channel_hit_header(ChannelId::new(0, 0, 10))
                .time_bin(0)
                .adc_sample(number as u16)
                .end_of_event(SRC_TYPE_BACK_END, 0);
        }
        writer.write_to(&mut file).unwrap();
        file.flush().unwrap();

        let mut source = AqsFile::open(&path, 0).unwrap();
        assert_eq!(source.scan(0, true).unwrap().events, 3);
        let before = source.indexer().entries().to_vec();

        writer.clear();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), 3)
            .channel_hit_header(ChannelId::new(0, 0, 10))
            .time_bin(0)
            .adc_sample(3)
            .end_of_event(SRC_TYPE_BACK_END, 0);
        writer.write_to(&mut file).unwrap();
        file.flush().unwrap();

        let report = source.scan(source.event_count() - 1, false).unwrap();
        assert_eq!(report.events, 4);
        assert_eq!(&source.indexer().entries()[..3], before.as_slice());
        let event = source.get_event(3).unwrap().unwrap();
        assert_eq!(event.event_number, 3);
        assert_eq!(event.hits[0].waveform, vec![3]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AqsFile::open(Path::new("/definitely/not/here.aqs"), 0),
            Err(TransportError::BadFilePath(_))
        ));
    }
}

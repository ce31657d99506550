use super::channel_id::ChannelId;
use super::constants::*;
use super::data_source::DataSource;
use super::error::{DataSourceError, ScanError, TransportError};
use super::event_builder::EventBuilder;
use super::event_index::ScanReport;
use super::item::Timestamp;
use super::midas_event::MidasEvent;
use super::raw_event::RawEvent;
use super::transport::{new_reader, ByteReader};

/// How the address and start time of each waveform are stored
#[derive(Debug)]
enum WaveformLayout {
    /// One array per field
    Explicit {
        cards: Vec<u8>,
        chips: Vec<u8>,
        channels: Vec<u8>,
        time_bins: Vec<u16>,
    },
    /// Address packed into one word, see [`ChannelId::from_packed`]
    Packed {
        channel_ids: Vec<u16>,
        time_min: Vec<u16>,
    },
}

impl WaveformLayout {
    fn waveform(&self, i: usize) -> (ChannelId, u16) {
        match self {
            Self::Explicit {
                cards,
                chips,
                channels,
                time_bins,
            } => (
                ChannelId::new(cards[i] as u16, chips[i] as u16, channels[i] as u16),
                time_bins[i],
            ),
            Self::Packed {
                channel_ids,
                time_min,
            } => (ChannelId::from_packed(channel_ids[i]), time_min[i]),
        }
    }
}

/// Check that a bank exists and holds at least `count` values
fn require<T>(values: Option<Vec<T>>, name: &str, count: usize) -> Result<Vec<T>, String> {
    match values {
        Some(values) if values.len() >= count => Ok(values),
        Some(values) => Err(format!(
            "Bank {name} holds {} values, {count} expected",
            values.len()
        )),
        None => Err(format!("Missing bank {name}")),
    }
}

fn first_u16(event: &mut MidasEvent, name: &str) -> Result<u16, String> {
    Ok(require(event.bank_u16(name), name, 1)?[0])
}

/// Map the banks of one container event onto a RawEvent under construction
fn fill_event(builder: &mut EventBuilder, event: &mut MidasEvent) -> Result<(), String> {
    builder.set_timestamp(Timestamp {
        lsb: first_u16(event, BANK_TIME_LSB)?,
        mid: first_u16(event, BANK_TIME_MID)?,
        msb: first_u16(event, BANK_TIME_MSB)?,
    });

    let n_waveforms = first_u16(event, BANK_N_WAVEFORMS)? as usize;
    if n_waveforms == 0 {
        return Ok(());
    }

    let n_adc = require(event.bank_u8(BANK_N_ADC), BANK_N_ADC, n_waveforms)?;
    let total: usize = n_adc[..n_waveforms].iter().map(|n| *n as usize).sum();
    let wave = require(event.bank_u16(BANK_WAVEFORMS), BANK_WAVEFORMS, total)?;

    let layout = if let Some(cards) = event.bank_u8(BANK_CARD) {
        log::trace!("Event {} uses explicit channel banks", event.serial_number);
        WaveformLayout::Explicit {
            cards: require(Some(cards), BANK_CARD, n_waveforms)?,
            chips: require(event.bank_u8(BANK_CHIP), BANK_CHIP, n_waveforms)?,
            channels: require(event.bank_u8(BANK_CHANNEL), BANK_CHANNEL, n_waveforms)?,
            time_bins: require(event.bank_u16(BANK_TIME_BIN), BANK_TIME_BIN, n_waveforms)?,
        }
    } else if let Some(channel_ids) = event.bank_u16(BANK_CHANNEL_ID) {
        log::trace!("Event {} uses packed channel banks", event.serial_number);
        WaveformLayout::Packed {
            channel_ids: require(Some(channel_ids), BANK_CHANNEL_ID, n_waveforms)?,
            time_min: require(event.bank_u16(BANK_TIME_MIN), BANK_TIME_MIN, n_waveforms)?,
        }
    } else {
        return Err(format!(
            "Neither {BANK_CARD} nor {BANK_CHANNEL_ID} bank is present"
        ));
    };

    // Waveforms are stored back to back in WAVE, filtered channels included
    let mut offset = 0;
    for (i, n) in n_adc[..n_waveforms].iter().enumerate() {
        let end = offset + *n as usize;
        let (channel, first_time_bin) = layout.waveform(i);
        if !builder.add_waveform(channel, first_time_bin, &wave[offset..end]) {
            log::trace!("Skipping waveform of {channel}");
        }
        offset = end;
    }
    Ok(())
}

/// MidasSource reads detector events from a bank container stream.
///
/// The format carries no index, so the source only moves forward. Going back to an
/// earlier event reopens the transport and reads from the start. Begin-of-run,
/// end-of-run and message records are skipped and never counted.
pub struct MidasSource {
    location: String,
    reader: Option<Box<dyn ByteReader>>,
    /// Last event read, at position `cursor - 1`
    current: Option<MidasEvent>,
    /// Number of detector events consumed since the transport was opened
    cursor: usize,
    event_count: usize,
    last_counter: Option<u32>,
    /// The last read ended on a truncated event, the stream position is unusable
    stale: bool,
    builder: EventBuilder,
}

impl std::fmt::Debug for MidasSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidasSource")
            .field("location", &self.location)
            .field("cursor", &self.cursor)
            .field("event_count", &self.event_count)
            .field("stale", &self.stale)
            .finish()
    }
}

impl MidasSource {
    /// Open any source string accepted by [`new_reader`]
    pub fn open(location: &str) -> Result<Self, TransportError> {
        let reader = new_reader(location)?;
        log::info!("Opened {location}");
        Ok(Self {
            location: location.to_string(),
            reader: Some(reader),
            current: None,
            cursor: 0,
            event_count: 0,
            last_counter: None,
            stale: false,
            builder: EventBuilder::new(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        if let Some(mut reader) = self.reader.take() {
            if let Err(e) = reader.close() {
                log::warn!("Failed to close {}: {e}", self.location);
            }
        }
        log::debug!("Reopening {}", self.location);
        self.reader = Some(new_reader(&self.location)?);
        self.current = None;
        self.cursor = 0;
        self.stale = false;
        Ok(())
    }

    /// Read the next detector event, skipping system records
    fn next_event(&mut self) -> Result<Option<MidasEvent>, TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        loop {
            let event = match MidasEvent::read_from(reader.as_mut())? {
                Some(event) => event,
                None => return Ok(None),
            };
            if event.error.is_some() {
                self.stale = true;
                return Ok(Some(event));
            }
            if event.is_system_event() {
                log::debug!("Skipping system record: {}", event.header_string());
                continue;
            }
            return Ok(Some(event));
        }
    }

    /// Position the source on event `id`. Returns false if the stream ends first.
    pub fn go_to_event(&mut self, id: usize) -> Result<bool, TransportError> {
        if self.stale || id + 1 < self.cursor || (id + 1 == self.cursor && self.current.is_none())
        {
            self.reopen()?;
        }
        while self.cursor <= id {
            match self.next_event()? {
                Some(event) => {
                    self.cursor += 1;
                    self.current = Some(event);
                }
                None => {
                    self.current = None;
                    log::debug!("End of {} reached while event {id} was requested", self.location);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl DataSource for MidasSource {
    fn scan(&mut self, _start: usize, refresh: bool) -> Result<ScanReport, ScanError> {
        if refresh || self.stale {
            self.reopen()?;
            self.event_count = 0;
            self.last_counter = None;
        }

        let mut report = ScanReport::default();
        loop {
            let mut event = match self.next_event()? {
                Some(event) => event,
                None => break,
            };
            report.bytes_read += event.data().len() as u64;
            if event.error.is_some() {
                // Incomplete tail, the next scan starts over
                log::debug!("Scan of {} stopped on a truncated event", self.location);
                self.current = None;
                break;
            }
            self.cursor += 1;
            if self.cursor > self.event_count {
                if let Some(counter) = event
                    .bank_u32(BANK_EVENT_COUNTER)
                    .and_then(|values| values.first().copied())
                {
                    if let Some(last) = self.last_counter {
                        if counter != last.wrapping_add(1) {
                            report.event_number_gaps += 1;
                        }
                    }
                    self.last_counter = Some(counter);
                }
                self.event_count = self.cursor;
            }
            self.current = Some(event);
        }

        report.events = self.event_count;
        report.last_event_number = self.last_counter;
        Ok(report)
    }

    fn get_event(&mut self, index: usize) -> Result<Option<RawEvent>, DataSourceError> {
        if !self.go_to_event(index)? {
            return Ok(None);
        }
        let event = match self.current.as_mut() {
            Some(event) => event,
            None => return Ok(None),
        };

        if let Some(reason) = event.error.clone() {
            self.builder.start_event(index, 0);
            self.builder.set_error(&reason);
            return Ok(self.builder.build());
        }

        event.find_all_banks();
        let counter = event
            .bank_u32(BANK_EVENT_COUNTER)
            .and_then(|values| values.first().copied());
        self.builder.start_event(index, counter.unwrap_or(0));
        if let Some(reason) = event.error.clone() {
            self.builder.set_error(&reason);
            return Ok(self.builder.build());
        }
        match counter {
            Some(counter) if counter as usize != index => {
                log::debug!("Event at position {index} carries counter {counter}")
            }
            Some(_) => (),
            None => self.builder.set_error("Missing bank COUN"),
        }

        if let Err(reason) = fill_event(&mut self.builder, event) {
            log::warn!("Event {index}: {reason}");
            self.builder.set_error(&reason);
        }
        Ok(self.builder.build())
    }

    fn event_count(&self) -> usize {
        self.event_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::new_writer;
    use std::path::Path;

    /// Build a detector event in the explicit layout
    fn explicit_event(counter: u32, channels: &[u8], samples: &[Vec<u16>]) -> MidasEvent {
        let mut event = MidasEvent::new();
        event.init(1, 0, counter, 1, 0);
        event
            .add_bank(BANK_EVENT_COUNTER, MIDAS_TID_UINT32, &counter.to_le_bytes())
            .unwrap();
        event.add_bank(BANK_TIME_MSB, MIDAS_TID_UINT16, &3u16.to_le_bytes()).unwrap();
        event.add_bank(BANK_TIME_MID, MIDAS_TID_UINT16, &2u16.to_le_bytes()).unwrap();
        event.add_bank(BANK_TIME_LSB, MIDAS_TID_UINT16, &1u16.to_le_bytes()).unwrap();
        event
            .add_bank(BANK_N_WAVEFORMS, MIDAS_TID_UINT16, &(channels.len() as u16).to_le_bytes())
            .unwrap();
        let n_adc: Vec<u8> = samples.iter().map(|s| s.len() as u8).collect();
        event.add_bank(BANK_N_ADC, MIDAS_TID_UINT8, &n_adc).unwrap();
        let wave: Vec<u8> = samples
            .iter()
            .flatten()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        event.add_bank(BANK_WAVEFORMS, MIDAS_TID_UINT16, &wave).unwrap();
        let zeros = vec![0u8; channels.len()];
        event.add_bank(BANK_CARD, MIDAS_TID_UINT8, &zeros).unwrap();
        event.add_bank(BANK_CHIP, MIDAS_TID_UINT8, &zeros).unwrap();
        event.add_bank(BANK_CHANNEL, MIDAS_TID_UINT8, channels).unwrap();
        let time_bins: Vec<u8> = (0..channels.len())
            .flat_map(|i| (10 * i as u16).to_le_bytes())
            .collect();
        event.add_bank(BANK_TIME_BIN, MIDAS_TID_UINT16, &time_bins).unwrap();
        event
    }

    fn system_event(id: u16) -> MidasEvent {
        let mut event = MidasEvent::new();
        event.init(id, MIDAS_MAGIC, 0, 1, 0);
        event
    }

    fn write_file(path: &Path, events: &[MidasEvent]) {
        let mut writer = new_writer(path.to_str().unwrap()).unwrap();
        for event in events {
            event.write_to(writer.as_mut()).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_explicit_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mid");
        write_file(
            &path,
            &[
                system_event(MIDAS_BOR_EVENT_ID),
                explicit_event(0, &[10, 15, 20], &[vec![1, 2], vec![9], vec![3, 4, 5]]),
                system_event(MIDAS_EOR_EVENT_ID),
            ],
        );

        let mut source = MidasSource::open(path.to_str().unwrap()).unwrap();
        let report = source.scan(0, true).unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(report.last_event_number, Some(0));

        let event = source.get_event(0).unwrap().unwrap();
        assert!(event.is_ok(), "{:?}", event.error);
        assert_eq!(event.timestamp, Timestamp { lsb: 1, mid: 2, msb: 3 });
        // Channel 15 is excluded, its samples are still skipped over in WAVE
        assert_eq!(event.hits.len(), 2);
        assert_eq!(event.hits[0].channel, ChannelId::new(0, 0, 10));
        assert_eq!(event.hits[0].first_time_bin, 0);
        assert_eq!(event.hits[0].waveform, vec![1, 2]);
        assert_eq!(event.hits[1].channel, ChannelId::new(0, 0, 20));
        assert_eq!(event.hits[1].first_time_bin, 20);
        assert_eq!(event.hits[1].waveform, vec![3, 4, 5]);

        assert!(source.get_event(1).unwrap().is_none());
    }

    #[test]
    fn test_packed_layout() {
        let mut event = MidasEvent::new();
        event.init(1, 0, 0, 1, 0);
        event.add_bank(BANK_EVENT_COUNTER, MIDAS_TID_UINT32, &0u32.to_le_bytes()).unwrap();
        for name in [BANK_TIME_MSB, BANK_TIME_MID, BANK_TIME_LSB] {
            event.add_bank(name, MIDAS_TID_UINT16, &0u16.to_le_bytes()).unwrap();
        }
        event.add_bank(BANK_N_WAVEFORMS, MIDAS_TID_UINT16, &1u16.to_le_bytes()).unwrap();
        event.add_bank(BANK_N_ADC, MIDAS_TID_UINT8, &[2]).unwrap();
        event.add_bank(BANK_WAVEFORMS, MIDAS_TID_UINT16, &[7, 0, 8, 0]).unwrap();
        let id = ChannelId::new(5, 9, 40);
        event
            .add_bank(BANK_CHANNEL_ID, MIDAS_TID_UINT16, &id.to_packed().to_le_bytes())
            .unwrap();
        event.add_bank(BANK_TIME_MIN, MIDAS_TID_UINT16, &100u16.to_le_bytes()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mid.lz4");
        write_file(&path, &[event]);

        let mut source = MidasSource::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.scan(0, true).unwrap().events, 1);
        let event = source.get_event(0).unwrap().unwrap();
        assert!(event.is_ok());
        assert_eq!(event.hits[0].channel, id);
        assert_eq!(event.hits[0].first_time_bin, 100);
        assert_eq!(event.hits[0].waveform, vec![7, 8]);
    }

    #[test]
    fn test_go_back_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mid.gz");
        let events: Vec<MidasEvent> = (0..4)
            .map(|n| explicit_event(n, &[10], &[vec![n as u16]]))
            .collect();
        write_file(&path, &events);

        let mut source = MidasSource::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.scan(0, true).unwrap().events, 4);
        assert_eq!(source.get_event(3).unwrap().unwrap().hits[0].waveform, vec![3]);
        assert_eq!(source.get_event(1).unwrap().unwrap().hits[0].waveform, vec![1]);
        assert_eq!(source.get_event(1).unwrap().unwrap().event_number, 1);
        assert_eq!(source.get_event(2).unwrap().unwrap().hits[0].waveform, vec![2]);
    }

    #[test]
    fn test_empty_and_broken_events() {
        let empty = explicit_event(0, &[], &[]);
        let mut missing = MidasEvent::new();
        missing.init(1, 0, 1, 1, 0);
        missing
            .add_bank(BANK_EVENT_COUNTER, MIDAS_TID_UINT32, &1u32.to_le_bytes())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mid");
        write_file(&path, &[empty, missing]);

        let mut source = MidasSource::open(path.to_str().unwrap()).unwrap();
        assert_eq!(source.scan(0, true).unwrap().events, 2);
        let event = source.get_event(0).unwrap().unwrap();
        assert!(event.is_ok());
        assert!(event.hits.is_empty());
        let event = source.get_event(1).unwrap().unwrap();
        assert!(event.error.unwrap().contains(BANK_TIME_LSB));
    }
}

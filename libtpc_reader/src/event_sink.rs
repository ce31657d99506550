use serde::Serialize;

use super::error::ProcessorError;
use super::raw_event::RawEvent;
use super::tracker::TrackerEvent;
use super::transport::{new_writer, ByteWriter};

/// Destination of converted events. Output formats implement this trait.
pub trait EventSink {
    fn write_event(
        &mut self,
        event: &RawEvent,
        tracker: Option<&TrackerEvent>,
    ) -> Result<(), ProcessorError>;

    /// Flush and release the destination. Called once, after the last event.
    fn close(&mut self) -> Result<(), ProcessorError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    event: &'a RawEvent,
    tracker: Option<&'a TrackerEvent>,
}

/// Dumps each event as one YAML document. The destination goes through [`new_writer`], so
/// `.gz`/`.lz4` suffixes and `pipeout://` commands work as well as plain files.
pub struct YamlSink {
    writer: Box<dyn ByteWriter>,
    written: usize,
}

impl YamlSink {
    pub fn open(destination: &str) -> Result<Self, ProcessorError> {
        log::info!("Writing events to {destination}");
        Ok(Self {
            writer: new_writer(destination)?,
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl EventSink for YamlSink {
    fn write_event(
        &mut self,
        event: &RawEvent,
        tracker: Option<&TrackerEvent>,
    ) -> Result<(), ProcessorError> {
        let record = EventRecord { event, tracker };
        let yaml = serde_yaml::to_string(&record)
            .map_err(|e| ProcessorError::SinkError(e.to_string()))?;
        self.writer.write(b"---\n")?;
        self.writer.write(yaml.as_bytes())?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ProcessorError> {
        self.writer.close()?;
        log::info!("Wrote {} events", self.written);
        Ok(())
    }
}

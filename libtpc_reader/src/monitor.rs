//! Following a source which is still being written.
//!
//! A [`Monitor`] repeatedly runs incremental scans of its source and hands out each event
//! once. Whether monitoring continues is owned by a [`MonitorContext`]; other threads stop
//! it through a [`MonitorHandle`].
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::config::{Config, MonitorConfig};
use super::data_source::{open_source, DataSource};
use super::error::{DataSourceError, ProcessorError};
use super::raw_event::RawEvent;
use super::tracker::TrackerEvent;

/// Cloneable switch used to stop a running monitor from another thread
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    active: Arc<AtomicBool>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct MonitorContext {
    active: Arc<AtomicBool>,
    poll_interval: Duration,
    idle_limit: Option<u32>,
    idle_polls: u32,
}

impl MonitorContext {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            poll_interval: config.poll_interval(),
            idle_limit: config.idle_poll_limit,
            idle_polls: 0,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            active: self.active.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Number of consecutive polls which found nothing new
    pub fn idle_polls(&self) -> u32 {
        self.idle_polls
    }

    fn record_poll(&mut self, found: usize) {
        if found == 0 {
            self.idle_polls += 1;
        } else {
            self.idle_polls = 0;
        }
    }

    fn is_idle_exhausted(&self) -> bool {
        match self.idle_limit {
            Some(limit) => self.idle_polls >= limit,
            None => false,
        }
    }
}

pub struct Monitor {
    source: Box<dyn DataSource>,
    context: MonitorContext,
    delivered: usize,
}

impl Monitor {
    pub fn new(source: Box<dyn DataSource>, context: MonitorContext) -> Self {
        Self {
            source,
            context,
            delivered: 0,
        }
    }

    /// Open the configured source for monitoring
    pub fn open(config: &Config) -> Result<Self, DataSourceError> {
        Ok(Self::new(
            open_source(config)?,
            MonitorContext::new(&config.monitor),
        ))
    }

    pub fn context(&self) -> &MonitorContext {
        &self.context
    }

    /// Number of events handed out so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    fn rescan(&mut self) -> Result<(), ProcessorError> {
        let count = self.source.event_count();
        let report = self.source.scan(count.saturating_sub(1), count == 0)?;
        log::debug!(
            "Monitor scan: {} events, {} bytes read",
            report.events,
            report.bytes_read
        );
        Ok(())
    }

    /// Extract the events not yet handed out. A flagged last event may still be in
    /// the middle of being written; it is retried on the next poll unless `include_tail`.
    fn collect(&mut self, include_tail: bool) -> Result<Vec<RawEvent>, ProcessorError> {
        let count = self.source.event_count();
        let mut events = Vec::new();
        while self.delivered < count {
            let event = match self.source.get_event(self.delivered)? {
                Some(event) => event,
                None => break,
            };
            if !include_tail && !event.is_ok() && self.delivered + 1 == count {
                break;
            }
            self.delivered += 1;
            events.push(event);
        }
        Ok(events)
    }

    /// Scan for new data and return the events which became available
    pub fn poll(&mut self) -> Result<Vec<RawEvent>, ProcessorError> {
        self.rescan()?;
        let events = self.collect(false)?;
        self.context.record_poll(events.len());
        Ok(events)
    }

    /// Final scan, returning every remaining event including a flagged tail
    pub fn finish(&mut self) -> Result<Vec<RawEvent>, ProcessorError> {
        self.rescan()?;
        self.collect(true)
    }

    fn deliver<F>(&mut self, events: Vec<RawEvent>, callback: &mut F) -> Result<usize, ProcessorError>
    where
        F: FnMut(RawEvent, Option<TrackerEvent>) -> Result<(), ProcessorError>,
    {
        let n_events = events.len();
        for event in events {
            let tracker = self.source.get_tracker_event(event.id)?;
            callback(event, tracker)?;
        }
        Ok(n_events)
    }

    /// Poll until stopped or idle for too long, passing every event to `callback`.
    /// Returns the number of events delivered.
    pub fn run<F>(&mut self, mut callback: F) -> Result<usize, ProcessorError>
    where
        F: FnMut(RawEvent, Option<TrackerEvent>) -> Result<(), ProcessorError>,
    {
        log::info!("Monitoring started");
        let mut total = 0;
        while self.context.is_active() {
            let events = self.poll()?;
            if !events.is_empty() {
                log::info!("{} new events", events.len());
            }
            total += self.deliver(events, &mut callback)?;
            if self.context.is_idle_exhausted() {
                log::info!(
                    "No new data after {} polls, stopping",
                    self.context.idle_polls()
                );
                break;
            }
            std::thread::sleep(self.context.poll_interval());
        }
        let events = self.finish()?;
        total += self.deliver(events, &mut callback)?;
        log::info!("Monitoring stopped after {total} events");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqs_file::AqsFile;
    use crate::channel_id::ChannelId;
    use crate::constants::SRC_TYPE_BACK_END;
    use crate::item::Timestamp;
    use crate::token_writer::TokenWriter;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    fn event_bytes(number: u32) -> Vec<u8> {
        let mut writer = TokenWriter::new();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), number)
            .channel_hit_header(ChannelId::new(0, 3, 12))
            .time_bin(1)
            .adc_sample(number as u16)
            .end_of_event(SRC_TYPE_BACK_END, 0);
        writer.to_bytes()
    }

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
    }

    fn monitor_config(idle_poll_limit: Option<u32>) -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 1,
            idle_poll_limit,
        }
    }

    fn open_monitor(path: &Path, config: &MonitorConfig) -> Monitor {
        let source = AqsFile::open(path, 0).unwrap();
        Monitor::new(Box::new(source), MonitorContext::new(config))
    }

    #[test]
    fn test_poll_holds_back_partial_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0020.aqs");
        File::create(&path).unwrap();
        append(&path, &event_bytes(0));
        append(&path, &event_bytes(1));

        let mut monitor = open_monitor(&path, &monitor_config(None));
        let events = monitor.poll().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.is_ok()));

        // Everything but the end of event record
        let third = event_bytes(2);
        let split = third.len() - 8;
        append(&path, &third[..split]);
        assert!(monitor.poll().unwrap().is_empty());
        assert_eq!(monitor.context().idle_polls(), 1);

        append(&path, &third[split..]);
        let events = monitor.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_number, 2);
        assert!(events[0].is_ok());
        assert_eq!(monitor.delivered(), 3);
        assert_eq!(monitor.context().idle_polls(), 0);
    }

    #[test]
    fn test_run_stops_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0021.aqs");
        File::create(&path).unwrap();
        for number in 0..3 {
            append(&path, &event_bytes(number));
        }
        let mut monitor = open_monitor(&path, &monitor_config(Some(2)));
        let mut numbers = Vec::new();
        let total = monitor
            .run(|event, tracker| {
                assert!(tracker.is_none());
                numbers.push(event.event_number);
                Ok(())
            })
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn test_stopped_monitor_flushes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_0022.aqs");
        File::create(&path).unwrap();
        append(&path, &event_bytes(0));
        let partial = event_bytes(1);
        append(&path, &partial[..partial.len() - 8]);

        let mut monitor = open_monitor(&path, &monitor_config(None));
        let handle = monitor.context().handle();
        handle.stop();
        assert!(!handle.is_active());

        let mut flagged = 0;
        let total = monitor
            .run(|event, _| {
                if !event.is_ok() {
                    flagged += 1;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(flagged, 1);
    }
}

use std::sync::mpsc::Sender;

use super::config::Config;
use super::data_source::{open_source, DataSource};
use super::error::ProcessorError;
use super::event_index::ScanReport;
use super::event_sink::EventSink;
use super::worker_status::{BarColor, WorkerStatus};

/// Log the statistics of a scan, warning about anything suspicious
pub fn report_scan(source: &dyn DataSource, report: &ScanReport) {
    log::info!(
        "Found {} events in {}",
        report.events,
        human_bytes::human_bytes(report.bytes_read as f64)
    );
    if let Some(last) = report.last_event_number {
        log::info!("Last event number: {last}");
    }
    if report.event_number_gaps > 0 {
        log::warn!("{} gaps in the event numbers", report.event_number_gaps);
    }
    if report.size_mismatches > 0 {
        log::warn!(
            "{} events with a declared size different from their content",
            report.size_mismatches
        );
    }
    if let Some(tracker_events) = source.tracker_event_count() {
        // One extra trigger is allowed by the trigger design
        if tracker_events > report.events + 1 {
            log::warn!(
                "Tracker file has {tracker_events} events for {} data events",
                report.events
            );
        }
    }
}

/// Convert every event of an already opened source.
///
/// Events flagged with an error are skipped with a warning. Returns the number of events
/// written to the sink.
pub fn convert(
    source: &mut dyn DataSource,
    max_events: Option<usize>,
    sink: &mut dyn EventSink,
    tx: &Sender<WorkerStatus>,
) -> Result<usize, ProcessorError> {
    tx.send(WorkerStatus::new(0.0, 0, BarColor::MAGENTA))?;
    let report = source.scan(0, true)?;
    report_scan(source, &report);

    let total = match max_events {
        Some(limit) => limit.min(report.events),
        None => report.events,
    };
    let flush_frac: f32 = 0.01;
    let flush_val = ((total as f32 * flush_frac).ceil() as usize).max(1);

    tx.send(WorkerStatus::new(0.0, 0, BarColor::CYAN))?;
    let mut written = 0;
    let mut skipped = 0;
    for index in 0..total {
        match source.get_event(index)? {
            Some(event) if event.is_ok() => {
                let tracker = source.get_tracker_event(index)?;
                sink.write_event(&event, tracker.as_ref())?;
                written += 1;
            }
            Some(event) => {
                log::warn!(
                    "Skipping event {index}: {}",
                    event.error.as_deref().unwrap_or_default()
                );
                skipped += 1;
            }
            None => {
                log::warn!("Event {index} is no longer available, stopping.");
                break;
            }
        }

        if (index + 1) % flush_val == 0 {
            tx.send(WorkerStatus::new(
                (index + 1) as f32 / total as f32,
                written,
                BarColor::CYAN,
            ))?;
        }
    }
    sink.close()?;

    tx.send(WorkerStatus::new(1.0, written, BarColor::CYAN))?;
    if skipped > 0 {
        log::warn!("Skipped {skipped} events with errors");
    }
    log::info!("Done with conversion, {written} events written.");
    Ok(written)
}

/// The main loop of tpc_reader.
///
/// This takes in a config (and progress monitor), opens the source it names, and hands
/// every event to the sink.
pub fn process_run(
    config: &Config,
    sink: &mut dyn EventSink,
    tx: &Sender<WorkerStatus>,
) -> Result<usize, ProcessorError> {
    let mut source = open_source(config)?;
    convert(source.as_mut(), config.max_events, sink, tx)
}

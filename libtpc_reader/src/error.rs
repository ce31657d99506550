use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum Lz4Error {
    #[error("Lz4Reader failed after {produced} decoded bytes: {source}")]
    Frame {
        produced: u64,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport could not open {0:?} because it does not exist")]
    BadFilePath(PathBuf),
    #[error("Transport failed to spawn pipeline `{0}`: {1}")]
    SpawnFailed(String, std::io::Error),
    #[error("Transport pipeline `{0}` exited with status {1}")]
    PipeFailed(String, std::process::ExitStatus),
    #[error("Transport was used after being closed")]
    Closed,
    #[error("Transport got an invalid source string: {0}")]
    BadSource(String),
    #[error("Transport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("TokenDecoder found no matching prefix for token {0:#06x}")]
    NoMatchingPrefix(u16),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scan failed to decode token at byte {offset}: {source}")]
    Decode { offset: u64, source: DecodeError },
    #[error("Scan found an item with no interpretation at byte {offset}: {item}")]
    UnknownItem { offset: u64, item: String },
    #[error("Scan failed due to transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Scan failed due to tracker error: {0}")]
    TrackerError(#[from] TrackerError),
    #[error("Scan failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl ScanError {
    /// An unknown item while indexing means the stream is corrupt and no index over it
    /// can be trusted.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnknownItem { .. } => true,
            Self::TrackerError(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BankError {
    #[error("MidasEvent::add_bank requires a prior call to init")]
    NotInitialised,
    #[error("Bank name {0:?} is not exactly 4 bytes")]
    BadName(String),
    #[error("Bank type {0} is outside the known type range")]
    BadType(u32),
    #[error("Bank of {0} bytes does not fit in a 32-bit size field")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Tracker could not open {0:?} because it does not exist")]
    BadFilePath(PathBuf),
    #[error("Tracker event number mismatch -- found: {found} requested: {requested}")]
    EventMismatch { found: i64, requested: i64 },
    #[error("Tracker line {0} has the wrong number of columns")]
    BadLine(u64),
    #[error("Tracker failed to parse a float: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error("Tracker failed to parse an integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Tracker failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl TrackerError {
    /// A mismatch means the two files are misaligned and every later pairing is wrong.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EventMismatch { .. })
    }
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("DataSource does not recognize the format of {0}")]
    UnknownFormat(String),
    #[error("DataSource failed due to scan error: {0}")]
    ScanError(#[from] ScanError),
    #[error("DataSource failed due to transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("DataSource failed due to tracker error: {0}")]
    TrackerError(#[from] TrackerError),
    #[error("DataSource failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl DataSourceError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ScanError(e) => e.is_fatal(),
            Self::TrackerError(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to DataSource error: {0}")]
    SourceError(#[from] DataSourceError),
    #[error("Processor failed due to Scan error: {0}")]
    ScanError(#[from] ScanError),
    #[error("Processor failed due to Tracker error: {0}")]
    TrackerError(#[from] TrackerError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to Transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Processor failed due to sink error: {0}")]
    SinkError(String),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProcessorError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::SourceError(e) => e.is_fatal(),
            Self::ScanError(e) => e.is_fatal(),
            Self::TrackerError(e) => e.is_fatal(),
            _ => false,
        }
    }
}

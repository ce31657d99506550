use serde::Serialize;
use std::fmt::Display;

use super::channel_id::ChannelId;
use super::constants::{
    PEDTHR_LIST_SIZE_AFTER, PEDTHR_LIST_SIZE_AGET, SRC_TYPE_BACK_END, SRC_TYPE_FRONT_END,
};

/// The two front-end chip designs. They differ in the number of channels, which sets the
/// length of pedestal and threshold lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChipFamily {
    #[default]
    Aget,
    After,
}

impl ChipFamily {
    pub fn list_size(&self) -> u16 {
        match self {
            Self::Aget => PEDTHR_LIST_SIZE_AGET,
            Self::After => PEDTHR_LIST_SIZE_AFTER,
        }
    }
}

/// Short name of a source type, as printed by the acquisition tools
pub fn source_type_name(source_type: u16) -> &'static str {
    match source_type {
        SRC_TYPE_FRONT_END => "FE",
        SRC_TYPE_BACK_END => "BE",
        _ => "??",
    }
}

/// 48-bit hardware timestamp split in three words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Timestamp {
    pub lsb: u16,
    pub mid: u16,
    pub msb: u16,
}

impl Timestamp {
    pub fn value(&self) -> u64 {
        ((self.msb as u64) << 32) | ((self.mid as u64) << 16) | self.lsb as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    Data,
    Monitoring,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub version: u16,
    pub source_type: u16,
    pub source_id: u16,
    /// Frame length in bytes, as declared by the following token
    pub length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    pub event_type: u16,
    pub source_type: u16,
    pub source_id: u16,
    pub timestamp: Timestamp,
    pub event_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdcSample {
    pub channel: ChannelId,
    pub value: u16,
    pub relative_index: i32,
    pub absolute_index: i32,
}

/// One entry of a pedestal correction or zero-suppression threshold list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub family: ChipFamily,
    pub card: u16,
    pub chip: u16,
    pub channel: u16,
    pub value: u16,
}

/// Item is a fully decoded protocol element, assembled from one or more tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Item {
    NullDatum,
    ShortMessage(String),
    LongMessage(String),
    Frame(FrameHeader),
    EndOfFrame,
    FrameSequenceNumber(u16),
    StartOfEvent(EventHeader),
    EndOfEvent {
        source_type: u16,
        source_id: u16,
        size: u32,
    },
    ChannelHitCount {
        chip: u16,
        count: u16,
    },
    LastCellRead {
        chip: u16,
        cell: u16,
    },
    ChannelHitHeader(ChannelId),
    TimeBinIndex(u16),
    AdcSample(AdcSample),
    /// Mean and standard deviation in hundredths of an ADC unit
    PedestalHistogram {
        channel: ChannelId,
        mean: u32,
        std_dev: u32,
    },
    PedestalCorrectionList(ListEntry),
    ZeroSuppressThresholdList(ListEntry),
    StartOfBuiltEvent,
    EndOfBuiltEvent,
    /// A recognized prefix whose content is not interpreted
    Unknown {
        token: u16,
        prefix: &'static str,
    },
}

impl Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NullDatum => write!(f, "(null datum)"),
            Self::ShortMessage(msg) | Self::LongMessage(msg) => write!(f, "{msg}"),
            Self::Frame(frame) => {
                let kind = match frame.kind {
                    FrameKind::Data => "Data",
                    FrameKind::Monitoring => "Monitoring",
                    FrameKind::Configuration => "Configuration",
                };
                write!(
                    f,
                    "--- Start of {kind} Frame (V.{}) {} {:02} ({:4} bytes) --",
                    frame.version,
                    source_type_name(frame.source_type),
                    frame.source_id,
                    frame.length
                )
            }
            Self::EndOfFrame => write!(f, "----- End of Frame -----"),
            Self::FrameSequenceNumber(n) => write!(f, "--- UDP Frame Sequence Number {n:#05x}"),
            Self::StartOfEvent(header) => write!(
                f,
                "-- Start of Event (Type {} From {} {:02}) -- Time {:#06x} {:#06x} {:#06x} Event_Number {:#010x} ({})",
                header.event_type,
                source_type_name(header.source_type),
                header.source_id,
                header.timestamp.msb,
                header.timestamp.mid,
                header.timestamp.lsb,
                header.event_number,
                header.event_number
            ),
            Self::EndOfEvent {
                source_type,
                source_id,
                size,
            } => write!(
                f,
                "----- End of Event ----- (from {} {:02} - size {} bytes)",
                source_type_name(*source_type),
                source_id,
                size
            ),
            Self::ChannelHitCount { chip, count } => {
                write!(f, "Chip {chip:2} Channel_Hit_Count {count:2}")
            }
            Self::LastCellRead { chip, cell } => {
                write!(f, "Chip {chip:2} Last_Cell_Read {cell:#05x} ({cell:3})")
            }
            Self::ChannelHitHeader(id) => write!(f, "{id}"),
            Self::TimeBinIndex(bin) => write!(f, "Time_Bin: {bin:03}"),
            Self::AdcSample(sample) => write!(
                f,
                "Relative_Index: {:03} Absolute_Index: {:03} Amplitude: {:#06x} ({:4})",
                sample.relative_index, sample.absolute_index, sample.value, sample.value
            ),
            Self::PedestalHistogram {
                channel,
                mean,
                std_dev,
            } => write!(
                f,
                "{channel} Mean/Std_dev : {:.2}  {:.2}",
                *mean as f32 / 100.0,
                *std_dev as f32 / 100.0
            ),
            Self::PedestalCorrectionList(entry) => write!(
                f,
                "Card {:02} Chip {:02} Channel {:02} Ped_Correct {:+03}",
                entry.card, entry.chip, entry.channel, entry.value as i16
            ),
            Self::ZeroSuppressThresholdList(entry) => write!(
                f,
                "Card {:02} Chip {:02} Channel {:02} Zero_Sup_Thr {:03}",
                entry.card, entry.chip, entry.channel, entry.value
            ),
            Self::StartOfBuiltEvent => write!(f, "***** Start of Built Event *****"),
            Self::EndOfBuiltEvent => write!(f, "***** End of Built Event *****"),
            Self::Unknown { token, prefix } => {
                write!(f, "Unknown item {prefix} (token {token:#06x})")
            }
        }
    }
}

use super::channel_id::ChannelId;
use super::constants::*;
use super::error::DecodeError;
use super::item::{
    AdcSample, ChipFamily, EventHeader, FrameHeader, FrameKind, Item, ListEntry, Timestamp,
};

/// Meaning of the next token when it is implied by the previous ones rather than given
/// by a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    AsciiLength,
    AsciiChar,
    FrameLength,
    TimestampLsb,
    TimestampMid,
    TimestampMsb,
    EventNumberLsb,
    EventNumberMsb,
    EndOfEventReserved,
    EndOfEventSizeLsb,
    EndOfEventSizeMsb,
    ExtendedChannel,
    PedestalChannel,
    PedestalMeanLsb,
    PedestalMeanMsb,
    PedestalDevLsb,
    PedestalDevMsb,
    ListHeader,
    ListEntry,
}

/// Running counts kept by the decoder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderCounters {
    /// Every token given to the decoder
    pub datum: u64,
    /// Tokens decoded without error
    pub datum_ok: u64,
    pub start_of_event_fe: u64,
    pub start_of_event_be: u64,
    pub end_of_event_fe: u64,
    pub end_of_event_be: u64,
    pub short_message: u64,
    pub long_message: u64,
    pub data_frame: u64,
    pub monitoring_frame: u64,
    pub configuration_frame: u64,
    pub end_of_frame: u64,
    pub start_of_built_event: u64,
    pub end_of_built_event: u64,
    /// Bytes of event content seen since the last back-end start of event. Compared against
    /// the size declared by the end of event record.
    pub event_size_found: u32,
}

/// Mutable context threaded through every decode call.
///
/// At any instant either the prefix of the next token or the pending continuation (never
/// both) decides how that token is read.
#[derive(Debug, Clone)]
pub struct DecoderState {
    implicit: Option<Continuation>,
    sample_index_offset_zs: i32,
    message: Vec<u8>,
    message_length: u16,
    long_message: bool,
    frame: FrameHeader,
    event: EventHeader,
    end_of_event: (u16, u16),
    event_size: u32,
    channel: ChannelId,
    pedestal_mean: u32,
    pedestal_dev: u32,
    list: ListEntry,
    list_is_threshold: bool,
    relative_index: i32,
    absolute_index: i32,
    item: Option<Item>,
    error: Option<String>,
}

impl DecoderState {
    fn new(sample_index_offset_zs: i32) -> Self {
        Self {
            implicit: None,
            sample_index_offset_zs,
            message: Vec::new(),
            message_length: 0,
            long_message: false,
            frame: FrameHeader {
                kind: FrameKind::Data,
                version: 0,
                source_type: 0,
                source_id: 0,
                length: 0,
            },
            event: EventHeader {
                event_type: 0,
                source_type: 0,
                source_id: 0,
                timestamp: Timestamp {
                    lsb: 0xFFFF,
                    mid: 0xFFFF,
                    msb: 0xFFFF,
                },
                event_number: 0xFFFF_FFFF,
            },
            end_of_event: (0, 0),
            event_size: 0,
            channel: ChannelId::default(),
            pedestal_mean: 0,
            pedestal_dev: 0,
            list: ListEntry {
                family: ChipFamily::Aget,
                card: 0,
                chip: 0,
                channel: 0,
                value: 0,
            },
            list_is_threshold: false,
            relative_index: -1,
            absolute_index: -1,
            item: None,
            error: None,
        }
    }

    /// True while the next token is interpreted as a continuation of the current item
    pub fn is_implicit(&self) -> bool {
        self.implicit.is_some()
    }

    /// True when the last decoded token completed an item
    pub fn is_item_complete(&self) -> bool {
        self.item.is_some()
    }

    pub fn last_item(&self) -> Option<&Item> {
        self.item.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Channel addressed by the most recent hit header
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn event_number(&self) -> u32 {
        self.event.event_number
    }

    pub fn relative_sample_index(&self) -> i32 {
        self.relative_index
    }

    pub fn absolute_sample_index(&self) -> i32 {
        self.absolute_index
    }
}

/// TokenDecoder is a finite state decoder for the acquisition token stream.
///
/// Tokens are fed one at a time with [`TokenDecoder::decode`]. A token either completes
/// an [`Item`] or is absorbed into an item which needs more tokens. Items are only valid
/// until the next call.
#[derive(Debug, Clone)]
pub struct TokenDecoder {
    state: DecoderState,
    counters: DecoderCounters,
}

impl Default for TokenDecoder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TokenDecoder {
    /// Create a decoder. `sample_index_offset_zs` is the number of pre-samples kept below
    /// threshold in zero-suppressed mode.
    pub fn new(sample_index_offset_zs: i32) -> Self {
        Self {
            state: DecoderState::new(sample_index_offset_zs),
            counters: DecoderCounters::default(),
        }
    }

    /// Forget all context and counters, as if freshly created
    pub fn reset(&mut self) {
        self.state = DecoderState::new(self.state.sample_index_offset_zs);
        self.counters = DecoderCounters::default();
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn counters(&self) -> &DecoderCounters {
        &self.counters
    }

    /// Decode one token. Returns the completed item, if this token completed one.
    pub fn decode(&mut self, token: u16) -> Result<Option<&Item>, DecodeError> {
        self.counters.datum += 1;
        self.state.item = None;
        let result = match self.state.implicit {
            Some(continuation) => Ok(self.continue_item(continuation, token)),
            None => self.dispatch(token),
        };
        match result {
            Ok(item) => {
                self.counters.datum_ok += 1;
                self.state.error = None;
                if let Some(item) = &item {
                    log::trace!("{item}");
                }
                self.state.item = item;
                Ok(self.state.item.as_ref())
            }
            Err(e) => {
                self.state.error = Some(format!("Datum({}) {e}", self.counters.datum));
                Err(e)
            }
        }
    }

    fn count_event_token(&mut self) {
        self.counters.event_size_found = self
            .counters
            .event_size_found
            .wrapping_add(TOKEN_SIZE as u32);
    }

    fn finish_message(&mut self) -> Item {
        self.state.implicit = None;
        let text = String::from_utf8_lossy(&self.state.message).into_owned();
        if self.state.long_message {
            Item::LongMessage(text)
        } else {
            Item::ShortMessage(text)
        }
    }

    fn start_message(&mut self, length: u16) -> Option<Item> {
        self.state.message.clear();
        self.state.message_length = length;
        if length == 0 {
            Some(self.finish_message())
        } else {
            self.state.implicit = Some(Continuation::AsciiChar);
            None
        }
    }

    /// Interpret a token whose meaning is implied by the pending continuation
    fn continue_item(&mut self, continuation: Continuation, token: u16) -> Option<Item> {
        let state = &mut self.state;
        match continuation {
            Continuation::AsciiChar => {
                // Characters are taken one at a time so that an odd length ends on the
                // low byte of the last token
                state.message.push((token & 0x00FF) as u8);
                if state.message.len() == state.message_length as usize {
                    return Some(self.finish_message());
                }
                state.message.push(((token & 0xFF00) >> 8) as u8);
                if state.message.len() == state.message_length as usize {
                    return Some(self.finish_message());
                }
                None
            }
            Continuation::AsciiLength => {
                self.counters.long_message += 1;
                self.start_message(token)
            }
            Continuation::FrameLength => {
                state.frame.length = token;
                state.implicit = None;
                Some(Item::Frame(state.frame))
            }
            Continuation::TimestampLsb => {
                state.event.timestamp.lsb = token;
                state.implicit = Some(Continuation::TimestampMid);
                self.count_event_token();
                None
            }
            Continuation::TimestampMid => {
                state.event.timestamp.mid = token;
                state.implicit = Some(Continuation::TimestampMsb);
                self.count_event_token();
                None
            }
            Continuation::TimestampMsb => {
                state.event.timestamp.msb = token;
                state.implicit = Some(Continuation::EventNumberLsb);
                self.count_event_token();
                None
            }
            Continuation::EventNumberLsb => {
                state.event.event_number = token as u32;
                state.implicit = Some(Continuation::EventNumberMsb);
                self.count_event_token();
                None
            }
            Continuation::EventNumberMsb => {
                state.event.event_number |= (token as u32) << 16;
                state.implicit = None;
                let header = state.event;
                self.count_event_token();
                Some(Item::StartOfEvent(header))
            }
            Continuation::EndOfEventReserved => {
                state.implicit = Some(Continuation::EndOfEventSizeLsb);
                self.count_event_token();
                None
            }
            Continuation::EndOfEventSizeLsb => {
                state.event_size = token as u32;
                state.implicit = Some(Continuation::EndOfEventSizeMsb);
                self.count_event_token();
                None
            }
            Continuation::EndOfEventSizeMsb => {
                state.event_size |= (token as u32) << 16;
                state.implicit = None;
                let (source_type, source_id) = state.end_of_event;
                let size = state.event_size;
                self.count_event_token();
                Some(Item::EndOfEvent {
                    source_type,
                    source_id,
                    size,
                })
            }
            Continuation::ExtendedChannel => {
                state.channel = ChannelId::from_extended(token);
                state.relative_index = -1;
                state.absolute_index = -1;
                state.implicit = None;
                let channel = state.channel;
                self.count_event_token();
                Some(Item::ChannelHitHeader(channel))
            }
            Continuation::PedestalChannel => {
                state.channel = ChannelId::from_extended(token);
                state.pedestal_mean = 0;
                state.pedestal_dev = 0;
                state.implicit = Some(Continuation::PedestalMeanLsb);
                None
            }
            Continuation::PedestalMeanLsb => {
                state.pedestal_mean = token as u32;
                state.implicit = Some(Continuation::PedestalMeanMsb);
                None
            }
            Continuation::PedestalMeanMsb => {
                state.pedestal_mean |= (token as u32) << 16;
                state.implicit = Some(Continuation::PedestalDevLsb);
                None
            }
            Continuation::PedestalDevLsb => {
                state.pedestal_dev = token as u32;
                state.implicit = Some(Continuation::PedestalDevMsb);
                None
            }
            Continuation::PedestalDevMsb => {
                state.pedestal_dev |= (token as u32) << 16;
                state.implicit = None;
                Some(Item::PedestalHistogram {
                    channel: state.channel,
                    mean: state.pedestal_mean,
                    std_dev: state.pedestal_dev,
                })
            }
            Continuation::ListHeader => {
                state.list_is_threshold = token & 0x1 != 0;
                state.list.family = if (token & 0x2) >> 1 == 0 {
                    ChipFamily::Aget
                } else {
                    ChipFamily::After
                };
                state.list.card = (token & 0x07C0) >> 6;
                state.list.chip = (token & 0x003C) >> 2;
                // The first entry wraps this around to channel 0
                state.list.channel = 0xFFFF;
                state.implicit = Some(Continuation::ListEntry);
                None
            }
            Continuation::ListEntry => {
                state.list.channel = state.list.channel.wrapping_add(1);
                state.list.value = token;
                if state.list.channel == state.list.family.list_size() - 1 {
                    state.implicit = None;
                }
                if state.list_is_threshold {
                    Some(Item::ZeroSuppressThresholdList(state.list))
                } else {
                    Some(Item::PedestalCorrectionList(state.list))
                }
            }
        }
    }

    /// Interpret a token by its prefix. Prefix groups are tested from the widest content
    /// to the narrowest.
    fn dispatch(&mut self, token: u16) -> Result<Option<Item>, DecodeError> {
        let unknown = |prefix: &'static str| -> Result<Option<Item>, DecodeError> {
            Ok(Some(Item::Unknown { token, prefix }))
        };

        // 14-bit content
        match token & PFX_14_BIT_CONTENT_MASK {
            PFX_CARD_CHIP_CHAN_HIT_IX => {
                self.state.channel = ChannelId::from_hit_header(token);
                self.state.relative_index = -1;
                self.state.absolute_index = -1;
                self.count_event_token();
                return Ok(Some(Item::ChannelHitHeader(self.state.channel)));
            }
            PFX_CARD_CHIP_CHAN_HISTO => return unknown("CARD_CHIP_CHAN_HISTO"),
            _ => (),
        }

        // 12-bit content
        match token & PFX_12_BIT_CONTENT_MASK {
            PFX_ADC_SAMPLE => {
                self.state.relative_index += 1;
                self.state.absolute_index += 1;
                self.count_event_token();
                return Ok(Some(Item::AdcSample(AdcSample {
                    channel: self.state.channel,
                    value: token & 0x0FFF,
                    relative_index: self.state.relative_index,
                    absolute_index: self.state.absolute_index,
                })));
            }
            PFX_LAT_HISTO_BIN => return unknown("LAT_HISTO_BIN"),
            _ => (),
        }

        // 11-bit content
        if token & PFX_11_BIT_CONTENT_MASK == PFX_CHIP_LAST_CELL_READ {
            self.count_event_token();
            return Ok(Some(Item::LastCellRead {
                chip: (token & 0x0600) >> 9,
                cell: token & 0x01FF,
            }));
        }

        // 9-bit content
        match token & PFX_9_BIT_CONTENT_MASK {
            PFX_TIME_BIN_IX => {
                let bin = token & 0x01FF;
                self.state.relative_index = -1;
                self.state.absolute_index = bin as i32 - 1 - self.state.sample_index_offset_zs;
                self.count_event_token();
                return Ok(Some(Item::TimeBinIndex(bin)));
            }
            PFX_HISTO_BIN_IX => return unknown("HISTO_BIN_IX"),
            PFX_PEDTHR_LIST => return unknown("PEDTHR_LIST"),
            prefix @ (PFX_START_OF_DFRAME | PFX_START_OF_MFRAME | PFX_START_OF_CFRAME) => {
                let kind = match prefix {
                    PFX_START_OF_DFRAME => {
                        self.counters.data_frame += 1;
                        FrameKind::Data
                    }
                    PFX_START_OF_MFRAME => {
                        self.counters.monitoring_frame += 1;
                        FrameKind::Monitoring
                    }
                    _ => {
                        self.counters.configuration_frame += 1;
                        FrameKind::Configuration
                    }
                };
                self.state.frame = FrameHeader {
                    kind,
                    version: (token & 0x01C0) >> 6,
                    source_type: (token & 0x0020) >> 5,
                    source_id: token & 0x001F,
                    length: 0,
                };
                self.state.implicit = Some(Continuation::FrameLength);
                return Ok(None);
            }
            PFX_CHIP_CHAN_HIT_CNT => {
                self.count_event_token();
                return Ok(Some(Item::ChannelHitCount {
                    chip: (token & 0x0180) >> 7,
                    count: token & 0x007F,
                }));
            }
            PFX_FRAME_SEQ_NB => return Ok(Some(Item::FrameSequenceNumber(token & 0x01FF))),
            _ => (),
        }

        // 8-bit content
        match token & PFX_8_BIT_CONTENT_MASK {
            PFX_ASCII_MSG_LEN => {
                self.counters.short_message += 1;
                self.state.long_message = false;
                return Ok(self.start_message(token & 0x00FF));
            }
            PFX_START_OF_EVENT => {
                let source_type = (token & 0x0020) >> 5;
                self.state.event = EventHeader {
                    event_type: (token & 0x00C0) >> 6,
                    source_type,
                    source_id: token & 0x001F,
                    timestamp: Timestamp {
                        lsb: 0xFFFF,
                        mid: 0xFFFF,
                        msb: 0xFFFF,
                    },
                    event_number: 0xFFFF_FFFF,
                };
                self.state.event_size = 0;
                match source_type {
                    SRC_TYPE_FRONT_END => {
                        self.counters.start_of_event_fe += 1;
                        self.count_event_token();
                    }
                    _ => {
                        self.counters.start_of_event_be += 1;
                        self.counters.event_size_found = TOKEN_SIZE as u32;
                    }
                }
                self.state.implicit = Some(Continuation::TimestampLsb);
                return Ok(None);
            }
            _ => (),
        }

        // 6-bit content
        match token & PFX_6_BIT_CONTENT_MASK {
            PFX_END_OF_EVENT => {
                let source_type = (token & 0x0020) >> 5;
                self.state.end_of_event = (source_type, token & 0x001F);
                match source_type {
                    SRC_TYPE_FRONT_END => self.counters.end_of_event_fe += 1,
                    _ => self.counters.end_of_event_be += 1,
                }
                self.count_event_token();
                self.state.implicit = Some(Continuation::EndOfEventReserved);
                return Ok(None);
            }
            PFX_BERT_STAT => return unknown("BERT_STAT"),
            _ => (),
        }

        // 4-bit content
        match token & PFX_4_BIT_CONTENT_MASK {
            PFX_START_OF_EVENT_MINOS => return unknown("START_OF_EVENT_MINOS"),
            PFX_END_OF_EVENT_MINOS => return unknown("END_OF_EVENT_MINOS"),
            PFX_EXTD_CARD_CHIP_LAST_CELL_READ => return unknown("EXTD_CARD_CHIP_LAST_CELL_READ"),
            _ => (),
        }

        // 2-bit content
        if token & PFX_2_BIT_CONTENT_MASK == PFX_CH_HIT_CNT_HISTO {
            return unknown("CH_HIT_CNT_HISTO");
        }

        // 0-bit content
        match token {
            PFX_EXTD_CARD_CHIP_CHAN_H_MD => {
                self.state.implicit = Some(Continuation::PedestalChannel);
                Ok(None)
            }
            PFX_EXTD_CARD_CHIP_CHAN_HIT_IX => {
                self.count_event_token();
                self.state.implicit = Some(Continuation::ExtendedChannel);
                Ok(None)
            }
            PFX_EXTD_CARD_CHIP_CHAN_HISTO => unknown("EXTD_CARD_CHIP_CHAN_HISTO"),
            PFX_END_OF_FRAME => {
                self.counters.end_of_frame += 1;
                Ok(Some(Item::EndOfFrame))
            }
            PFX_NULL_CONTENT => {
                self.count_event_token();
                Ok(Some(Item::NullDatum))
            }
            PFX_DEADTIME_HSTAT_BINS | PFX_EVPERIOD_HSTAT_BINS => {
                unknown("DEADTIME_HSTAT_BINS/EVPERIOD_HSTAT_BINS")
            }
            PFX_PEDESTAL_HSTAT => unknown("PEDESTAL_HSTAT"),
            PFX_PEDESTAL_H_MD => unknown("PEDESTAL_H_MD"),
            PFX_SHISTO_BINS => unknown("SHISTO_BINS"),
            PFX_CMD_STATISTICS => unknown("CMD_STATISTICS"),
            PFX_START_OF_BUILT_EVENT => {
                self.counters.start_of_built_event += 1;
                Ok(Some(Item::StartOfBuiltEvent))
            }
            PFX_END_OF_BUILT_EVENT => {
                self.counters.end_of_built_event += 1;
                Ok(Some(Item::EndOfBuiltEvent))
            }
            PFX_SOBE_SIZE => unknown("SOBE_SIZE"),
            PFX_LONG_ASCII_MSG => {
                self.state.long_message = true;
                self.state.implicit = Some(Continuation::AsciiLength);
                Ok(None)
            }
            PFX_EXTD_PEDTHR_LIST => {
                self.state.implicit = Some(Continuation::ListHeader);
                Ok(None)
            }
            _ => Err(DecodeError::NoMatchingPrefix(token)),
        }
    }
}

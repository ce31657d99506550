// Acquisition (.aqs) token protocol
//
// A token is one little-endian u16. When the decoder is not inside an implicit
// continuation, the token type is given by a prefix. Prefixes are grouped by the
// width of the data content they leave in the token; each group has a mask that
// selects the prefix bits. Groups are tested from the widest content (shortest
// prefix) to the narrowest, which is the order the decoder must follow.

// 14-bit content
pub const PFX_14_BIT_CONTENT_MASK: u16 = 0xC000;
pub const PFX_CARD_CHIP_CHAN_HIT_IX: u16 = 0xC000;
pub const PFX_CARD_CHIP_CHAN_HISTO: u16 = 0x4000;

// 12-bit content
pub const PFX_12_BIT_CONTENT_MASK: u16 = 0xF000;
pub const PFX_ADC_SAMPLE: u16 = 0x3000;
pub const PFX_LAT_HISTO_BIN: u16 = 0x2000;

// 11-bit content
pub const PFX_11_BIT_CONTENT_MASK: u16 = 0xF800;
pub const PFX_CHIP_LAST_CELL_READ: u16 = 0x1800;

// 9-bit content
pub const PFX_9_BIT_CONTENT_MASK: u16 = 0xFE00;
pub const PFX_TIME_BIN_IX: u16 = 0x0E00;
pub const PFX_HISTO_BIN_IX: u16 = 0x0C00;
pub const PFX_PEDTHR_LIST: u16 = 0x0A00;
pub const PFX_START_OF_DFRAME: u16 = 0x0800;
pub const PFX_START_OF_MFRAME: u16 = 0x0600;
pub const PFX_START_OF_CFRAME: u16 = 0x0400;
pub const PFX_CHIP_CHAN_HIT_CNT: u16 = 0x1200;
pub const PFX_FRAME_SEQ_NB: u16 = 0x1000;

// 8-bit content
pub const PFX_8_BIT_CONTENT_MASK: u16 = 0xFF00;
pub const PFX_ASCII_MSG_LEN: u16 = 0x0100;
pub const PFX_START_OF_EVENT: u16 = 0x0300;

// 6-bit content
pub const PFX_6_BIT_CONTENT_MASK: u16 = 0xFFC0;
pub const PFX_END_OF_EVENT: u16 = 0x02C0;
pub const PFX_BERT_STAT: u16 = 0x0280;

// 4-bit content
pub const PFX_4_BIT_CONTENT_MASK: u16 = 0xFFF0;
pub const PFX_START_OF_EVENT_MINOS: u16 = 0x00F0;
pub const PFX_END_OF_EVENT_MINOS: u16 = 0x00E0;
pub const PFX_EXTD_CARD_CHIP_LAST_CELL_READ: u16 = 0x00D0;

// 2-bit content
pub const PFX_2_BIT_CONTENT_MASK: u16 = 0xFFFC;
pub const PFX_CH_HIT_CNT_HISTO: u16 = 0x007C;

// 0-bit content (the whole token is the prefix)
pub const PFX_EXTD_CARD_CHIP_CHAN_H_MD: u16 = 0x0012;
pub const PFX_EXTD_CARD_CHIP_CHAN_HIT_IX: u16 = 0x0011;
pub const PFX_EXTD_CARD_CHIP_CHAN_HISTO: u16 = 0x0010;
pub const PFX_END_OF_FRAME: u16 = 0x000F;
pub const PFX_DEADTIME_HSTAT_BINS: u16 = 0x000E;
pub const PFX_PEDESTAL_HSTAT: u16 = 0x000D;
pub const PFX_PEDESTAL_H_MD: u16 = 0x000C;
pub const PFX_SHISTO_BINS: u16 = 0x000B;
pub const PFX_CMD_STATISTICS: u16 = 0x000A;
pub const PFX_START_OF_BUILT_EVENT: u16 = 0x0009;
pub const PFX_END_OF_BUILT_EVENT: u16 = 0x0008;
pub const PFX_EVPERIOD_HSTAT_BINS: u16 = 0x0007;
pub const PFX_SOBE_SIZE: u16 = 0x0006;
pub const PFX_LONG_ASCII_MSG: u16 = 0x0005;
pub const PFX_EXTD_PEDTHR_LIST: u16 = 0x0004;
pub const PFX_NULL_CONTENT: u16 = 0x0000;

pub const SRC_TYPE_FRONT_END: u16 = 0;
pub const SRC_TYPE_BACK_END: u16 = 1;

pub const PEDTHR_LIST_SIZE_AGET: u16 = 72;
pub const PEDTHR_LIST_SIZE_AFTER: u16 = 79;

/// Size of a token in bytes
pub const TOKEN_SIZE: u64 = 2;
/// Start of event marker + 3 timestamp words + 2 event number words
pub const START_OF_EVENT_TOKENS: u64 = 6;

// Detector specific dead/guard channels. These carry no signal on the readout
// cards and are dropped when events are built. Values come from the detector
// group and have not been checked against hardware documentation.
pub const EXCLUDED_CHANNELS: [usize; 4] = [15, 28, 53, 66];
pub const MIN_VALID_CHANNEL: u16 = 3;
pub const MAX_VALID_CHANNEL: u16 = 78;

// Bank container (.mid) format
pub const MIDAS_EVENT_HEADER_SIZE: usize = 16;
pub const MIDAS_BANK_HEADER_SIZE: usize = 8;
pub const MIDAS_BANK_FLAG_32BIT: u32 = 1 << 4;
pub const MIDAS_BANK_FLAG_32BIT_ALIGNED: u32 = 1 << 5;
/// Flags written by `MidasEvent::init`: 32-bit banks with the reserved padding word
pub const MIDAS_DEFAULT_BANK_FLAGS: u32 = 0x0000_0031;
pub const MIDAS_BANK_NAME_LENGTH: usize = 4;
pub const MIDAS_MIN_EVENT_CAPACITY: usize = 1024;
/// Larger declared payloads are treated as corruption
pub const MIDAS_MAX_EVENT_SIZE: usize = 512 * 1024 * 1024;
pub const MIDAS_BOR_EVENT_ID: u16 = 0x8000;
pub const MIDAS_EOR_EVENT_ID: u16 = 0x8001;
pub const MIDAS_MESSAGE_EVENT_ID: u16 = 0x8002;
pub const MIDAS_MAGIC: u16 = 0x494D;
pub const MIDAS_TID_FIRST: u32 = 1;
pub const MIDAS_TID_LAST: u32 = 19;
pub const MIDAS_TID_UINT8: u32 = 1;
pub const MIDAS_TID_UINT16: u32 = 4;
pub const MIDAS_TID_UINT32: u32 = 6;

// Bank container wire format, variant 1 (explicit per waveform arrays)
pub const BANK_EVENT_COUNTER: &str = "COUN";
pub const BANK_TIME_MSB: &str = "TMSB";
pub const BANK_TIME_MID: &str = "TMID";
pub const BANK_TIME_LSB: &str = "TLSB";
pub const BANK_N_WAVEFORMS: &str = "NWAV";
pub const BANK_WAVEFORMS: &str = "WAVE";
pub const BANK_N_ADC: &str = "NADC";
pub const BANK_CARD: &str = "FEMC";
pub const BANK_CHIP: &str = "CHIP";
pub const BANK_CHANNEL: &str = "CHAN";
pub const BANK_TIME_BIN: &str = "TBIN";
// Variant 2 (packed channel id)
pub const BANK_CHANNEL_ID: &str = "CHID";
pub const BANK_TIME_MIN: &str = "TMIN";
pub const BANK_TIME_MAX: &str = "TMAX";

// Tracker companion file
pub const TRACKER_POSITIONS: usize = 8;
pub const TRACKER_FILLER_COLUMNS: usize = 62;
/// Written in place of a position the tracker did not measure
pub const TRACKER_MISSING_VALUE: f32 = -999.0;

use std::io::Write;

use super::channel_id::ChannelId;
use super::constants::*;
use super::item::{ChipFamily, FrameKind, Timestamp};
use super::raw_event::RawEvent;

/// TokenWriter assembles a token stream, the inverse of the token decoder.
///
/// Used to produce test data and to re-encode events read from other containers.
#[derive(Debug, Clone, Default)]
pub struct TokenWriter {
    tokens: Vec<u16>,
    event_start: Option<usize>,
}

impl TokenWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[u16] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Append a token as is
    pub fn raw(&mut self, token: u16) -> &mut Self {
        self.tokens.push(token);
        self
    }

    pub fn null(&mut self) -> &mut Self {
        self.raw(PFX_NULL_CONTENT)
    }

    pub fn start_of_event(
        &mut self,
        event_type: u16,
        source_type: u16,
        source_id: u16,
        timestamp: Timestamp,
        event_number: u32,
    ) -> &mut Self {
        self.event_start = Some(self.tokens.len());
        self.raw(
            PFX_START_OF_EVENT
                | ((event_type & 0x3) << 6)
                | ((source_type & 0x1) << 5)
                | (source_id & 0x1F),
        )
        .raw(timestamp.lsb)
        .raw(timestamp.mid)
        .raw(timestamp.msb)
        .raw((event_number & 0xFFFF) as u16)
        .raw((event_number >> 16) as u16)
    }

    /// End of event whose declared size covers every token since the last start of event
    pub fn end_of_event(&mut self, source_type: u16, source_id: u16) -> &mut Self {
        let start = self.event_start.unwrap_or(0);
        // Four tokens for this record
        let size = (self.tokens.len() - start + 4) as u64 * TOKEN_SIZE;
        self.end_of_event_sized(source_type, source_id, size as u32)
    }

    pub fn end_of_event_sized(&mut self, source_type: u16, source_id: u16, size: u32) -> &mut Self {
        self.event_start = None;
        self.raw(PFX_END_OF_EVENT | ((source_type & 0x1) << 5) | (source_id & 0x1F))
            .raw(0)
            .raw((size & 0xFFFF) as u16)
            .raw((size >> 16) as u16)
    }

    pub fn channel_hit_header(&mut self, channel: ChannelId) -> &mut Self {
        self.raw(channel.to_hit_header())
    }

    pub fn extended_channel_hit_header(&mut self, channel: ChannelId) -> &mut Self {
        self.raw(PFX_EXTD_CARD_CHIP_CHAN_HIT_IX)
            .raw(channel.to_extended())
    }

    pub fn time_bin(&mut self, bin: u16) -> &mut Self {
        self.raw(PFX_TIME_BIN_IX | (bin & 0x01FF))
    }

    pub fn adc_sample(&mut self, value: u16) -> &mut Self {
        self.raw(PFX_ADC_SAMPLE | (value & 0x0FFF))
    }

    pub fn chip_channel_hit_count(&mut self, chip: u16, count: u16) -> &mut Self {
        self.raw(PFX_CHIP_CHAN_HIT_CNT | ((chip & 0x3) << 7) | (count & 0x7F))
    }

    pub fn last_cell_read(&mut self, chip: u16, cell: u16) -> &mut Self {
        self.raw(PFX_CHIP_LAST_CELL_READ | ((chip & 0x3) << 9) | (cell & 0x01FF))
    }

    fn message_body(&mut self, bytes: &[u8]) -> &mut Self {
        for pair in bytes.chunks(2) {
            let low = pair[0] as u16;
            let high = pair.get(1).copied().unwrap_or(0) as u16;
            self.tokens.push(low | (high << 8));
        }
        self
    }

    /// Message of at most 255 bytes; longer text is cut
    pub fn short_message(&mut self, text: &str) -> &mut Self {
        let bytes = &text.as_bytes()[..text.len().min(0xFF)];
        self.raw(PFX_ASCII_MSG_LEN | bytes.len() as u16)
            .message_body(bytes)
    }

    pub fn long_message(&mut self, text: &str) -> &mut Self {
        let bytes = &text.as_bytes()[..text.len().min(0xFFFF)];
        self.raw(PFX_LONG_ASCII_MSG)
            .raw(bytes.len() as u16)
            .message_body(bytes)
    }

    pub fn frame(
        &mut self,
        kind: FrameKind,
        version: u16,
        source_type: u16,
        source_id: u16,
        length: u16,
    ) -> &mut Self {
        let prefix = match kind {
            FrameKind::Data => PFX_START_OF_DFRAME,
            FrameKind::Monitoring => PFX_START_OF_MFRAME,
            FrameKind::Configuration => PFX_START_OF_CFRAME,
        };
        self.raw(prefix | ((version & 0x7) << 6) | ((source_type & 0x1) << 5) | (source_id & 0x1F))
            .raw(length)
    }

    pub fn end_of_frame(&mut self) -> &mut Self {
        self.raw(PFX_END_OF_FRAME)
    }

    pub fn frame_sequence_number(&mut self, number: u16) -> &mut Self {
        self.raw(PFX_FRAME_SEQ_NB | (number & 0x01FF))
    }

    pub fn pedestal_histogram(&mut self, channel: ChannelId, mean: u32, std_dev: u32) -> &mut Self {
        self.raw(PFX_EXTD_CARD_CHIP_CHAN_H_MD)
            .raw(channel.to_extended())
            .raw((mean & 0xFFFF) as u16)
            .raw((mean >> 16) as u16)
            .raw((std_dev & 0xFFFF) as u16)
            .raw((std_dev >> 16) as u16)
    }

    /// Pedestal correction (`threshold == false`) or zero-suppression threshold list for one
    /// chip. Only as many values as the chip family has channels are written.
    pub fn pedestal_threshold_list(
        &mut self,
        threshold: bool,
        family: ChipFamily,
        card: u16,
        chip: u16,
        values: &[u16],
    ) -> &mut Self {
        let mode = match family {
            ChipFamily::Aget => 0,
            ChipFamily::After => 1,
        };
        let header = (threshold as u16) | (mode << 1) | ((chip & 0xF) << 2) | ((card & 0x1F) << 6);
        self.raw(PFX_EXTD_PEDTHR_LIST).raw(header);
        for value in values.iter().take(family.list_size() as usize) {
            self.tokens.push(*value);
        }
        self
    }

    pub fn start_of_built_event(&mut self) -> &mut Self {
        self.raw(PFX_START_OF_BUILT_EVENT)
    }

    pub fn end_of_built_event(&mut self) -> &mut Self {
        self.raw(PFX_END_OF_BUILT_EVENT)
    }

    /// Encode a complete event as a back-end record. Each hit is written as a header, a
    /// time bin index and its dense waveform.
    pub fn event(&mut self, event: &RawEvent) -> &mut Self {
        self.start_of_event(0, SRC_TYPE_BACK_END, 0, event.timestamp, event.event_number);
        for hit in event.hits.iter() {
            self.channel_hit_header(hit.channel)
                .time_bin(hit.first_time_bin);
            for value in hit.waveform.iter() {
                self.adc_sample(*value);
            }
        }
        self.end_of_event(SRC_TYPE_BACK_END, 0)
    }

    /// Little-endian byte image of the stream
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.tokens.len() * TOKEN_SIZE as usize);
        for token in self.tokens.iter() {
            bytes.extend_from_slice(&token.to_le_bytes());
        }
        bytes
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_all(&self.to_bytes())
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.event_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_size() {
        let mut writer = TokenWriter::new();
        writer
            .start_of_event(0, SRC_TYPE_BACK_END, 0, Timestamp::default(), 1)
            .adc_sample(10)
            .end_of_event(SRC_TYPE_BACK_END, 0);
        let tokens = writer.tokens();
        assert_eq!(tokens.len(), 11);
        // 11 tokens of 2 bytes
        assert_eq!(tokens[9], 22);
        assert_eq!(tokens[10], 0);
    }

    #[test]
    fn test_message_padding() {
        let mut writer = TokenWriter::new();
        writer.short_message("abc");
        assert_eq!(
            writer.tokens(),
            &[PFX_ASCII_MSG_LEN | 3, u16::from_le_bytes(*b"ab"), b'c' as u16]
        );
    }

    #[test]
    fn test_bytes_little_endian() {
        let mut writer = TokenWriter::new();
        writer.raw(0x1234).raw(0xABCD);
        assert_eq!(writer.to_bytes(), vec![0x34, 0x12, 0xCD, 0xAB]);
        let mut sink = Vec::new();
        writer.write_to(&mut sink).unwrap();
        assert_eq!(sink, writer.to_bytes());
    }
}

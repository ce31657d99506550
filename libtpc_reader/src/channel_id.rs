use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// ChannelId is the hashable hardware address of one readout channel.
///
/// Hits are merged on structural equality of the (card, chip, channel) triple.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChannelId {
    pub card: u16,
    pub chip: u16,
    pub channel: u16,
}

impl ChannelId {
    pub fn new(card: u16, chip: u16, channel: u16) -> Self {
        Self {
            card,
            chip,
            channel,
        }
    }

    /// Basic channel hit header token: card in bits 9-13, chip in bits 7-8, channel in bits 0-6
    pub fn from_hit_header(token: u16) -> Self {
        Self {
            card: (token & 0x3E00) >> 9,
            chip: (token & 0x0180) >> 7,
            channel: token & 0x007F,
        }
    }

    /// Extended card/chip/channel word: card in bits 11-15, chip in bits 7-10, channel in bits 0-6
    pub fn from_extended(word: u16) -> Self {
        Self {
            card: (word & 0xF800) >> 11,
            chip: (word & 0x0780) >> 7,
            channel: word & 0x007F,
        }
    }

    /// Packed channel id of the bank container format: channel in bits 0-6, chip in bits
    /// 7-10, card in bits 11-13. Bits 14-15 are ignored.
    pub fn from_packed(word: u16) -> Self {
        let bits = word.view_bits::<Lsb0>();
        Self {
            card: bits[11..14].load_le::<u16>(),
            chip: bits[7..11].load_le::<u16>(),
            channel: bits[0..7].load_le::<u16>(),
        }
    }

    /// Inverse of [`ChannelId::from_packed`]
    pub fn to_packed(&self) -> u16 {
        let mut word = 0u16;
        let bits = word.view_bits_mut::<Lsb0>();
        bits[11..14].store_le(self.card);
        bits[7..11].store_le(self.chip);
        bits[0..7].store_le(self.channel);
        word
    }

    /// Inverse of [`ChannelId::from_hit_header`], prefix included
    pub fn to_hit_header(&self) -> u16 {
        0xC000 | ((self.card & 0x1F) << 9) | ((self.chip & 0x3) << 7) | (self.channel & 0x7F)
    }

    /// Inverse of [`ChannelId::from_extended`]
    pub fn to_extended(&self) -> u16 {
        ((self.card & 0x1F) << 11) | ((self.chip & 0xF) << 7) | (self.channel & 0x7F)
    }

    /// Unique key for this address, as used by the detector software
    pub fn key(&self) -> u32 {
        generate_key(self.card, self.chip, self.channel)
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Card {:02} Chip {:02} Channel {:02}",
            self.card, self.chip, self.channel
        )
    }
}

/// Generate a unique key for a given hardware location
pub fn generate_key(card: u16, chip: u16, channel: u16) -> u32 {
    (card as u32) * 16 * 80 + (chip as u32) * 80 + channel as u32
}

use bit_set::BitSet;
use fxhash::FxHashMap;

use super::channel_id::ChannelId;
use super::constants::{EXCLUDED_CHANNELS, MAX_VALID_CHANNEL, MIN_VALID_CHANNEL};
use super::item::Timestamp;
use super::raw_event::{RawEvent, RawHit};

/// EventBuilder takes individual samples and composes them into a RawEvent.
///
/// Samples are merged per channel address, so samples of one channel interleaved with
/// samples of other channels still end up in a single hit. Channels which never carry
/// signal on this detector (a fixed exclusion list plus guard channels outside the valid
/// range) are dropped on entry.
#[derive(Debug)]
pub struct EventBuilder {
    current: Option<RawEvent>,
    hits: FxHashMap<ChannelId, RawHit>,
    excluded: BitSet,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBuilder {
    pub fn new() -> Self {
        let mut excluded = BitSet::new();
        for channel in EXCLUDED_CHANNELS {
            excluded.insert(channel);
        }
        Self {
            current: None,
            hits: FxHashMap::default(),
            excluded,
        }
    }

    /// Begin a new event, discarding anything collected for a previous unfinished one
    pub fn start_event(&mut self, id: usize, event_number: u32) {
        self.hits.clear();
        self.current = Some(RawEvent::new(id, event_number));
    }

    pub fn is_building(&self) -> bool {
        self.current.is_some()
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        if let Some(event) = self.current.as_mut() {
            event.timestamp = timestamp;
        }
    }

    /// Flag the event under construction as inconsistent. The first reason is kept.
    pub fn set_error(&mut self, reason: &str) {
        if let Some(event) = self.current.as_mut() {
            if event.error.is_none() {
                event.error = Some(reason.to_string());
            }
        }
    }

    /// Check a channel against the exclusion list and the valid channel range
    pub fn accepts(&self, channel: &ChannelId) -> bool {
        channel.channel >= MIN_VALID_CHANNEL
            && channel.channel <= MAX_VALID_CHANNEL
            && !self.excluded.contains(channel.channel as usize)
    }

    /// Add one sample to the event. Returns false if the sample was dropped, either by the
    /// channel filter or because the time bin lies before the start of the buffer.
    pub fn add_sample(&mut self, channel: ChannelId, time_bin: i32, value: u16) -> bool {
        if self.current.is_none() || !self.accepts(&channel) {
            return false;
        }
        let time_bin = match u16::try_from(time_bin) {
            Ok(bin) => bin,
            Err(_) => return false,
        };
        self.hits
            .entry(channel)
            .or_insert_with(|| RawHit::new(channel))
            .set_sample(time_bin, value);
        true
    }

    /// Add a whole waveform starting at the given time bin
    pub fn add_waveform(&mut self, channel: ChannelId, first_time_bin: u16, waveform: &[u16]) -> bool {
        if self.current.is_none() || !self.accepts(&channel) {
            return false;
        }
        let hit = self
            .hits
            .entry(channel)
            .or_insert_with(|| RawHit::new(channel));
        for (i, value) in waveform.iter().enumerate() {
            hit.set_sample(first_time_bin.saturating_add(i as u16), *value);
        }
        true
    }

    /// Take the completed event. Hits are ordered by channel key.
    ///
    /// Returns None if no event was started.
    pub fn build(&mut self) -> Option<RawEvent> {
        let mut event = self.current.take()?;
        let mut hits: Vec<RawHit> = self.hits.drain().map(|(_, hit)| hit).collect();
        hits.sort_by_key(|hit| hit.channel.key());
        event.hits = hits;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_interleaved_samples() {
        let a = ChannelId::new(0, 1, 10);
        let b = ChannelId::new(0, 1, 11);
        let mut builder = EventBuilder::new();
        builder.start_event(0, 5);
        assert!(builder.add_sample(a, 20, 123));
        assert!(builder.add_sample(b, 20, 50));
        assert!(builder.add_sample(a, 21, 124));
        let event = builder.build().unwrap();
        assert_eq!(event.event_number, 5);
        assert_eq!(event.hits.len(), 2);
        assert_eq!(event.hits[0].channel, a);
        assert_eq!(event.hits[0].waveform, vec![123, 124]);
        assert_eq!(event.hits[1].waveform, vec![50]);
        assert!(builder.build().is_none());
    }

    #[test]
    fn test_channel_filter() {
        let mut builder = EventBuilder::new();
        builder.start_event(0, 1);
        for channel in [0, 2, 15, 28, 53, 66, 79, 100] {
            assert!(!builder.add_sample(ChannelId::new(0, 0, channel), 0, 1));
        }
        assert!(builder.add_sample(ChannelId::new(0, 0, 3), 0, 1));
        assert!(builder.add_sample(ChannelId::new(0, 0, 78), 0, 1));
        assert!(!builder.add_sample(ChannelId::new(0, 0, 40), -1, 1));
        assert_eq!(builder.build().unwrap().hits.len(), 2);
    }

    #[test]
    fn test_error_keeps_first_reason() {
        let mut builder = EventBuilder::new();
        builder.start_event(3, 9);
        builder.set_error("first");
        builder.set_error("second");
        let event = builder.build().unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.error.as_deref(), Some("first"));
    }
}

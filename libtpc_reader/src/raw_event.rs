use serde::Serialize;

use super::channel_id::ChannelId;
use super::item::Timestamp;

/// RawHit is the waveform of one channel within one event.
///
/// The waveform is dense: `waveform[i]` is the amplitude at time bin `first_time_bin + i`.
/// Bins which were never written inside the covered range read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawHit {
    pub channel: ChannelId,
    pub first_time_bin: u16,
    pub waveform: Vec<u16>,
}

impl RawHit {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            first_time_bin: 0,
            waveform: Vec::new(),
        }
    }

    /// Write the amplitude at a time bin, growing the covered range in either direction
    pub fn set_sample(&mut self, time_bin: u16, value: u16) {
        if self.waveform.is_empty() {
            self.first_time_bin = time_bin;
            self.waveform.push(value);
            return;
        }

        if time_bin < self.first_time_bin {
            let shift = (self.first_time_bin - time_bin) as usize;
            let mut grown = vec![0; shift];
            grown[0] = value;
            grown.extend_from_slice(&self.waveform);
            self.waveform = grown;
            self.first_time_bin = time_bin;
            return;
        }

        let position = (time_bin - self.first_time_bin) as usize;
        if position >= self.waveform.len() {
            self.waveform.resize(position + 1, 0);
        }
        self.waveform[position] = value;
    }

    /// Amplitude at a time bin, zero outside the covered range
    pub fn amplitude_at(&self, time_bin: u16) -> u16 {
        if time_bin < self.first_time_bin {
            return 0;
        }
        self.waveform
            .get((time_bin - self.first_time_bin) as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Iterate over (time bin, amplitude) pairs in time order. Samples past the last
    /// representable time bin are not reported.
    pub fn samples(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        let first = self.first_time_bin as usize;
        self.waveform
            .iter()
            .enumerate()
            .map_while(move |(i, value)| {
                u16::try_from(first + i).ok().map(|bin| (bin, *value))
            })
    }

    /// Last covered time bin, clamped to the largest representable one
    pub fn last_time_bin(&self) -> Option<u16> {
        let len = self.waveform.len();
        if len == 0 {
            return None;
        }
        let last = self.first_time_bin as usize + len - 1;
        Some(u16::try_from(last).unwrap_or(u16::MAX))
    }
}

/// RawEvent is a single decoded detector event, owned by the caller.
///
/// Hits are ordered by channel key. When `error` is set the event was read from an
/// inconsistent record; what could be recovered is still present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RawEvent {
    /// Position of the event in its source
    pub id: usize,
    pub event_number: u32,
    pub timestamp: Timestamp,
    pub hits: Vec<RawHit>,
    pub error: Option<String>,
}

impl RawEvent {
    pub fn new(id: usize, event_number: u32) -> Self {
        Self {
            id,
            event_number,
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn find_hit(&self, channel: &ChannelId) -> Option<&RawHit> {
        self.hits.iter().find(|hit| hit.channel == *channel)
    }

    /// Total number of samples over all hits
    pub fn sample_count(&self) -> usize {
        self.hits.iter().map(|hit| hit.waveform.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_waveform() {
        let mut hit = RawHit::new(ChannelId::new(0, 1, 10));
        hit.set_sample(20, 123);
        assert_eq!(hit.first_time_bin, 20);
        assert_eq!(hit.waveform, vec![123]);

        hit.set_sample(23, 5);
        assert_eq!(hit.waveform, vec![123, 0, 0, 5]);

        hit.set_sample(18, 7);
        assert_eq!(hit.first_time_bin, 18);
        assert_eq!(hit.waveform, vec![7, 0, 123, 0, 0, 5]);

        hit.set_sample(19, 9);
        assert_eq!(hit.amplitude_at(19), 9);
        assert_eq!(hit.amplitude_at(17), 0);
        assert_eq!(hit.amplitude_at(100), 0);
        assert_eq!(hit.last_time_bin(), Some(23));

        let pairs: Vec<(u16, u16)> = hit.samples().collect();
        assert_eq!(pairs[0], (18, 7));
        assert_eq!(pairs[5], (23, 5));
    }

    #[test]
    fn test_time_bin_range_limits() {
        let mut hit = RawHit::new(ChannelId::new(0, 1, 10));
        hit.set_sample(0, 1);
        hit.set_sample(u16::MAX, 2);
        assert_eq!(hit.waveform.len(), u16::MAX as usize + 1);
        assert_eq!(hit.last_time_bin(), Some(u16::MAX));
        assert_eq!(hit.samples().count(), u16::MAX as usize + 1);
        assert_eq!(hit.samples().last(), Some((u16::MAX, 2)));

        // A waveform running past the last time bin is cut off, not wrapped
        let hit = RawHit {
            channel: ChannelId::new(0, 1, 11),
            first_time_bin: u16::MAX - 1,
            waveform: vec![3, 4, 5, 6],
        };
        assert_eq!(hit.last_time_bin(), Some(u16::MAX));
        let pairs: Vec<(u16, u16)> = hit.samples().collect();
        assert_eq!(pairs, vec![(u16::MAX - 1, 3), (u16::MAX, 4)]);
    }
}

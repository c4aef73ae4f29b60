use crate::core::radiometric::{apply_normalization_and_tvg, GainParams};
use crate::types::{PingLine, WaterfallResult};

/// Provider of decoded sidescan pings
///
/// Implementations apply the requested gain parameters before handing lines out.
pub trait PingSource: Send + Sync {
    /// Pings of `subsystem_id` with `start_ts < timestamp <= end_ts`, oldest first
    fn get_lines_between(
        &self,
        start_ts: i64,
        end_ts: i64,
        subsystem_id: u32,
        params: &GainParams,
    ) -> WaterfallResult<Vec<PingLine>>;

    fn first_ping_timestamp(&self) -> Option<i64>;

    fn last_ping_timestamp(&self) -> Option<i64>;

    fn subsystem_ids(&self) -> Vec<u32>;
}

/// In-memory ping source, mostly for replay and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryPingSource {
    pings: Vec<PingLine>,
}

impl MemoryPingSource {
    pub fn new(mut pings: Vec<PingLine>) -> Self {
        pings.sort_by_key(|p| p.timestamp_ms);
        log::info!("Loaded {} pings into memory source", pings.len());
        Self { pings }
    }

    /// Append a ping, keeping timestamp order
    pub fn push(&mut self, ping: PingLine) {
        let at = self.pings.partition_point(|p| p.timestamp_ms <= ping.timestamp_ms);
        self.pings.insert(at, ping);
    }

    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }
}

impl PingSource for MemoryPingSource {
    fn get_lines_between(
        &self,
        start_ts: i64,
        end_ts: i64,
        subsystem_id: u32,
        params: &GainParams,
    ) -> WaterfallResult<Vec<PingLine>> {
        let from = self.pings.partition_point(|p| p.timestamp_ms <= start_ts);
        let to = self.pings.partition_point(|p| p.timestamp_ms <= end_ts);
        if from >= to {
            return Ok(Vec::new());
        }

        let lines = self.pings[from..to]
            .iter()
            .filter(|p| p.subsystem_id == subsystem_id)
            .map(|p| {
                let mut line = p.clone();
                line.samples = apply_normalization_and_tvg(&p.samples, params);
                line
            })
            .collect();
        Ok(lines)
    }

    fn first_ping_timestamp(&self) -> Option<i64> {
        self.pings.first().map(|p| p.timestamp_ms)
    }

    fn last_ping_timestamp(&self) -> Option<i64> {
        self.pings.last().map(|p| p.timestamp_ms)
    }

    fn subsystem_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.pings.iter().map(|p| p.subsystem_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NavState;

    fn ping(ts: i64, subsystem: u32) -> PingLine {
        PingLine::new(ts, subsystem, 15.0, vec![0.3; 32], NavState::default())
    }

    #[test]
    fn test_window_is_open_at_start() {
        let source = MemoryPingSource::new(vec![ping(300, 0), ping(100, 0), ping(200, 0), ping(200, 1)]);
        assert_eq!(source.first_ping_timestamp(), Some(100));
        assert_eq!(source.last_ping_timestamp(), Some(300));
        assert_eq!(source.subsystem_ids(), vec![0, 1]);

        let lines = source.get_lines_between(100, 300, 0, &GainParams::default()).unwrap();
        let ts: Vec<i64> = lines.iter().map(|l| l.timestamp_ms).collect();
        assert_eq!(ts, vec![200, 300]);
    }

    #[test]
    fn test_gain_is_applied_to_copies() {
        let mut source = MemoryPingSource::default();
        source.push(ping(10, 0));
        let lines = source
            .get_lines_between(0, 10, 0, &GainParams::histogram_default())
            .unwrap();
        assert!(lines[0].samples.iter().all(|&v| (v - 1.0).abs() < 1e-12));
        assert_eq!(source.pings[0].samples[0], 0.3);
    }
}

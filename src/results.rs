//! Interval samples and final test results (C6 aggregation).
//!
//! `IntervalResult` is created once per reporting-interval boundary and
//! never mutated; `TestResult` is built once, at test completion, from the
//! full ordered list of intervals collected along the way.

use crate::config::{Protocol, TestConfiguration};
use serde::{Deserialize, Serialize};

/// TCP-specific interval/aggregate fields. Congestion window and
/// retransmit counts are optional/absent-ok per spec (no vendor-stat
/// parity requirement).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpStats {
    pub retransmits: Option<u64>,
    pub congestion_window: Option<u64>,
}

/// UDP-specific interval/aggregate fields. Populated by the data-model
/// hooks only; the engine does not drive a UDP transfer loop yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdpStats {
    pub jitter_ms: Option<f64>,
    pub packets: Option<u64>,
    pub lost_packets: Option<u64>,
    pub out_of_order_packets: Option<u64>,
}

/// One reporting-interval sample, for one stream (`stream_id >= 0`) or the
/// cross-stream aggregate (`stream_id == -1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalResult {
    pub stream_id: i32,
    pub start_time: f64,
    pub end_time: f64,
    pub bytes_transferred: u64,
    pub bits_per_second: f64,
    pub tcp: Option<TcpStats>,
    pub udp: Option<UdpStats>,
}

impl IntervalResult {
    /// Build a sample from a byte count observed over `[start_time,
    /// end_time)` seconds, deriving `bits_per_second`.
    pub fn new(stream_id: i32, start_time: f64, end_time: f64, bytes_transferred: u64) -> Self {
        let duration = (end_time - start_time).max(f64::EPSILON);
        let bits_per_second = (bytes_transferred as f64 * 8.0) / duration;
        Self {
            stream_id,
            start_time,
            end_time,
            bytes_transferred,
            bits_per_second,
            tcp: None,
            udp: None,
        }
    }
}

/// Final result for a completed, cancelled, or errored test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub server_host: String,
    pub server_port: u16,
    pub protocol: Protocol,
    pub reverse: bool,
    pub num_streams: u32,
    pub total_bytes: u64,
    pub duration_ms: u64,
    pub avg_bandwidth_bps: f64,
    pub min_bandwidth_bps: f64,
    pub max_bandwidth_bps: f64,
    pub tcp: Option<TcpStats>,
    pub udp: Option<UdpStats>,
    /// 0-100; populated by an external collaborator, 0 if none supplied.
    pub quality_score: u8,
    pub intervals: Vec<IntervalResult>,
    pub raw_json: Option<serde_json::Value>,
}

/// Aggregate a completed (or partial, on cancel/error) list of samples
/// into a [`TestResult`], per spec §4.6.
///
/// `duration_ms` falls back to the configured duration when `samples` is
/// empty (nothing was ever observed, e.g. cancellation before the first
/// interval boundary).
pub fn aggregate(config: &TestConfiguration, samples: Vec<IntervalResult>) -> TestResult {
    let total_bytes: u64 = samples.iter().map(|s| s.bytes_transferred).sum();

    let (avg_bandwidth_bps, min_bandwidth_bps, max_bandwidth_bps) = if samples.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let sum: f64 = samples.iter().map(|s| s.bits_per_second).sum();
        let avg = sum / samples.len() as f64;
        let min = samples
            .iter()
            .map(|s| s.bits_per_second)
            .fold(f64::INFINITY, f64::min);
        let max = samples
            .iter()
            .map(|s| s.bits_per_second)
            .fold(f64::NEG_INFINITY, f64::max);
        (avg, min, max)
    };

    let duration_ms = if samples.is_empty() {
        config.duration_ms
    } else {
        let min_start = samples
            .iter()
            .map(|s| s.start_time)
            .fold(f64::INFINITY, f64::min);
        let max_end = samples
            .iter()
            .map(|s| s.end_time)
            .fold(f64::NEG_INFINITY, f64::max);
        ((max_end - min_start) * 1000.0).round().max(0.0) as u64
    };

    TestResult {
        server_host: config.server_host.clone(),
        server_port: config.server_port,
        protocol: config.protocol,
        reverse: config.reverse,
        num_streams: config.num_streams,
        total_bytes,
        duration_ms,
        avg_bandwidth_bps,
        min_bandwidth_bps,
        max_bandwidth_bps,
        tcp: None,
        udp: None,
        quality_score: 0,
        intervals: samples,
        raw_json: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TestConfiguration {
        let mut c = TestConfiguration::new("127.0.0.1");
        c.duration_ms = 3000;
        c
    }

    #[test]
    fn interval_derives_bits_per_second() {
        let sample = IntervalResult::new(0, 0.0, 1.0, 125_000);
        assert_eq!(sample.bits_per_second, 1_000_000.0);
    }

    #[test]
    fn aggregate_sums_bytes_and_derives_bandwidth_bounds() {
        let samples = vec![
            IntervalResult::new(0, 0.0, 1.0, 100_000),
            IntervalResult::new(0, 1.0, 2.0, 200_000),
            IntervalResult::new(0, 2.0, 3.0, 150_000),
        ];
        let result = aggregate(&config(), samples);
        assert_eq!(result.total_bytes, 450_000);
        assert!(result.min_bandwidth_bps <= result.avg_bandwidth_bps);
        assert!(result.avg_bandwidth_bps <= result.max_bandwidth_bps);
        assert_eq!(result.duration_ms, 3000);
    }

    #[test]
    fn aggregate_with_no_samples_falls_back_to_configured_duration() {
        let result = aggregate(&config(), vec![]);
        assert_eq!(result.total_bytes, 0);
        assert_eq!(result.duration_ms, 3000);
        assert_eq!(result.avg_bandwidth_bps, 0.0);
    }

    #[test]
    fn intervals_are_preserved_in_emission_order() {
        let samples = vec![
            IntervalResult::new(0, 0.0, 1.0, 10),
            IntervalResult::new(0, 1.0, 2.0, 20),
        ];
        let result = aggregate(&config(), samples.clone());
        assert_eq!(result.intervals.len(), samples.len());
        assert_eq!(result.intervals[0].start_time, 0.0);
        assert_eq!(result.intervals[1].start_time, 1.0);
    }

    #[test]
    fn protocol_round_trips_through_json() {
        let json = serde_json::to_string(&Protocol::Tcp).unwrap();
        assert_eq!(json, "\"tcp\"");
        let back: Protocol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Protocol::Tcp);
    }
}

//! Wire state codes and JSON message shapes (C3).
//!
//! `State` values are the ground truth for wire compatibility with stock
//! `iperf3` and must not be renumbered.

use serde::{Deserialize, Serialize};

/// One byte sent on the control connection to move the session between
/// protocol phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum State {
    TestStart = 1,
    TestRunning = 2,
    TestEnd = 4,
    ParamExchange = 9,
    CreateStreams = 10,
    ServerTerminate = 11,
    ClientTerminate = 12,
    ExchangeResults = 13,
    DisplayResults = 14,
    IperfStart = 15,
    IperfDone = 16,
    AccessDenied = -1,
    ServerError = -2,
}

impl State {
    pub fn to_byte(self) -> i8 {
        self as i8
    }

    /// Parse a state byte read off the wire.
    ///
    /// Returns `None` for any value outside the known table; callers map
    /// that to the "unexpected protocol state" error per spec.
    pub fn from_byte(byte: i8) -> Option<Self> {
        Some(match byte {
            1 => State::TestStart,
            2 => State::TestRunning,
            4 => State::TestEnd,
            9 => State::ParamExchange,
            10 => State::CreateStreams,
            11 => State::ServerTerminate,
            12 => State::ClientTerminate,
            13 => State::ExchangeResults,
            14 => State::DisplayResults,
            15 => State::IperfStart,
            16 => State::IperfDone,
            -1 => State::AccessDenied,
            -2 => State::ServerError,
            _ => return None,
        })
    }
}

/// Parameters exchanged during `PARAM_EXCHANGE`. Field names are fixed by
/// the wire protocol and must match stock iperf3's JSON exactly. A zero
/// value signals "use default" for the numeric fields, matching upstream
/// behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParams {
    #[serde(default, skip_serializing_if = "is_false")]
    pub tcp: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub udp: bool,
    #[serde(default)]
    pub omit: u32,
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub num: u64,
    #[serde(default)]
    pub blockcount: u64,
    #[serde(rename = "MSS", default)]
    pub mss: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nodelay: bool,
    #[serde(default)]
    pub parallel: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reverse: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub bidirectional: bool,
    #[serde(default)]
    pub window: u32,
    #[serde(default)]
    pub len: u32,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub fqrate: u64,
    #[serde(default)]
    pub pacing_timer: u32,
    #[serde(default)]
    pub burst: u32,
    #[serde(rename = "TOS", default)]
    pub tos: u32,
    #[serde(default)]
    pub flowlabel: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion_used: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub get_server_output: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub udp_counters_64bit: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub repeating_payload: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub zerocopy: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dont_fragment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            tcp: false,
            udp: false,
            omit: 0,
            time: 10,
            num: 0,
            blockcount: 0,
            mss: 0,
            nodelay: false,
            parallel: 1,
            reverse: false,
            bidirectional: false,
            window: 0,
            len: 0,
            bandwidth: 0,
            fqrate: 0,
            pacing_timer: 0,
            burst: 0,
            tos: 0,
            flowlabel: 0,
            title: None,
            extra_data: None,
            congestion: None,
            congestion_used: None,
            get_server_output: false,
            udp_counters_64bit: false,
            repeating_payload: false,
            zerocopy: false,
            dont_fragment: false,
            client_version: None,
        }
    }
}

/// Peer-facing results document exchanged at `EXCHANGE_RESULTS`. This crate
/// only needs to parse it (tolerating malformed input) and produce a
/// minimally valid one of its own; `{}` is an acceptable value on either
/// side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IPerf3Results {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<serde_json::Value>,
    #[serde(default)]
    pub intervals: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IPerf3Results {
    /// Parse a peer's results document, falling back to an empty document
    /// on malformed JSON rather than failing the whole exchange (per the
    /// best-effort result-exchange policy).
    pub fn parse_or_empty(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_default()
    }
}

/// 12-byte UDP datagram header (seconds, microseconds, sequence) — data
/// model hook for the UDP extension point; not driven by the engine yet.
pub const UDP_HEADER_SIZE: usize = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips() {
        for state in [
            State::TestStart,
            State::TestRunning,
            State::TestEnd,
            State::ParamExchange,
            State::CreateStreams,
            State::ServerTerminate,
            State::ClientTerminate,
            State::ExchangeResults,
            State::DisplayResults,
            State::IperfStart,
            State::IperfDone,
            State::AccessDenied,
            State::ServerError,
        ] {
            assert_eq!(State::from_byte(state.to_byte()), Some(state));
        }
    }

    #[test]
    fn state_values_match_wire_table() {
        assert_eq!(State::TestStart.to_byte(), 1);
        assert_eq!(State::TestRunning.to_byte(), 2);
        assert_eq!(State::TestEnd.to_byte(), 4);
        assert_eq!(State::ParamExchange.to_byte(), 9);
        assert_eq!(State::CreateStreams.to_byte(), 10);
        assert_eq!(State::ServerTerminate.to_byte(), 11);
        assert_eq!(State::ClientTerminate.to_byte(), 12);
        assert_eq!(State::ExchangeResults.to_byte(), 13);
        assert_eq!(State::DisplayResults.to_byte(), 14);
        assert_eq!(State::IperfStart.to_byte(), 15);
        assert_eq!(State::IperfDone.to_byte(), 16);
        assert_eq!(State::AccessDenied.to_byte(), -1);
        assert_eq!(State::ServerError.to_byte(), -2);
    }

    #[test]
    fn unknown_byte_is_none() {
        assert_eq!(State::from_byte(7), None);
        assert_eq!(State::from_byte(100), None);
    }

    #[test]
    fn test_params_round_trips_through_json() {
        let params = TestParams {
            tcp: true,
            time: 5,
            parallel: 4,
            bandwidth: 10_000_000,
            reverse: true,
            client_version: Some("3.16".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: TestParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tcp, params.tcp);
        assert_eq!(back.time, params.time);
        assert_eq!(back.parallel, params.parallel);
        assert_eq!(back.bandwidth, params.bandwidth);
        assert_eq!(back.reverse, params.reverse);
        assert_eq!(back.client_version, params.client_version);
    }

    #[test]
    fn results_tolerates_empty_object() {
        let results = IPerf3Results::parse_or_empty(b"{}");
        assert!(results.intervals.is_empty());
        assert!(results.error.is_none());
    }

    #[test]
    fn results_tolerates_malformed_json() {
        let results = IPerf3Results::parse_or_empty(b"not json at all");
        assert!(results.intervals.is_empty());
    }
}

//! Driver statistics

use serde::{Deserialize, Serialize};

/// Counters accumulated by a running driver
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DriverStats {
    /// Commands written to the conduit
    pub requests_sent: u64,
    /// Responses matched to an outstanding command
    pub responses_matched: u64,
    /// Commands whose caller gave up waiting
    pub timeouts: u64,
    /// Responses that arrived after their caller timed out
    pub late_responses: u64,
    /// Frames the wire codec could not decode
    pub frame_errors: u64,
    /// Responses carrying a negative status
    pub protocol_errors: u64,
    /// Unsolicited events dispatched to subscribers
    pub events_dispatched: u64,
    /// Raw bytes written to the conduit
    pub bytes_sent: u64,
    /// Raw bytes read from the conduit
    pub bytes_received: u64,
}

impl DriverStats {
    pub fn record_request(&mut self, bytes: usize) {
        self.requests_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_response(&mut self) {
        self.responses_matched += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_late_response(&mut self) {
        self.late_responses += 1;
    }

    pub fn record_frame_error(&mut self) {
        self.frame_errors += 1;
    }

    pub fn record_protocol_error(&mut self) {
        self.protocol_errors += 1;
    }

    pub fn record_event(&mut self) {
        self.events_dispatched += 1;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }
}

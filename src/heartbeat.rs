use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FrameError;

/// Desired heartbeat rates in milliseconds, as carried by the `heart-beat`
/// header. `0` disables heartbeats in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often we promise to write something.
    pub send_ms: u32,
    /// How often we want the peer to write something.
    pub receive_ms: u32,
}

impl Heartbeat {
    pub const fn new(send_ms: u32, receive_ms: u32) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    pub const fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same rate in both directions.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
        Self::new(ms, ms)
    }

    pub fn is_disabled(&self) -> bool {
        self.send_ms == 0 && self.receive_ms == 0
    }
}

/// No heartbeats from us, and one every 3 seconds expected from the peer.
impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(0, 3000)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

impl FromStr for Heartbeat {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (send, receive) = parse_heartbeat_header(value)?;
        let send = u32::try_from(send).map_err(|_| FrameError::InvalidHeartbeatHeader)?;
        let receive = u32::try_from(receive).map_err(|_| FrameError::InvalidHeartbeatHeader)?;
        Ok(Self::new(send, receive))
    }
}

/// Parse a `heart-beat` header value (format: "cx,cy").
///
/// Both fields must be plain decimal numbers; anything else, including
/// surrounding whitespace, is an `InvalidHeartbeatHeader` error.
///
/// Returns `(cx, cy)` in milliseconds.
pub fn parse_heartbeat_header(header: &str) -> Result<(u64, u64), FrameError> {
    let (cx, cy) = header
        .split_once(',')
        .ok_or(FrameError::InvalidHeartbeatHeader)?;
    Ok((parse_rate(cx)?, parse_rate(cy)?))
}

fn parse_rate(value: &str) -> Result<u64, FrameError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidHeartbeatHeader);
    }
    value.parse().map_err(|_| FrameError::InvalidHeartbeatHeader)
}

/// Negotiate heartbeat intervals between the local side and its peer.
///
/// Parameters
/// - `local_out`: how often we want to send heartbeats (ms).
/// - `local_in`: how often we want to receive heartbeats (ms).
/// - `peer_out`: the peer's advertised sending interval (ms).
/// - `peer_in`: the peer's advertised receiving interval (ms).
///
/// Returns `(outgoing, incoming)`. A direction is `None` when either side
/// put `0` for it; otherwise it is the larger of the two values.
pub fn negotiate_heartbeats(
    local_out: u64,
    local_in: u64,
    peer_out: u64,
    peer_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    (negotiate(local_out, peer_in), negotiate(local_in, peer_out))
}

fn negotiate(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 {
        return None;
    }
    Some(Duration::from_millis(ours.max(theirs)))
}

//! Unit tests for heartbeat parsing and negotiation functions.

use stomp_session::error::FrameError;
use stomp_session::{negotiate_heartbeats, parse_heartbeat_header};
use std::time::Duration;

// =============================================================================
// parse_heartbeat_header tests
// =============================================================================

#[test]
fn parse_standard_heartbeat() {
    assert_eq!(parse_heartbeat_header("10000,10000").unwrap(), (10000, 10000));
}

#[test]
fn parse_zero_heartbeat() {
    assert_eq!(parse_heartbeat_header("0,0").unwrap(), (0, 0));
}

#[test]
fn parse_asymmetric_heartbeat() {
    assert_eq!(parse_heartbeat_header("5000,15000").unwrap(), (5000, 15000));
}

#[test]
fn parse_rejects_malformed_values() {
    for value in [
        "",
        "10000",
        "10000,",
        ",10000",
        " 10000,10000",
        "10000, 10000",
        "-1,0",
        "1.5,0",
        "a,b",
        "1,2,3",
    ] {
        assert!(
            matches!(parse_heartbeat_header(value), Err(FrameError::InvalidHeartbeatHeader)),
            "accepted {value:?}"
        );
    }
}

// =============================================================================
// negotiate_heartbeats tests
// =============================================================================

#[test]
fn negotiate_takes_larger_interval() {
    let (out, inc) = negotiate_heartbeats(1000, 3000, 2000, 2000);
    assert_eq!(out, Some(Duration::from_millis(2000)));
    assert_eq!(inc, Some(Duration::from_millis(3000)));
}

#[test]
fn negotiate_zero_on_either_side_disables() {
    let (out, inc) = negotiate_heartbeats(0, 3000, 2000, 2000);
    assert_eq!(out, None);
    assert_eq!(inc, Some(Duration::from_millis(3000)));

    let (out, inc) = negotiate_heartbeats(5000, 5000, 0, 0);
    assert_eq!(out, None);
    assert_eq!(inc, None);
}

#[test]
fn negotiate_connected_example() {
    // client offers 0,3000; server answers heart-beat:2000,2000
    let (out, inc) = negotiate_heartbeats(0, 3000, 2000, 2000);
    assert_eq!(out, None);
    assert_eq!(inc, Some(Duration::from_millis(3000)));
}

#[test]
fn negotiate_is_symmetric_in_directions() {
    let (out, inc) = negotiate_heartbeats(4000, 0, 0, 6000);
    assert_eq!(out, Some(Duration::from_millis(6000)));
    assert_eq!(inc, None);
}

//! Integration tests for the switch-matrix connection engine.
//!
//! Covers the connection contract end to end through the public API:
//! feasibility, exclusivity of relays, source and configuration channel
//! rules, virtual names and debounce waits.

use rust_ivi::switch::{ChannelConfig, PathCapability, PathConfig, SwitchMatrix, TopologyConfig};
use rust_ivi::SwitchError;
use std::time::Duration;

fn line_with_isolated_channel() -> SwitchMatrix {
    SwitchMatrix::new(&TopologyConfig::from_edges(
        &["CH1", "CH2", "CH3", "CH4"],
        &[("CH1", "CH2"), ("CH2", "CH3")],
    ))
    .unwrap()
}

fn crossbar() -> SwitchMatrix {
    // Two rows, two columns; every row joins every column.
    SwitchMatrix::new(&TopologyConfig::from_edges(
        &["R1", "R2", "C1", "C2"],
        &[("R1", "C1"), ("R1", "C2"), ("R2", "C1"), ("R2", "C2")],
    ))
    .unwrap()
}

#[test]
fn no_raw_route_is_unsupported_for_both_checks() {
    let matrix = line_with_isolated_channel();
    let expected = SwitchError::PathUnsupported {
        a: "CH1".into(),
        b: "CH4".into(),
    };
    assert_eq!(matrix.can_connect("CH1", "CH4").unwrap_err(), expected);
    assert_eq!(matrix.connect("CH1", "CH4").unwrap_err(), expected);
    assert_eq!(matrix.path_capability("CH1", "CH4"), PathCapability::Unsupported);
}

#[test]
fn documented_three_channel_scenario() {
    let matrix = line_with_isolated_channel();

    let path = matrix.connect("CH1", "CH3").unwrap();
    assert_eq!(path.channels(), ["CH1", "CH2", "CH3"]);

    assert!(matches!(
        matrix.connect("CH2", "CH4"),
        Err(SwitchError::PathUnsupported { .. })
    ));
    assert!(matches!(
        matrix.connect("CH1", "CH2"),
        Err(SwitchError::ResourceInUse { .. })
    ));
    assert_eq!(matrix.path_capability("CH1", "CH2"), PathCapability::ResourceInUse);
}

#[test]
fn connect_then_disconnect_restores_state() {
    let matrix = crossbar();
    matrix.connect("R1", "C1").unwrap();
    let before = matrix.connections();

    let path = matrix.connect("R2", "C2").unwrap();
    let released = matrix.disconnect("C2", "R2").unwrap();

    assert_eq!(path, released);
    assert_eq!(matrix.connections(), before);
    assert_eq!(matrix.path_capability("R2", "C2"), PathCapability::Available);
}

#[test]
fn double_connect_is_refused() {
    let matrix = crossbar();
    matrix.connect("R1", "C1").unwrap();

    assert_eq!(
        matrix.connect("C1", "R1").unwrap_err(),
        SwitchError::ExplicitConnectionExists {
            a: "C1".into(),
            b: "R1".into()
        }
    );
    assert_eq!(matrix.connection_count(), 1);
    assert_eq!(matrix.path_capability("R1", "C1"), PathCapability::Exists);
}

#[test]
fn two_source_endpoints_are_refused() {
    let matrix = crossbar();
    matrix.set_source_channel("R1", true).unwrap();
    matrix.set_source_channel("C1", true).unwrap();

    assert_eq!(
        matrix.connect("R1", "C1").unwrap_err(),
        SwitchError::AttemptToConnectSources {
            a: "R1".into(),
            b: "C1".into()
        }
    );
    assert_eq!(matrix.connection_count(), 0);
}

#[test]
fn disconnect_all_is_idempotent() {
    let matrix = crossbar();
    matrix.connect("R1", "C1").unwrap();
    matrix.connect("R2", "C2").unwrap();

    let released = matrix.disconnect_all();
    assert_eq!(released.len(), 2);
    assert_eq!(released[0].channels(), ["R1", "C1"]);
    assert!(matrix.connections().is_empty());

    assert!(matrix.disconnect_all().is_empty());
    assert!(matrix.connections().is_empty());
}

#[test]
fn routes_around_busy_relays() {
    let matrix = crossbar();
    // R1->C1 is taken, so R1..R2 has to go through C2.
    matrix.connect("R1", "C1").unwrap();
    let path = matrix.get_path("R1", "R2").unwrap();
    assert_eq!(path.channels(), ["R1", "C2", "R2"]);

    matrix.disconnect_all();
    // Both columns give two hops; the lower id wins.
    let path = matrix.connect("R1", "R2").unwrap();
    assert_eq!(path.channels(), ["R1", "C1", "R2"]);

    // Every relay touching C1 is now held.
    assert!(matches!(
        matrix.get_path("C2", "C1"),
        Err(SwitchError::PathNotFound { .. })
    ));
    assert!(matrix.can_connect("C2", "C1").is_ok());
    assert_eq!(matrix.path_capability("C2", "C1"), PathCapability::ResourceInUse);
}

#[test]
fn self_and_unknown_channels() {
    let matrix = crossbar();
    assert_eq!(
        matrix.connect("R1", "R1").unwrap_err(),
        SwitchError::CannotConnectToSelf {
            channel: "R1".into()
        }
    );
    assert_eq!(
        matrix.connect("R1", "X9").unwrap_err(),
        SwitchError::ChannelNotAvailable {
            channel: "X9".into()
        }
    );
    assert_eq!(matrix.path_capability("R1", "R1"), PathCapability::SelfConnection);
    assert_eq!(
        matrix.path_capability("R1", "X9"),
        PathCapability::ChannelNotAvailable
    );
}

#[test]
fn config_channels_route_but_never_terminate() {
    let matrix = SwitchMatrix::new(&TopologyConfig {
        channels: vec![
            ChannelConfig::new("A"),
            ChannelConfig::new("BUS").config_channel(),
            ChannelConfig::new("B"),
        ],
        paths: vec![PathConfig::new("A", "BUS"), PathConfig::new("BUS", "B")],
    })
    .unwrap();

    assert!(matches!(
        matrix.connect("A", "BUS"),
        Err(SwitchError::IsConfigChannel { .. })
    ));
    assert_eq!(matrix.path_capability("BUS", "B"), PathCapability::ConfigChannel);

    let path = matrix.connect("A", "B").unwrap();
    assert_eq!(path.channels(), ["A", "BUS", "B"]);
}

#[test]
fn virtual_names_alias_channels() {
    let matrix = SwitchMatrix::new(&TopologyConfig::from_edges(
        &["CH1", "CH2", "CH3"],
        &[("CH1", "CH2")],
    ))
    .unwrap();

    matrix.set_virtual_names(&["A", "B", "C"]).unwrap();
    let channel = matrix.channel("A").unwrap();
    assert_eq!(channel.id.index(), 0);
    assert_eq!(channel.display_name(), "A");

    assert!(matches!(
        matrix.set_virtual_names(&["X", "Y"]),
        Err(SwitchError::InvalidVirtualNames { .. })
    ));
    assert_eq!(matrix.channel("B").unwrap().name, "CH2");

    let path = matrix.connect("A", "B").unwrap();
    assert_eq!(path.channels(), ["CH1", "CH2"]);
    assert!(matrix.is_connected("CH1", "B").unwrap());
}

#[test]
fn channel_listing_and_ratings() {
    let matrix = SwitchMatrix::new(&TopologyConfig {
        channels: vec![
            ChannelConfig::new("HV").with_settling_time(Duration::from_millis(15)),
            ChannelConfig::new("LV"),
        ],
        paths: vec![PathConfig::new("HV", "LV")],
    })
    .unwrap();

    let channels = matrix.channels();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].name, "HV");
    assert_eq!(channels[0].settling_time(), Duration::from_millis(15));
    assert_eq!(channels[1].wire_mode(), 1);
    assert_eq!(matrix.channel_by_id(1).unwrap().name, "LV");
    assert!(matrix.channel_by_id(2).is_err());
}

#[tokio::test]
async fn debounce_wait_times_out_then_succeeds() {
    let matrix = SwitchMatrix::new(&TopologyConfig {
        channels: vec![
            ChannelConfig::new("CH1").with_settling_time(Duration::from_millis(60)),
            ChannelConfig::new("CH2").with_settling_time(Duration::from_millis(60)),
        ],
        paths: vec![PathConfig::new("CH1", "CH2")],
    })
    .unwrap();

    assert!(matrix.all_debounced());
    matrix.connect("CH1", "CH2").unwrap();
    assert!(!matrix.is_debounced("CH1").unwrap());
    assert!(!matrix.channel("CH2").unwrap().is_debounced());

    match matrix.wait_for_debounce(Duration::from_millis(10)).await {
        Err(SwitchError::Timeout { waited, pending }) => {
            assert_eq!(waited, Duration::from_millis(10));
            assert_eq!(pending, vec!["CH1".to_string(), "CH2".to_string()]);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    matrix
        .wait_for_debounce(Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matrix.all_debounced());
    assert!(matrix.is_debounced("CH1").unwrap());
}

#[tokio::test]
async fn debounce_wait_accepts_unbounded_limit() {
    let matrix = SwitchMatrix::new(&TopologyConfig {
        channels: vec![
            ChannelConfig::new("CH1").with_settling_time(Duration::from_millis(20)),
            ChannelConfig::new("CH2"),
        ],
        paths: vec![PathConfig::new("CH1", "CH2")],
    })
    .unwrap();

    matrix.connect("CH1", "CH2").unwrap();
    matrix.wait_for_debounce(Duration::MAX).await.unwrap();
    assert!(matrix.all_debounced());
}

#[test]
fn matrix_is_shareable_across_threads() {
    use std::sync::Arc;

    let matrix = Arc::new(crossbar());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let matrix = Arc::clone(&matrix);
            std::thread::spawn(move || matrix.connect("R1", "C1").is_ok())
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(matrix.connection_count(), 1);
}

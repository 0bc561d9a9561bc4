//! Host application tests: STATE publishing, command emission and the
//! subscription surface, against the mock transport.

mod common;

use std::sync::{Arc, Mutex};

use common::MockTransport;
use sparkplug_b::{Error, HostApplication, HostConfig, PayloadBuilder, StateMessage};

fn test_config() -> HostConfig {
    HostConfig::new("tcp://localhost:1883", "scada_client", "SCADA01")
}

fn connected_host() -> (HostApplication, MockTransport) {
    let mock = MockTransport::new();
    let host = HostApplication::with_transport(test_config(), Box::new(mock.clone()));
    host.connect().unwrap();
    (host, mock)
}

#[test]
fn connect_installs_no_will_and_publishes_nothing() {
    let (host, mock) = connected_host();
    assert!(host.is_connected());
    assert!(mock.last_will().is_none());
    assert!(mock.published().is_empty());
}

#[test]
fn state_birth_is_exact_json_retained_at_qos1() {
    let (host, mock) = connected_host();
    host.publish_state_birth(1_700_000_000_000).unwrap();

    let published = mock.published();
    assert_eq!(published.len(), 1);
    let message = &published[0];
    assert_eq!(message.topic, "STATE/SCADA01");
    assert_eq!(
        message.payload,
        br#"{"online":true,"timestamp":1700000000000}"#
    );
    assert_eq!(message.qos, 1);
    assert!(message.retain);
}

#[test]
fn state_death_is_exact_json_retained() {
    let (host, mock) = connected_host();
    host.publish_state_death(1_700_000_000_000).unwrap();

    let message = &mock.published()[0];
    assert_eq!(message.topic, "STATE/SCADA01");
    assert_eq!(
        message.payload,
        br#"{"online":false,"timestamp":1700000000000}"#
    );
    assert!(message.retain);
}

#[test]
fn state_json_round_trips_through_serde() {
    let state = StateMessage::birth(42);
    let bytes = serde_json::to_vec(&state).unwrap();
    assert_eq!(bytes, br#"{"online":true,"timestamp":42}"#);
    let back: StateMessage = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(back, state);
}

#[test]
fn node_command_renders_ncmd_topic_non_retained() {
    let (host, mock) = connected_host();

    let mut command = PayloadBuilder::new();
    command.add_node_control_rebirth();
    host.publish_node_command("Energy", "Gateway01", &command)
        .unwrap();

    let message = &mock.published()[0];
    assert_eq!(message.topic, "spBv1.0/Energy/NCMD/Gateway01");
    assert_eq!(message.qos, 1);
    assert!(!message.retain);
}

#[test]
fn device_command_renders_dcmd_topic() {
    let (host, mock) = connected_host();

    let mut command = PayloadBuilder::new();
    command.add_metric("SetPoint", 42.0f64);
    host.publish_device_command("Energy", "Gateway01", "Valve07", &command)
        .unwrap();

    let message = &mock.published()[0];
    assert_eq!(message.topic, "spBv1.0/Energy/DCMD/Gateway01/Valve07");
    assert!(!message.retain);
}

#[test]
fn operations_require_connection() {
    let mock = MockTransport::new();
    let host = HostApplication::with_transport(test_config(), Box::new(mock));

    assert!(matches!(
        host.publish_state_birth(1),
        Err(Error::NotConnected)
    ));
    let command = PayloadBuilder::new();
    assert!(matches!(
        host.publish_node_command("Energy", "Gateway01", &command),
        Err(Error::NotConnected)
    ));
    assert!(matches!(host.subscribe_group("Energy"), Err(Error::NotConnected)));
}

#[test]
fn subscription_filters() {
    let (host, mock) = connected_host();

    host.subscribe_group("Energy").unwrap();
    host.subscribe_node("Energy", "Gateway01").unwrap();
    host.subscribe_state("OTHER_HOST").unwrap();
    host.subscribe_all_groups().unwrap();

    assert_eq!(
        mock.subscriptions(),
        [
            ("spBv1.0/Energy/#".to_string(), 1),
            ("spBv1.0/Energy/+/Gateway01/#".to_string(), 1),
            ("STATE/OTHER_HOST".to_string(), 1),
            ("spBv1.0/#".to_string(), 1),
        ]
    );
}

#[test]
fn inbound_traffic_feeds_the_observer() {
    let (host, mock) = connected_host();

    let mut birth = PayloadBuilder::new();
    birth.set_seq(0);
    birth.add_metric("bdSeq", 7u64);
    birth.add_metric_with_alias("Temperature", 1, 20.5);
    mock.inject_message("spBv1.0/Energy/NBIRTH/Gateway01", &birth.build());

    let node = host.get_node_state("Energy", "Gateway01").unwrap();
    assert!(node.online);
    assert_eq!(node.bd_seq, 7);
    assert_eq!(
        host.get_metric_name("Energy", "Gateway01", None, 1),
        Some("Temperature".to_string())
    );
}

#[test]
fn state_messages_reach_the_state_callback() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let config = test_config().with_state_callback(move |host_id, state| {
        sink.lock().unwrap().push((host_id.to_string(), *state));
    });

    let mock = MockTransport::new();
    let host = HostApplication::with_transport(config, Box::new(mock.clone()));
    host.connect().unwrap();

    mock.inject_message("STATE/OTHER_HOST", br#"{"online":false,"timestamp":99}"#);

    assert_eq!(
        *seen.lock().unwrap(),
        [("OTHER_HOST".to_string(), StateMessage::death(99))]
    );
    // STATE bytes never reach the Sparkplug payload parser, so nothing is
    // tracked for them.
    drop(host);
}

#[test]
fn command_round_trip_between_host_and_observer_callbacks() {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&commands);
    let config = test_config().with_command_callback(move |topic, payload| {
        let names: Vec<_> = payload.metrics().filter_map(|m| m.name).collect();
        sink.lock().unwrap().push((topic.to_string(), names));
    });

    let mock = MockTransport::new();
    let host = HostApplication::with_transport(config, Box::new(mock.clone()));
    host.connect().unwrap();

    // Another host's DCMD observed on the shared group subscription.
    let mut command = PayloadBuilder::new();
    command.add_metric("SetPoint", 1.5f64);
    mock.inject_message("spBv1.0/Energy/DCMD/Gateway01/Valve07", &command.build());

    assert_eq!(
        *commands.lock().unwrap(),
        [(
            "spBv1.0/Energy/DCMD/Gateway01/Valve07".to_string(),
            vec!["SetPoint".to_string()]
        )]
    );
}

#[test]
fn disconnect_flips_connected_flag() {
    let (host, mock) = connected_host();
    host.disconnect().unwrap();
    assert!(!host.is_connected());
    assert_eq!(mock.state().disconnects, 1);
}

#[test]
fn connection_loss_flips_connected_flag() {
    let (host, mock) = connected_host();
    mock.drop_connection("broker gone");
    assert!(!host.is_connected());
}

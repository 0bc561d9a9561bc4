//! Edge-node session lifecycle tests against a mock transport.

mod common;

use std::sync::{Arc, Mutex};

use common::MockTransport;
use sparkplug_b::{
    ConnectionState, EdgeNode, EdgeNodeConfig, Error, Metric, MetricValue, Payload,
    PayloadBuilder, Topic,
};

fn test_config() -> EdgeNodeConfig {
    EdgeNodeConfig::new("tcp://localhost:1883", "test_edge", "Energy", "Gateway01")
}

fn connected_node() -> (EdgeNode, MockTransport) {
    let mock = MockTransport::new();
    let node = EdgeNode::with_transport(test_config(), Box::new(mock.clone()));
    node.connect().unwrap();
    (node, mock)
}

fn born_node() -> (EdgeNode, MockTransport) {
    let (node, mock) = connected_node();
    let mut birth = PayloadBuilder::new();
    birth.add_metric_with_alias("Temperature", 1, 20.5);
    node.publish_birth(&mut birth).unwrap();
    (node, mock)
}

#[test]
fn connect_arms_ndeath_will_with_bdseq() {
    let (node, mock) = connected_node();

    let will = mock.last_will().expect("connect must install a will");
    assert_eq!(will.topic, "spBv1.0/Energy/NDEATH/Gateway01");
    assert_eq!(will.qos, 1);
    assert!(!will.retain);

    let payload = Payload::parse(&will.payload).unwrap();
    assert_eq!(payload.bd_seq(), Some(1));
    assert_eq!(node.bd_seq(), 1);
    assert_eq!(node.connection_state(), ConnectionState::Connected);
}

#[test]
fn connect_twice_is_rejected() {
    let (node, _mock) = connected_node();
    assert!(matches!(
        node.connect(),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn birth_forces_seq_zero_and_injects_bdseq() {
    let (node, mock) = born_node();

    let published = mock.published();
    assert_eq!(published.len(), 1);
    let message = &published[0];
    assert_eq!(message.topic, "spBv1.0/Energy/NBIRTH/Gateway01");
    assert!(!message.retain);

    let payload = Payload::parse(&message.payload).unwrap();
    assert_eq!(payload.seq(), Some(0));
    assert_eq!(payload.metric_count(), 2);
    assert_eq!(payload.bd_seq(), Some(1));
    assert!(payload.metric_by_name("Temperature").is_some());
    assert_eq!(node.seq(), 0);
}

#[test]
fn birth_overwrites_caller_bdseq_metric() {
    let (node, mock) = connected_node();

    let mut birth = PayloadBuilder::new();
    birth.add_metric("bdSeq", 999u64);
    node.publish_birth(&mut birth).unwrap();

    let payload = Payload::parse(&mock.published()[0].payload).unwrap();
    assert_eq!(payload.metric_count(), 1);
    assert_eq!(payload.bd_seq(), Some(node.bd_seq()));
}

#[test]
fn publish_requires_connection() {
    let mock = MockTransport::new();
    let node = EdgeNode::with_transport(test_config(), Box::new(mock));

    let mut payload = PayloadBuilder::new();
    payload.add_metric("m", 1i32);
    assert!(matches!(
        node.publish_birth(&mut payload),
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        node.publish_data(&mut payload),
        Err(Error::NotConnected)
    ));
}

#[test]
fn data_requires_prior_birth() {
    let (node, _mock) = connected_node();
    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 21.0);
    assert!(matches!(
        node.publish_data(&mut data),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn data_seq_advances_and_wraps() {
    let (node, mock) = born_node();

    for _ in 0..256 {
        let mut data = PayloadBuilder::new();
        data.add_metric_by_alias(1, 21.0);
        node.publish_data(&mut data).unwrap();
    }

    let published = mock.published();
    // NBIRTH plus 256 NDATA messages.
    assert_eq!(published.len(), 257);
    for (i, message) in published.iter().skip(1).enumerate() {
        let payload = Payload::parse(&message.payload).unwrap();
        assert_eq!(payload.seq(), Some(((i as u64) + 1) % 256));
    }
    // 256 messages after birth: the counter is back at 0.
    assert_eq!(node.seq(), 0);
}

#[test]
fn caller_supplied_seq_is_respected() {
    let (node, mock) = born_node();

    let mut data = PayloadBuilder::new();
    data.set_seq(200).add_metric_by_alias(1, 21.0);
    node.publish_data(&mut data).unwrap();

    let payload = Payload::parse(&mock.published()[1].payload).unwrap();
    assert_eq!(payload.seq(), Some(200));
}

#[test]
fn device_birth_requires_node_birth() {
    let (node, _mock) = connected_node();
    let mut birth = PayloadBuilder::new();
    birth.add_metric("Pressure", 1.0f64);
    assert!(matches!(
        node.publish_device_birth("Sensor01", &mut birth),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn device_data_requires_device_birth() {
    let (node, _mock) = born_node();
    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 1.0f64);
    assert!(matches!(
        node.publish_device_data("Sensor01", &mut data),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn node_and_device_messages_share_one_seq_counter() {
    let (node, mock) = born_node();

    let mut dbirth = PayloadBuilder::new();
    dbirth.add_metric_with_alias("Pressure", 1, 1.2f64);
    node.publish_device_birth("Sensor01", &mut dbirth).unwrap();

    let mut ndata = PayloadBuilder::new();
    ndata.add_metric_by_alias(1, 21.0);
    node.publish_data(&mut ndata).unwrap();

    let mut ddata = PayloadBuilder::new();
    ddata.add_metric_by_alias(1, 1.3f64);
    node.publish_device_data("Sensor01", &mut ddata).unwrap();

    node.publish_device_death("Sensor01").unwrap();

    let published = mock.published();
    let seqs: Vec<Option<u64>> = published
        .iter()
        .map(|m| Payload::parse(&m.payload).unwrap().seq())
        .collect();
    let topics: Vec<&str> = published.iter().map(|m| m.topic.as_str()).collect();

    assert_eq!(
        topics,
        [
            "spBv1.0/Energy/NBIRTH/Gateway01",
            "spBv1.0/Energy/DBIRTH/Gateway01/Sensor01",
            "spBv1.0/Energy/NDATA/Gateway01",
            "spBv1.0/Energy/DDATA/Gateway01/Sensor01",
            "spBv1.0/Energy/DDEATH/Gateway01/Sensor01",
        ]
    );
    assert_eq!(seqs, [Some(0), Some(1), Some(2), Some(3), Some(4)]);
    assert_eq!(node.device_online("Sensor01"), Some(false));
    // The DBIRTH bytes stay available after the death.
    assert_eq!(
        node.device_last_birth("Sensor01").as_deref(),
        Some(published[1].payload.as_slice())
    );
}

#[test]
fn metric_messages_are_never_retained() {
    let (node, mock) = born_node();

    let mut dbirth = PayloadBuilder::new();
    dbirth.add_metric("Pressure", 1.2f64);
    node.publish_device_birth("Sensor01", &mut dbirth).unwrap();
    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 21.0);
    node.publish_data(&mut data).unwrap();
    node.publish_device_death("Sensor01").unwrap();
    node.publish_death().unwrap();

    for message in mock.published() {
        assert!(!message.retain, "{} must not be retained", message.topic);
    }
}

#[test]
fn device_death_for_unknown_device_fails() {
    let (node, _mock) = born_node();
    assert!(matches!(
        node.publish_device_death("Ghost"),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn rebirth_increments_bdseq_and_resets_seq() {
    let (node, mock) = born_node();

    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 21.0);
    node.publish_data(&mut data).unwrap();
    assert_eq!(node.seq(), 1);

    node.rebirth().unwrap();

    assert_eq!(node.bd_seq(), 2);
    assert_eq!(node.seq(), 0);
    assert!(node.is_connected());

    let published = mock.published();
    let last = Payload::parse(&published.last().unwrap().payload).unwrap();
    assert_eq!(last.seq(), Some(0));
    assert_eq!(last.bd_seq(), Some(2));
    // The replayed certificate still declares the original metrics.
    assert!(last.metric_by_name("Temperature").is_some());

    // A full session cycle ran underneath: disconnect, reconnect with a
    // fresh will carrying the new bdSeq.
    let state = mock.state();
    assert_eq!(state.connects, 2);
    assert_eq!(state.disconnects, 1);
    let wills: Vec<Option<u64>> = state
        .wills
        .iter()
        .map(|w| Payload::parse(&w.payload).unwrap().bd_seq())
        .collect();
    assert_eq!(wills, [Some(1), Some(2)]);
}

#[test]
fn rebirth_without_stored_birth_fails() {
    let (node, _mock) = connected_node();
    assert!(matches!(
        node.rebirth(),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn publish_death_sends_will_bytes_then_disconnects() {
    let (node, mock) = born_node();
    node.publish_death().unwrap();

    let published = mock.published();
    let death = published.last().unwrap();
    assert_eq!(death.topic, "spBv1.0/Energy/NDEATH/Gateway01");
    assert_eq!(death.qos, 1);
    assert_eq!(death.payload, mock.last_will().unwrap().payload);
    assert!(!node.is_connected());
    assert_eq!(mock.state().disconnects, 1);

    // Idempotent once disconnected.
    node.publish_death().unwrap();
    assert_eq!(mock.published().len(), published.len());
}

#[test]
fn connection_loss_flips_session_offline() {
    let (node, mock) = born_node();
    mock.drop_connection("keepalive timeout");

    assert!(!node.is_connected());
    assert_eq!(node.connection_state(), ConnectionState::Disconnected);

    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 21.0);
    assert!(matches!(
        node.publish_data(&mut data),
        Err(Error::NotConnected)
    ));
}

#[test]
fn reconnect_after_loss_is_a_new_session() {
    let (node, mock) = born_node();
    mock.drop_connection("network down");

    node.connect().unwrap();
    assert_eq!(node.bd_seq(), 2);
    assert_eq!(
        Payload::parse(&mock.last_will().unwrap().payload)
            .unwrap()
            .bd_seq(),
        Some(2)
    );

    // Data requires a fresh NBIRTH in the new session.
    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 21.0);
    assert!(matches!(
        node.publish_data(&mut data),
        Err(Error::PreconditionViolated(_))
    ));
}

#[test]
fn command_callback_receives_ncmd() {
    let received: Arc<Mutex<Vec<(Topic, Vec<Metric>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let config = test_config().with_command_callback(move |topic, payload| {
        sink.lock()
            .unwrap()
            .push((topic.clone(), payload.metrics().collect()));
    });

    let mock = MockTransport::new();
    let node = EdgeNode::with_transport(config, Box::new(mock.clone()));
    node.connect().unwrap();

    // The NCMD subscription is part of connect.
    assert_eq!(
        mock.subscriptions(),
        [("spBv1.0/Energy/NCMD/Gateway01".to_string(), 1)]
    );

    let mut command = PayloadBuilder::new();
    command.add_node_control_rebirth();
    mock.inject_message("spBv1.0/Energy/NCMD/Gateway01", &command.build());

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (topic, metrics) = &received[0];
    assert_eq!(topic.to_string(), "spBv1.0/Energy/NCMD/Gateway01");
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name.as_deref(), Some("Node Control/Rebirth"));
    assert_eq!(metrics[0].value, MetricValue::Boolean(true));
}

#[test]
fn ncmd_for_other_nodes_is_ignored() {
    let received = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&received);
    let config = test_config().with_command_callback(move |_, _| {
        *sink.lock().unwrap() += 1;
    });

    let mock = MockTransport::new();
    let node = EdgeNode::with_transport(config, Box::new(mock.clone()));
    node.connect().unwrap();

    let mut command = PayloadBuilder::new();
    command.add_node_control_rebirth();
    let bytes = command.build();
    mock.inject_message("spBv1.0/Energy/NCMD/OtherGateway", &bytes);
    mock.inject_message("spBv1.0/Energy/NDATA/Gateway01", &bytes);
    mock.inject_message("not a sparkplug topic", &bytes);

    assert_eq!(*received.lock().unwrap(), 0);
}

#[test]
fn publish_failure_does_not_roll_back_seq() {
    let (node, mock) = born_node();

    mock.state().fail_publishes = true;
    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 21.0);
    assert!(matches!(
        node.publish_data(&mut data),
        Err(Error::PublishFailed { .. })
    ));
    assert_eq!(node.seq(), 1);

    mock.state().fail_publishes = false;
    let mut data = PayloadBuilder::new();
    data.add_metric_by_alias(1, 22.0);
    node.publish_data(&mut data).unwrap();

    // The failed publish consumed a slot; consumers see a gap, not a reset.
    let last = Payload::parse(&mock.published().last().unwrap().payload).unwrap();
    assert_eq!(last.seq(), Some(2));
}

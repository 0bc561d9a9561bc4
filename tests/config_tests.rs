//! Tests for edge-node and host configurations.

use std::time::Duration;

use sparkplug_b::{EdgeNodeConfig, HostConfig, TlsOptions};

#[test]
fn edge_config_defaults() {
    let config = EdgeNodeConfig::new(
        "tcp://localhost:1883",
        "test_client",
        "TestGroup",
        "TestNode",
    );

    assert_eq!(config.broker_url, "tcp://localhost:1883");
    assert_eq!(config.client_id, "test_client");
    assert_eq!(config.group_id, "TestGroup");
    assert_eq!(config.edge_node_id, "TestNode");
    assert_eq!(config.data_qos, 0);
    assert_eq!(config.death_qos, 1);
    assert!(config.clean_session);
    assert_eq!(config.keep_alive, Duration::from_secs(60));
    assert!(config.tls.is_none());
    assert!(config.credentials.is_none());
    assert!(config.command_callback.is_none());
}

#[test]
fn edge_config_builders() {
    let config = EdgeNodeConfig::new("ssl://broker:8883", "client", "Group", "Node")
        .with_credentials("user", "secret")
        .with_tls(TlsOptions::new("/etc/certs/ca.pem"))
        .with_data_qos(1)
        .with_keep_alive(Duration::from_secs(30))
        .with_clean_session(false)
        .with_command_callback(|_, _| {});

    assert_eq!(config.data_qos, 1);
    assert!(!config.clean_session);
    assert_eq!(config.keep_alive, Duration::from_secs(30));
    assert_eq!(config.credentials.as_ref().unwrap().username, "user");
    assert_eq!(config.tls.as_ref().unwrap().trust_store, "/etc/certs/ca.pem");
    assert!(config.command_callback.is_some());
}

#[test]
fn edge_config_clone_shares_callback() {
    let config = EdgeNodeConfig::new("tcp://b:1883", "c", "g", "n")
        .with_command_callback(|_, _| {});
    let clone = config.clone();
    assert!(clone.command_callback.is_some());
    assert_eq!(clone.edge_node_id, config.edge_node_id);
}

#[test]
fn host_config_defaults() {
    let config = HostConfig::new("tcp://localhost:1883", "scada_client", "SCADA01");

    assert_eq!(config.broker_url, "tcp://localhost:1883");
    assert_eq!(config.client_id, "scada_client");
    assert_eq!(config.host_id, "SCADA01");
    assert_eq!(config.qos, 1);
    assert!(config.clean_session);
    assert!(config.validate_sequence);
    assert_eq!(config.keep_alive, Duration::from_secs(60));
}

#[test]
fn host_config_builders() {
    let config = HostConfig::new("tcp://localhost:1883", "client", "HOST")
        .with_qos(0)
        .with_validate_sequence(false)
        .with_credentials("user", "pass")
        .with_message_callback(|_, _| {})
        .with_command_callback(|_, _| {})
        .with_state_callback(|_, _| {})
        .with_log_callback(|_, _| {});

    assert_eq!(config.qos, 0);
    assert!(!config.validate_sequence);
    assert!(config.message_callback.is_some());
    assert!(config.command_callback.is_some());
    assert!(config.state_callback.is_some());
    assert!(config.log_callback.is_some());
}

#[test]
fn tls_options_client_auth() {
    let tls = TlsOptions::new("/ca.pem").with_client_auth("/cert.pem", "/key.pem");
    assert_eq!(tls.trust_store, "/ca.pem");
    assert_eq!(tls.key_store.as_deref(), Some("/cert.pem"));
    assert_eq!(tls.private_key.as_deref(), Some("/key.pem"));
    assert!(tls.enable_server_cert_auth);
}

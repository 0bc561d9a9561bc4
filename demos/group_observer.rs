//! Observer demo: watch a whole group, report validation warnings and
//! resolve aliases captured from birth certificates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sparkplug_b::{HostApplication, HostConfig, MessageType, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to install Ctrl-C handler");

    let config = HostConfig::new("tcp://localhost:1883", "rust_observer_demo", "OBSERVER01")
        .with_log_callback(|level, message| {
            println!("[{:?}] {}", level, message);
        })
        .with_message_callback(|topic, payload| {
            println!("=== {} ===", topic);
            if topic.message_type == MessageType::NBirth {
                println!("  new session, bdSeq={:?}", payload.bd_seq());
            }
            for metric in payload.metrics() {
                match (&metric.name, metric.alias) {
                    (Some(name), _) => println!("  {} = {:?}", name, metric.value),
                    (None, Some(alias)) => println!("  alias {} = {:?}", alias, metric.value),
                    (None, None) => println!("  <unnamed> = {:?}", metric.value),
                }
            }
        })
        .with_state_callback(|host_id, state| {
            println!(
                "host {} is {} (ts={})",
                host_id,
                if state.online { "online" } else { "offline" },
                state.timestamp
            );
        });

    let host = HostApplication::new(config)?;
    host.connect()?;
    host.subscribe_group("Energy")?;
    host.subscribe_state("SCADA01")?;
    println!("observing spBv1.0/Energy/# (Ctrl-C to stop)");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    // Show what the observer learned about the group.
    if let Some(node) = host.get_node_state("Energy", "Gateway01") {
        println!(
            "Gateway01: online={}, bdSeq={}, last_seq={}, {} devices",
            node.online,
            node.bd_seq,
            node.last_seq,
            node.devices.len()
        );
        if let Some(name) = host.get_metric_name("Energy", "Gateway01", None, 1) {
            println!("alias 1 -> {}", name);
        }
    }

    host.disconnect()?;
    Ok(())
}

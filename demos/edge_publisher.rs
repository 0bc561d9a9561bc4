//! Edge-node demo: full Sparkplug B lifecycle against a local broker.
//!
//! Publishes an NBIRTH with aliased metrics, streams NDATA updates,
//! demonstrates a device sub-session and a rebirth, then goes down cleanly
//! with an explicit NDEATH.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sparkplug_b::{EdgeNode, EdgeNodeConfig, PayloadBuilder, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let rebirth_requested = Arc::new(AtomicBool::new(false));
    let rebirth_flag = Arc::clone(&rebirth_requested);

    let config = EdgeNodeConfig::new(
        "tcp://localhost:1883",
        "rust_edge_demo",
        "Energy",
        "Gateway01",
    )
    .with_command_callback(move |topic, payload| {
        println!("NCMD on {}:", topic);
        for metric in payload.metrics() {
            println!("  {:?} = {:?}", metric.name, metric.value);
            if metric.name.as_deref() == Some("Node Control/Rebirth") {
                // Blocking session calls are not allowed from the transport
                // thread; flag it and rebirth from the main loop.
                rebirth_flag.store(true, Ordering::SeqCst);
            }
        }
    });

    let node = EdgeNode::new(config)?;
    node.connect()?;
    println!("connected, bdSeq={}", node.bd_seq());

    let mut birth = PayloadBuilder::new();
    birth
        .add_metric_with_alias("Temperature", 1, 20.5)
        .add_metric_with_alias("Voltage", 2, 230.0)
        .add_metric_with_alias("Active", 3, true)
        .add_metric("Properties/OS", "Linux");
    node.publish_birth(&mut birth)?;
    println!("published NBIRTH (seq={})", node.seq());

    let mut device_birth = PayloadBuilder::new();
    device_birth.add_metric_with_alias("Pressure", 1, 1.013);
    node.publish_device_birth("Sensor01", &mut device_birth)?;
    println!("published DBIRTH for Sensor01 (seq={})", node.seq());

    for i in 0..30 {
        let mut data = PayloadBuilder::new();
        data.add_metric_by_alias(1, 20.5 + f64::from(i) * 0.1);
        node.publish_data(&mut data)?;

        let mut device_data = PayloadBuilder::new();
        device_data.add_metric_by_alias(1, 1.013 + f64::from(i) * 0.001);
        node.publish_device_data("Sensor01", &mut device_data)?;

        if rebirth_requested.swap(false, Ordering::SeqCst) {
            println!("rebirth requested by host");
            node.rebirth()?;
            println!("rebirth complete, bdSeq={}", node.bd_seq());
        }

        thread::sleep(Duration::from_secs(1));
    }

    node.publish_device_death("Sensor01")?;
    node.publish_death()?;
    println!("session closed");
    Ok(())
}

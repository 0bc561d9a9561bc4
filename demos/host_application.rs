//! Host-application demo: STATE liveness plus a rebirth command.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sparkplug_b::{HostApplication, HostConfig, PayloadBuilder, Result};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let config = HostConfig::new("tcp://localhost:1883", "rust_host_demo", "SCADA01")
        .with_message_callback(|topic, payload| {
            println!("{} (seq={:?}, {} metrics)", topic, payload.seq(), payload.metric_count());
        });

    let host = HostApplication::new(config)?;
    host.connect()?;
    host.subscribe_group("Energy")?;

    host.publish_state_birth(now_millis())?;
    println!("STATE birth published");

    thread::sleep(Duration::from_secs(5));

    let mut command = PayloadBuilder::new();
    command.add_node_control_rebirth();
    host.publish_node_command("Energy", "Gateway01", &command)?;
    println!("rebirth command sent to Gateway01");

    thread::sleep(Duration::from_secs(25));

    host.publish_state_death(now_millis())?;
    host.disconnect()?;
    println!("host offline");
    Ok(())
}

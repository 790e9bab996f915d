use std::env;

use nature_remo::{HubConfig, HubEvent, RemoClientBuilder, RemoHub};

#[tokio::main]
async fn main() -> nature_remo::Result<()> {
    tracing_subscriber::fmt::init();

    let path = env::args().nth(1).unwrap_or_else(|| "remo.toml".to_string());
    let mut config = HubConfig::load(&path)?;
    if let Ok(token) = env::var("REMO_TOKEN") {
        config.access_token = token;
    }
    config.validate()?;
    println!("Loaded {config:?}");

    let client = RemoClientBuilder::from_config(&config).build()?;
    let hub = RemoHub::builder(client)
        .config(&config)
        .on_event(|event| match event {
            HubEvent::ClimateChanged { id, state } => {
                let target = state
                    .target
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".into());
                let room = state
                    .measured
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "[{id}] mode: {} | preset: {} | target: {target} | room: {room} | fan: {} | swing: {}",
                    state.mode,
                    state.preset,
                    state.fan.as_deref().unwrap_or("-"),
                    state.swing.as_deref().unwrap_or("-"),
                );
            }
            other => println!("{other:?}"),
        })
        .build()?;

    println!("Polling every {}s...", hub.poll_interval().as_secs());
    let poller = hub.start_polling();

    let mut ticker = tokio::time::interval(hub.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for device in hub.devices() {
                    for reading in hub.sensor_readings(&device.id) {
                        println!(
                            "  {} = {:?} {}",
                            reading.entity_key,
                            reading.value,
                            reading.unit.unwrap_or(""),
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.stop();
    Ok(())
}

use std::sync::{Arc, Mutex};

use nature_remo::{HubEvent, RemoHub};

/// Run with: REMO_TOKEN=... cargo test --test integration -- --ignored
/// Talks to the real cloud and costs two requests of the rate limit.
#[tokio::test]
#[ignore]
async fn refresh_live_account() {
    let token = std::env::var("REMO_TOKEN").expect("REMO_TOKEN not set");
    let events: Arc<Mutex<Vec<HubEvent>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();

    let client = nature_remo::RemoClient::builder(token)
        .build()
        .expect("client should build");
    let hub = RemoHub::builder(client)
        .on_event(move |event| {
            events_clone.lock().unwrap().push(event.clone());
        })
        .build()
        .expect("hub should build");

    hub.refresh().await.expect("refresh failed");

    let devices = hub.devices();
    assert!(!devices.is_empty(), "account has no hubs");
    for device in &devices {
        println!("{} ({}): {:?}", device.name, device.id, hub.sensor_readings(&device.id));
    }

    for appliance in hub.appliances() {
        println!("{} [{}] {}", appliance.nickname, appliance.kind.name(), appliance.id);
        if appliance.aircon().is_some() {
            let state = hub.climate_state(&appliance.id).expect("aircon has state");
            assert!(state.available);
            println!("  {state:?}");
            println!("  {:?}", hub.climate_capabilities(&appliance.id).unwrap());
        }
    }

    let added = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, HubEvent::ApplianceAdded { .. }))
        .count();
    assert_eq!(added, hub.appliances().len());
}

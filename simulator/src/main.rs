mod state;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use state::StatePayload;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Simulates a fleet of WLED controllers against the device service:
/// registers `wled-sim-N` devices, then pushes randomized state updates.
#[derive(Parser, Debug)]
#[command(name = "simulator")]
struct Args {
    /// Base URL of the device service
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Number of simulated controllers
    #[arg(long, env = "DEVICES", default_value_t = 10)]
    devices: usize,

    /// Delay between state pushes in milliseconds
    #[arg(long, env = "INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// User id presented to the service
    #[arg(long, env = "SIM_USER", default_value = "simulator")]
    user: String,
}

#[derive(Debug, Deserialize)]
struct DeviceBody {
    id: String,
    mqtt_client_id: String,
}

#[derive(Debug, Deserialize)]
struct ListBody {
    data: Vec<DeviceBody>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting WLED simulator");
    info!(
        "Server: {}, Devices: {}, Interval: {}ms",
        args.server, args.devices, args.interval_ms
    );

    let client = Client::new();
    let device_ids = register_devices(&client, &args).await;
    if device_ids.is_empty() {
        error!("No devices available to simulate");
        std::process::exit(1);
    }

    info!(
        "Simulating {} devices, pushing a state update every {}ms",
        device_ids.len(),
        args.interval_ms
    );

    let interval = Duration::from_millis(args.interval_ms);
    let mut rng = rand::thread_rng();
    let mut counter = 0u64;

    loop {
        let id = &device_ids[rng.gen_range(0..device_ids.len())];
        let payload = random_state(&mut rng);

        let url = format!("{}/api/v1/devices/{}/state", args.server, id);
        match with_identity(client.post(&url), &args)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                counter += 1;
            }
            Ok(resp) => {
                warn!("State push to {} rejected: {}", id, resp.status());
            }
            Err(e) => {
                warn!("State push to {} failed: {}", id, e);
            }
        }

        // Log progress periodically
        if counter > 0 && counter % 100 == 0 {
            info!("Pushed {} state updates", counter);
        }

        tokio::time::sleep(interval).await;
    }
}

/// Registers the simulated fleet. Client ids surviving from a previous run
/// come back as duplicates; their device ids are recovered from the listing
/// instead.
async fn register_devices(client: &Client, args: &Args) -> Vec<String> {
    let mut ids: HashMap<String, String> = HashMap::new();
    let mut need_recovery = false;

    for n in 0..args.devices {
        let client_id = format!("wled-sim-{}", n);
        let body = json!({
            "title": format!("Simulated WLED {}", n),
            "mqtt_client_id": client_id,
            "ip_address": format!("10.99.0.{}", n % 250 + 1),
        });

        let response = with_identity(
            client.post(format!("{}/api/v1/devices", args.server)),
            args,
        )
        .json(&body)
        .send()
        .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::CREATED => {
                match resp.json::<DeviceBody>().await {
                    Ok(device) => {
                        ids.insert(device.mqtt_client_id, device.id);
                    }
                    Err(e) => warn!("Failed to parse registration response: {}", e),
                }
            }
            Ok(resp) if resp.status() == StatusCode::BAD_REQUEST => {
                // Registered on a previous run; pick the id up from the list.
                need_recovery = true;
            }
            Ok(resp) => {
                warn!("Registration of {} failed: {}", client_id, resp.status());
            }
            Err(e) => {
                warn!("Registration of {} failed: {}", client_id, e);
            }
        }
    }

    if need_recovery {
        info!("Recovering previously registered devices from the listing");
        let response = with_identity(
            client.get(format!("{}/api/v1/devices?limit=1000", args.server)),
            args,
        )
        .send()
        .await;

        match response {
            Ok(resp) => match resp.json::<ListBody>().await {
                Ok(list) => {
                    for device in list.data {
                        if device.mqtt_client_id.starts_with("wled-sim-") {
                            ids.entry(device.mqtt_client_id).or_insert(device.id);
                        }
                    }
                }
                Err(e) => warn!("Failed to parse device listing: {}", e),
            },
            Err(e) => warn!("Failed to list devices: {}", e),
        }
    }

    (0..args.devices)
        .filter_map(|n| ids.get(&format!("wled-sim-{}", n)).cloned())
        .collect()
}

fn with_identity(rb: RequestBuilder, args: &Args) -> RequestBuilder {
    rb.header("x-user-id", &args.user)
        .header("x-user-email", format!("{}@sim.local", args.user))
        .header("x-user-role", "member")
}

fn random_state(rng: &mut impl Rng) -> StatePayload {
    let bri = if rng.gen_bool(0.1) {
        0 // 10% off
    } else {
        rng.gen_range(16..=255)
    };

    StatePayload {
        on: bri > 0,
        bri,
        last_state_update: Utc::now().to_rfc3339(),
    }
}

//! Driver-side tracking simulator.
//!
//! Runs the sampling loop against a bustrack server, synthetically by
//! default (no GPS hardware needed), and ends the trip on Ctrl-C:
//!
//!   driver <server_url> <bus_number> <driver_id> [seed]

use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bustrack::client::IngestClient;
use bustrack::config::TrackingConfig;
use bustrack::tracker::{forward_samples, LinkStatus, Sampler, SamplerConfig, SamplingMode};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(server_url), Some(bus_number), Some(driver_id)) =
        (args.next(), args.next(), args.next())
    else {
        eprintln!("usage: driver <server_url> <bus_number> <driver_id> [seed]");
        std::process::exit(2);
    };
    let seed = args.next().and_then(|s| s.parse().ok());

    let client = IngestClient::new(&server_url).expect("Failed to build HTTP client");

    let mut config = SamplerConfig::from_config(&TrackingConfig::default());
    config.synthetic_seed = seed;

    let (sample_tx, sample_rx) = mpsc::channel(16);
    let (status_tx, mut status_rx) = watch::channel(LinkStatus::Idle);

    let forwarder = tokio::spawn(forward_samples(client, sample_rx, status_tx));
    let mut sampler = Sampler::start(
        config,
        SamplingMode::Synthetic,
        bus_number.clone(),
        driver_id,
        None,
        sample_tx,
    );

    // Log link status changes until the trip is stopped
    let status_task = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            match &*status_rx.borrow() {
                LinkStatus::Active { trip_id } => {
                    tracing::info!(trip_id = %trip_id, "Link active")
                }
                LinkStatus::Error { message } => tracing::warn!(message = %message, "Link error"),
                LinkStatus::Ended => tracing::info!("Trip ended"),
                LinkStatus::Idle => {}
            }
        }
    });

    tracing::info!(bus_number = %bus_number, "Tracking, press Ctrl-C to end the trip");
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl-C");

    sampler.stop().await;
    forwarder.await.expect("Forwarder task failed");
    status_task.abort();
}

use std::error::Error;

use rcws_telemetry::{ClientConfig, ConnectionState, HistoryCategory, TelemetryClient, TimeRange};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const FRAMES_TO_PRINT: usize = 10;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env();
    let server_url = config
        .server_url
        .clone()
        .unwrap_or_else(|| "http://localhost:8443".to_string());
    let username = "REPLACE_WITH_USERNAME";
    let password = SecretString::new("REPLACE_WITH_PASSWORD".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = TelemetryClient::new(config)?;
        let outcome = client.login(&server_url, username, &password).await?;
        println!("logged in role={}", outcome.role);

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let _updates = client.on_update(move |frame| {
            let _ = frames_tx.send(*frame);
        });
        let _errors = client.on_error(|err| eprintln!("stream error: {err}"));
        let _states = client.on_state_change(|state: &ConnectionState| println!("state={state}"));

        client.connect().await?;
        for _ in 0..FRAMES_TO_PRINT {
            let Some(frame) = frames_rx.recv().await else {
                break;
            };
            println!(
                "az={:.2} el={:.2} armed={} tracking={}",
                frame.gimbal.gimbal_az,
                frame.gimbal.gimbal_el,
                frame.weapon.gun_armed,
                frame.tracking.active,
            );
        }

        let stats = client.stats();
        println!(
            "messages={} rate={:.1}/s ws_url={}",
            stats.message_count,
            stats.update_rate,
            stats.ws_url.unwrap_or_default(),
        );

        let recent = client
            .history(HistoryCategory::Gimbal, TimeRange::last(chrono::Duration::minutes(5)))
            .await?;
        println!("gimbal rows in the last five minutes: {}", recent.len());

        client.logout().await;
        Ok::<(), Box<dyn Error>>(())
    })
}

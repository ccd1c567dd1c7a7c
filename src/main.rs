use std::sync::Arc;

use tracing::info;

use carecoord::circle::CircleManager;
use carecoord::config::Settings;
use carecoord::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let settings = Settings::from_env();
    carecoord::observability::init(settings.metrics_port)?;
    std::fs::create_dir_all(&settings.data_dir)?;

    info!("carecoord serving line-delimited JSON on stdin/stdout");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  compact_threshold: {}", settings.compact_threshold);
    info!(
        "  gap scanner: {}",
        settings.scan.as_ref().map_or("disabled".to_string(), |s| format!(
            "every {:?}, {} days ahead, window {}",
            s.interval, s.horizon_days, s.required_window
        ))
    );
    info!(
        "  metrics: {}",
        settings
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let circles = Arc::new(CircleManager::from_settings(&settings));
    let serve = wire::process_stream(tokio::io::stdin(), tokio::io::stdout(), circles.clone());

    tokio::select! {
        result = serve => {
            result?;
            info!("input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!(circles = circles.circle_count(), "carecoord stopped");
    Ok(())
}

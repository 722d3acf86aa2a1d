use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use driver_client::config::Config;
use driver_client::error::ClientError;
use driver_client::state::DriverApp;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let login = (config.login_email.clone(), config.login_password.clone());
    let app = DriverApp::new(config)?;

    if app.resume().is_none() {
        let (Some(email), Some(password)) = login else {
            tracing::error!("no stored session; set DRIVER_EMAIL and DRIVER_PASSWORD");
            return Err(ClientError::MissingCredential);
        };
        app.login(&email, &password).await?;
    }

    let mut alerts = app.alerts.subscribe();
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(alert) => tracing::info!(
                    title = %alert.title,
                    kind = ?alert.kind,
                    message = %alert.message,
                    "alert"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alert log fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    app.start().await?;
    if let Err(err) = app.controller.go_online(None).await {
        tracing::warn!(error = %err, "could not go online");
    }

    shutdown_signal().await;

    if let Err(err) = app.controller.go_offline().await {
        tracing::warn!(error = %err, "could not go offline");
    }
    app.reset();

    match app.metrics.encode() {
        Ok(body) => tracing::debug!(metrics = %body, "final metrics"),
        Err(err) => tracing::warn!(error = %err, "failed to encode metrics"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

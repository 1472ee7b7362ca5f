use actix_web::{App, HttpServer};
use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

mod config;
mod crd;
mod handlers;
mod metrics;
mod reconciler;
mod scaling;
#[cfg(test)]
mod testing;

use crate::config::ControllerConfig;
use crate::crd::VolumeAutoscaler;
use crate::handlers::metrics_handler;
use crate::reconciler::supervisor::Supervisor;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = ControllerConfig::parse();

    if config.print_crd {
        let crd = serde_json::to_string_pretty(&VolumeAutoscaler::crd()).map_err(std::io::Error::other)?;
        println!("{}", crd);
        return Ok(());
    }

    let client = Client::try_default().await.map_err(std::io::Error::other)?;
    let cancel = CancellationToken::new();
    let supervisor = tokio::spawn(Supervisor::new(client, config.clone()).run(cancel.child_token()));

    let server = HttpServer::new(|| App::new().configure(metrics_handler::configure))
        .bind(&config.bind_address)?
        .disable_signals()
        .run();
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);
    log::info!("Serving /metrics and /healthz on {}", config.bind_address);

    shutdown_signal().await;
    log::info!("Shutdown requested, stopping poll loops");
    cancel.cancel();
    server_handle.stop(true).await;
    if let Err(e) = supervisor.await {
        log::error!("Supervisor task failed: {}", e);
    }
    match server_task.await {
        Ok(result) => result,
        Err(e) => {
            log::error!("HTTP server task failed: {}", e);
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

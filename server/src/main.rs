use clap::Parser;
use log::{error, info};
use server::config::{Args, ServerConfig};
use server::network::{Server, ServerEvent};

/// Parses command-line arguments, binds the listener and runs the relay
/// until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting relay on {} (max {} players)",
        config.bind_addr, config.max_clients
    );

    let server = Server::bind(config).await?;
    let events = server.event_sender();
    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = events.send(ServerEvent::Shutdown).await;
            let _ = server_handle.await;
        }
    }

    Ok(())
}

//! wsmux-chat: line-oriented chat over one multiplexed channel.
//!
//! Usage: `wsmux-chat [config.yaml] [channel]`
//! - Inbound messages are printed one JSON object per line.
//! - Each stdin line is sent as a text chat message.
//! - EOF or Ctrl-C closes every channel and exits.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use wsmux_client::resolver::FileRoutingSource;
use wsmux_client::{config, ConnectionManager, EndpointResolver};
use wsmux_core::protocol::MessageKind;
use wsmux_core::ChannelKey;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut args = std::env::args().skip(1);
    let cfg_path = args.next().unwrap_or_else(|| "wsmux.yaml".to_string());
    let key: ChannelKey = match args.next() {
        Some(s) => s.parse()?,
        None => ChannelKey::Chat,
    };

    let cfg = config::load_from_file(&cfg_path)?;
    let settings = cfg.manager.settings();
    let resolver = Arc::new(EndpointResolver::new(cfg.hosts.clone()));

    // Routing loads in the background; `connect` waits for it.
    tokio::spawn({
        let resolver = Arc::clone(&resolver);
        let source = FileRoutingSource::new(cfg.routing_path.clone());
        async move {
            match resolver.load(&source).await {
                Ok(routes) => tracing::info!(routes, "routing loaded"),
                Err(e) => tracing::error!(error = %e, "routing load failed"),
            }
        }
    });

    let manager = ConnectionManager::with_tungstenite(resolver, settings);
    tracing::info!(config = %cfg_path, %key, "wsmux-chat starting");

    let mut sub = manager.connect(key, &[], None).await?;
    let printer = tokio::spawn(async move {
        while let Some(msg) = sub.recv().await {
            match serde_json::to_string(&msg) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "inbound message not printable"),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                None => break,
                Some(text) if text.trim().is_empty() => {}
                Some(text) => {
                    if let Err(e) = manager.send_chat(key, &text, MessageKind::Text, None) {
                        eprintln!("not sent: {e}");
                    }
                }
            },
        }
    }

    manager.close_all().await;
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "printer task failed");
    }
    tracing::info!("wsmux-chat stopped");
    Ok(())
}

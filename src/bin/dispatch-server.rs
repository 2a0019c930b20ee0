use clap::Parser;
use lora_downlink_dispatch::config::DispatchConfig;
use lora_downlink_dispatch::{DispatchGateway, DispatchServer};

#[derive(Parser)]
struct Opts {
    /// TOML config file (see dispatch.toml)
    #[clap(long)]
    config: Option<String>,
    /// TCP listen address, e.g. 127.0.0.1:7000 (overrides config)
    #[clap(long)]
    listen: Option<String>,
    /// optional UDP listen address, e.g. 127.0.0.1:7001 (overrides config)
    #[clap(long)]
    udp: Option<String>,
    /// idle connection timeout in milliseconds (overrides LORA_DISPATCH_IDLE_TIMEOUT_MS)
    #[clap(long)]
    idle_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    tracing_subscriber::fmt::init();

    let mut cfg = match opts.config.as_deref() {
        Some(path) => DispatchConfig::load(path)?,
        None => DispatchConfig::default(),
    };
    cfg.apply_env();
    if let Some(listen) = opts.listen {
        cfg.listen = listen;
    }
    if opts.udp.is_some() {
        cfg.udp = opts.udp;
    }
    if let Some(ms) = opts.idle_timeout_ms {
        cfg.idle_timeout_ms = ms;
    }

    let opened = cfg.open_store()?;
    let server = DispatchServer::new(DispatchGateway::new(opened.queue_store()))
        .with_idle_timeout(cfg.idle_timeout())
        .with_max_line_len(cfg.max_line_len);
    tracing::info!(listen = %cfg.listen, "starting dispatch server");

    if let Some(udp_bind) = cfg.udp.clone() {
        let udp_srv = server.clone();
        tracing::info!(udp = %udp_bind, "starting UDP listener");
        tokio::spawn(async move {
            if let Err(e) = udp_srv.run_udp_listener(&udp_bind).await {
                tracing::error!(%e, "udp listener failed");
            }
        });
    }

    let listen = cfg.listen.clone();
    tokio::select! {
        res = server.run_listener(&listen) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }
    opened.persist_on_shutdown().await?;
    Ok(())
}

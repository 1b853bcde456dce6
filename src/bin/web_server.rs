use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use study_server::{
    config::Config,
    server::{Server, build_app},
    utils::init_log,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "Serve the bookkeeping study site")]
struct Args {
    /// toml config file, defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Path to database file
    #[arg(short, long)]
    database: Option<PathBuf>,
    /// Directory for daily log files, stdout when omitted
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = Some(log_dir);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    let _guard = init_log(config.log_dir.clone())?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let tls = config.tls.clone();
    let server = Server::connect(config).await?;
    let store = server.session_store().await?;
    let app = build_app(Arc::new(server), store);

    match tls {
        Some(tls) => {
            // Initialize rustls crypto provider
            CryptoProvider::install_default(aws_lc_rs::default_provider()).map_err(|e| {
                anyhow::anyhow!("Failed to initialize rustls crypto provider: {:?}", e)
            })?;
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .with_context(|| format!("load certificate {}", tls.cert.display()))?;
            info!("Starting server at https://{}", addr);
            info!("Swagger UI available at https://{}/swagger-ui/", addr);
            axum_server::bind_rustls(addr, rustls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Starting server at http://{}", addr);
            info!("Swagger UI available at http://{}/swagger-ui/", addr);
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await?;
        }
    }
    Ok(())
}

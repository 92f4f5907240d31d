// nicehash_exporter - Prometheus metrics exporter for NiceHash mining rigs
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use nicehash_exporter::client::{Credentials, NiceHashClient};
use nicehash_exporter::http::RequestState;
use nicehash_exporter::metrics::{ExporterMetrics, FleetMetrics};
use nicehash_exporter::refresh::Refresher;
use prometheus_client::registry::Registry;
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: [u8; 4] = [0, 0, 0, 0];
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_REFERSH_SECS: u64 = 30;
const DEFAULT_TIMEOUT_MILLIS: u64 = 10000;
const DEFAULT_API_URL: &str = "https://api2.nicehash.com/";
const DEFAULT_PREFIX: &str = "nh_";
const DEFAULT_RATES: &str = "BTCUSDC,BTCEURS";

#[derive(Debug, Parser)]
#[clap(name = "nicehash_exporter", version = clap::crate_version!())]
struct NiceHashExporterApplication {
    /// NiceHash API key. Read-only permissions are sufficient
    #[clap(long, env = "NH_API_KEY", hide_env_values = true)]
    api_key: String,

    /// NiceHash API secret for the API key
    #[clap(long, env = "NH_API_SECRET", hide_env_values = true)]
    api_secret: String,

    /// NiceHash organization ID the API key belongs to
    #[clap(long, env = "NH_API_ORG_ID")]
    org_id: String,

    /// Base URL for the NiceHash API
    #[clap(long, env = "NH_API_URL", default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// Comma separated currency pairs to export exchange rates for. Each pair is exported
    /// as a gauge named after the lowercased pair, e.g. 'nh_btcusdc_rate'
    #[clap(long, env = "NH_RATES", value_delimiter = ',', default_value = DEFAULT_RATES)]
    rates: Vec<String>,

    /// Prefix for the name of every mining, wallet, and exchange rate metric
    #[clap(long, env = "NH_METRICS_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Prefix for the name of process metrics
    #[clap(long, env = "NODE_METRICS_PREFIX", default_value = "")]
    process_prefix: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "NH_LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Fetch rigs, wallet, and exchange rates from the NiceHash API at this interval, in seconds.
    #[clap(long, env = "REFRESH_RATE_SECONDS", default_value_t = DEFAULT_REFERSH_SECS)]
    refresh_secs: u64,

    /// Timeout for each request to the NiceHash API, in milliseconds.
    #[clap(long, env = "NH_TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to. By default, nicehash_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, env = "BIND_ADDRESS", default_value_t = DEFAULT_BIND_ADDR.into())]
    address: IpAddr,

    /// Port to bind to
    #[clap(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

/// Normalize a currency pair and make sure it can be used as part of a metric name.
fn parse_rate_pair(s: &str) -> Result<String, String> {
    let pair = s.trim();
    if pair.is_empty() || !pair.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("invalid currency pair '{}', expected letters and digits only", s));
    }

    Ok(pair.to_uppercase())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = NiceHashExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    if opts.api_url.cannot_be_a_base() {
        tracing::error!(message = "invalid API URL", api_url = %opts.api_url);
        process::exit(1)
    }

    if opts.refresh_secs == 0 {
        tracing::error!(
            message = "invalid refresh interval, must be at least one second",
            refresh_secs = opts.refresh_secs,
        );
        process::exit(1)
    }

    let rates = opts
        .rates
        .iter()
        .map(|p| parse_rate_pair(p))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e| {
            tracing::error!(message = "invalid exchange rate pair", error = %e);
            process::exit(1)
        });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let credentials = Credentials::new(opts.api_key, opts.api_secret, opts.org_id);
    let client = NiceHashClient::new(http_client, opts.api_url.clone(), credentials);

    // Every metric is registered before the refresh task starts or the server accepts
    // requests. After this, the registry is only read (by scrapes) and metric values are
    // only written (by the refresh task) through the handles held by the metric structs.
    let mut registry = Registry::default();
    let fleet = FleetMetrics::new(&mut registry, &opts.prefix, &rates);
    let exporter = ExporterMetrics::new(&mut registry, &opts.prefix, &opts.process_prefix);
    let refresher = Arc::new(Refresher::new(client, fleet, exporter, timeout));

    let bind = SocketAddr::new(opts.address, opts.port);
    let server = axum::Server::try_bind(&bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %bind, error = %e);
        process::exit(1)
    });

    tracing::info!(
        message = "refresh started",
        api_url = %opts.api_url,
        refresh_secs = opts.refresh_secs,
        rates = ?rates,
    );
    tokio::spawn(refresher.run(Duration::from_secs(opts.refresh_secs)));

    let context = Arc::new(RequestState::new(registry));
    let app = nicehash_exporter::http::router(context);

    tracing::info!(message = "server started", address = %bind);
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}

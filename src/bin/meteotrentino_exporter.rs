// meteotrentino_exporter - Prometheus and InfluxDB exporter for Meteotrentino weather stations
//
// Copyright 2025 meteotrentino_exporter contributors
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

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use meteotrentino_exporter::client::{ClientError, MeteoClient};
use meteotrentino_exporter::config::{ExporterApplication, LogFormat};
use meteotrentino_exporter::http::RequestContext;
use meteotrentino_exporter::influx::InfluxWriter;
use meteotrentino_exporter::metrics::WeatherMetrics;
use meteotrentino_exporter::pipeline::{CycleError, Pipeline};
use prometheus_client::registry::Registry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal::unix::{self, SignalKind};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = ExporterApplication::parse()
        .into_config()
        .unwrap_or_else(|e| ExporterApplication::command().error(ErrorKind::ValueValidation, e).exit());

    let builder = tracing_subscriber::FmtSubscriber::builder().with_max_level(config.log_level);
    let installed = match config.log_format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
    installed.expect("failed to set tracing subscriber");

    let http_client = Client::builder().build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = Arc::new(MeteoClient::new(
        http_client.clone(),
        &config.api_url,
        &config.station,
        config.timeout,
    ));

    let mut registry = Registry::default();
    let metrics = Arc::new(WeatherMetrics::new(&mut registry));

    let mut pipeline = Pipeline::new(client.clone(), &config.station).with_sink(metrics.clone());
    if let Some(influx) = &config.influxdb {
        let writer = InfluxWriter::new(http_client, influx);
        tracing::info!(message = "writing points to influxdb", url = %writer.write_url());
        pipeline = pipeline.with_sink(Arc::new(writer));
    }

    let shutdown = CancellationToken::new();

    if config.oneshot {
        let code = match pipeline
            .run_once(&shutdown)
            .instrument(tracing::span!(Level::DEBUG, "meteotrentino_fetch"))
            .await
        {
            Ok(report) => {
                tracing::info!(message = "published station data", station = %config.station, samples = report.samples, points = report.points);
                0
            }
            Err(e) => {
                tracing::error!(message = "failed to publish station data", station = %config.station, error = %e.display_chain());
                1
            }
        };

        process::exit(code);
    }

    let poller = {
        let shutdown = shutdown.clone();
        let station = config.station.clone();
        let api_url = config.api_url.clone();
        let mut interval = tokio::time::interval(config.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            tracing::info!(message = "station polling started", api_url = %api_url, station = %station);

            loop {
                // The first tick completes immediately so data is fetched at startup
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match pipeline
                    .run_once(&shutdown)
                    .instrument(tracing::span!(Level::DEBUG, "meteotrentino_fetch"))
                    .await
                {
                    Ok(report) => {
                        tracing::info!(
                            message = "fetched new station data",
                            samples = report.samples,
                            points = report.points,
                            newest = ?report.newest,
                        );
                    }
                    Err(CycleError::Fetch(ClientError::Cancelled)) => break,
                    Err(e) => {
                        tracing::error!(message = "failed to fetch station data", error = %e.display_chain());
                    }
                }
            }

            tracing::info!("station polling stopped");
        })
    };

    let mut context = RequestContext::new(registry);
    if config.scrape_fetch {
        // Scrapes only refresh the gauges, points are written by the poller
        context = context.with_scrape_fetch(Pipeline::new(client, &config.station).with_sink(metrics));
    }

    let app = meteotrentino_exporter::http::router(Arc::new(context));
    let server = axum::Server::try_bind(&config.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %config.bind, error = %e);
        process::exit(1)
    });

    let startup = Instant::now();
    tracing::info!(message = "server started", address = %config.bind, station = %config.station);

    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
            shutdown.cancel();
        })
        .await?;

    poller.await?;
    tracing::info!(message = "server shutdown", runtime_secs = %startup.elapsed().as_secs());
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

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

//! Prometheus and InfluxDB exporter for Meteotrentino weather stations
//!
//! ## Features
//!
//! `meteotrentino_exporter` periodically fetches the latest readings of a single [Meteotrentino]
//! weather station from the [open data service] and publishes them. The following gauges are
//! exposed to Prometheus with the most recent value of each series.
//!
//! * `temperature_celsius` - Air temperature, in degrees celsius.
//! * `humidity_percent` - Relative humidity (0-100).
//! * `precipitation_mm` - Precipitation over the last reporting interval, in millimeters.
//! * `radiation_watts_per_square_meter` - Global solar radiation, in watts per square meter.
//!
//! Optionally, every reading of the day (including wind speed, gusts, and direction) is also
//! written to InfluxDB, one point per timestamp, as the `meteotrentino` measurement tagged
//! with the station code.
//!
//! [Meteotrentino]: https://www.meteotrentino.it/
//! [open data service]: http://dati.meteotrentino.it/
//!
//! ## Build
//!
//! `meteotrentino_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Picking a station
//!
//! Station codes (for example `T0129` for Trento Laste) are listed on the
//! [station list](https://content.meteotrentino.it/dati-meteo/stazioni/dati-meteo.html).
//!
//! ```text
//! ./meteotrentino_exporter --station T0129
//! ```
//!
//! Every option can also be set with an environment variable, see `--help` for the names.
//!
//! ### InfluxDB
//!
//! ```text
//! ./meteotrentino_exporter --station T0129 \
//!     --enable-influxdb \
//!     --influxdb-url http://localhost:8086 \
//!     --influxdb-database weather \
//!     --influxdb-org home \
//!     --influxdb-token "$INFLUXDB_TOKEN"
//! ```
//!
//! Pass `--oneshot` to fetch and publish a single time and exit, for use from cron or
//! a systemd timer.
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `3000` at `/metrics` and a health check at `/up`.
//! Stations report every 15 minutes or so, polling more often than the default of 15
//! minutes doesn't produce fresher data.
//!
//! ```yaml
//! scrape_configs:
//! - job_name: meteotrentino_exporter
//!   static_configs:
//!   - targets: ['example:3000']
//! ```
//!

pub mod aggregate;
pub mod client;
pub mod config;
pub mod decode;
pub mod http;
pub mod influx;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod series;
pub mod sink;
pub mod time;

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;
    use std::net::{SocketAddr, TcpListener};

    /// Serve `app` on an ephemeral local port for the rest of the test.
    pub(crate) async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());

        tokio::spawn(async move {
            let _ = server.await;
        });
        addr
    }
}

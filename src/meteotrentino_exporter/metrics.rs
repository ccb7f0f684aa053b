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

use crate::aggregate::WeatherSnapshot;
use crate::series::MetricKind;
use crate::sink::{Records, Shape, Sink, SinkError};
use futures_util::future::{self, BoxFuture, FutureExt};
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

/// Holder for gauges set from a `WeatherSnapshot`.
///
/// All gauges are created and registered by `WeatherMetrics::new()`. Gauges keep their
/// previous value when a cycle fails.
#[derive(Debug, Clone, Default)]
pub struct WeatherMetrics {
    temperature: Gauge<f64, AtomicU64>,
    humidity: Gauge<f64, AtomicU64>,
    precipitation: Gauge<f64, AtomicU64>,
    radiation: Gauge<f64, AtomicU64>,
}

impl WeatherMetrics {
    /// Create a new `WeatherMetrics` and register each gauge with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            MetricKind::Temperature.name(),
            "Current temperature in celsius",
            metrics.temperature.clone(),
        );
        reg.register(
            MetricKind::Humidity.name(),
            "Current relative humidity in percent",
            metrics.humidity.clone(),
        );
        reg.register(
            MetricKind::Precipitation.name(),
            "Current precipitation in millimeters",
            metrics.precipitation.clone(),
        );
        reg.register(
            MetricKind::Radiation.name(),
            "Current radiation in watts per square meter",
            metrics.radiation.clone(),
        );

        metrics
    }

    /// Set every gauge from the provided snapshot.
    pub fn observe(&self, snapshot: &WeatherSnapshot) {
        self.temperature.set(snapshot.temperature);
        self.humidity.set(snapshot.humidity);
        self.precipitation.set(snapshot.precipitation);
        self.radiation.set(snapshot.radiation);
    }
}

impl Sink for WeatherMetrics {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn shape(&self) -> Shape {
        Shape::Snapshot
    }

    fn publish<'a>(&'a self, records: Records<'a>) -> BoxFuture<'a, Result<(), SinkError>> {
        let res = match records {
            Records::Snapshot(snapshot) => {
                self.observe(snapshot);
                Ok(())
            }
            other => Err(SinkError::Unsupported {
                sink: self.name(),
                shape: other.shape(),
            }),
        };

        future::ready(res).boxed()
    }
}

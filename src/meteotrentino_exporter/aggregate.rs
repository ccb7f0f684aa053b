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

//! Reduce decoded series into the shapes sinks consume.

use crate::series::{Document, MetricKind, MetricSeries};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// A series had no samples to take a value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no samples for {kind}")]
pub struct EmptySeries {
    pub kind: MetricKind,
}

/// Latest value of each scalar metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSnapshot {
    pub temperature: f64,
    pub humidity: f64,
    pub precipitation: f64,
    pub radiation: f64,
}

/// Every metric that reported a sample at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedPoint {
    pub timestamp: DateTime<Utc>,
    pub station: String,
    pub fields: BTreeMap<MetricKind, f64>,
}

/// Value of the last sample of `series`, in document order.
pub fn latest(series: &MetricSeries) -> Result<f64, EmptySeries> {
    series
        .last()
        .map(|s| s.value)
        .ok_or(EmptySeries { kind: series.kind })
}

impl WeatherSnapshot {
    /// Build a snapshot from the last sample of each scalar series.
    ///
    /// Fails on the first empty series, checked in temperature, humidity,
    /// precipitation, radiation order.
    pub fn from_document(doc: &Document) -> Result<Self, EmptySeries> {
        Ok(WeatherSnapshot {
            temperature: latest(doc.series(MetricKind::Temperature))?,
            humidity: latest(doc.series(MetricKind::Humidity))?,
            precipitation: latest(doc.series(MetricKind::Precipitation))?,
            radiation: latest(doc.series(MetricKind::Radiation))?,
        })
    }
}

/// Merge all series into one point per distinct timestamp, oldest first.
///
/// Samples that share an instant end up as fields of the same point. If a series
/// reports the same instant more than once, its last sample wins.
pub fn points(doc: &Document, station: &str) -> Vec<TimestampedPoint> {
    let mut by_time: BTreeMap<DateTime<Utc>, BTreeMap<MetricKind, f64>> = BTreeMap::new();

    for series in doc.iter() {
        for sample in &series.samples {
            by_time.entry(sample.timestamp).or_default().insert(series.kind, sample.value);
        }
    }

    by_time
        .into_iter()
        .map(|(timestamp, fields)| TimestampedPoint {
            timestamp,
            station: station.to_owned(),
            fields,
        })
        .collect()
}

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

use crate::pool::Reset;
use chrono::{DateTime, Utc};
use std::fmt;

// A day of 10 minute readings plus slack.
const SERIES_CAPACITY: usize = 160;

/// Physical quantity reported by a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    Temperature,
    Humidity,
    Precipitation,
    Radiation,
    WindSpeed,
    WindGust,
    WindDirection,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Temperature,
        MetricKind::Humidity,
        MetricKind::Precipitation,
        MetricKind::Radiation,
        MetricKind::WindSpeed,
        MetricKind::WindGust,
        MetricKind::WindDirection,
    ];

    /// Metric name used for gauges and time-series fields.
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature_celsius",
            MetricKind::Humidity => "humidity_percent",
            MetricKind::Precipitation => "precipitation_mm",
            MetricKind::Radiation => "radiation_watts_per_square_meter",
            MetricKind::WindSpeed => "wind_speed_meters_per_second",
            MetricKind::WindGust => "wind_gust_meters_per_second",
            MetricKind::WindDirection => "wind_direction_degrees",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

/// Readings of one quantity in document order.
///
/// Document order is chronological in practice but nothing here depends on it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricSeries {
    pub fn new(kind: MetricKind) -> Self {
        MetricSeries {
            kind,
            samples: Vec::with_capacity(SERIES_CAPACITY),
        }
    }

    /// Most recent sample by document order.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// All series decoded from one station response.
///
/// Held in a pool between fetch cycles; see `MeteoClient`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    temperature: MetricSeries,
    humidity: MetricSeries,
    precipitation: MetricSeries,
    radiation: MetricSeries,
    wind_speed: MetricSeries,
    wind_gust: MetricSeries,
    wind_direction: MetricSeries,
}

impl Document {
    pub fn new() -> Self {
        Document {
            temperature: MetricSeries::new(MetricKind::Temperature),
            humidity: MetricSeries::new(MetricKind::Humidity),
            precipitation: MetricSeries::new(MetricKind::Precipitation),
            radiation: MetricSeries::new(MetricKind::Radiation),
            wind_speed: MetricSeries::new(MetricKind::WindSpeed),
            wind_gust: MetricSeries::new(MetricKind::WindGust),
            wind_direction: MetricSeries::new(MetricKind::WindDirection),
        }
    }

    pub fn series(&self, kind: MetricKind) -> &MetricSeries {
        match kind {
            MetricKind::Temperature => &self.temperature,
            MetricKind::Humidity => &self.humidity,
            MetricKind::Precipitation => &self.precipitation,
            MetricKind::Radiation => &self.radiation,
            MetricKind::WindSpeed => &self.wind_speed,
            MetricKind::WindGust => &self.wind_gust,
            MetricKind::WindDirection => &self.wind_direction,
        }
    }

    fn series_mut(&mut self, kind: MetricKind) -> &mut MetricSeries {
        match kind {
            MetricKind::Temperature => &mut self.temperature,
            MetricKind::Humidity => &mut self.humidity,
            MetricKind::Precipitation => &mut self.precipitation,
            MetricKind::Radiation => &mut self.radiation,
            MetricKind::WindSpeed => &mut self.wind_speed,
            MetricKind::WindGust => &mut self.wind_gust,
            MetricKind::WindDirection => &mut self.wind_direction,
        }
    }

    /// Append a sample to the series for `kind`.
    pub fn push(&mut self, kind: MetricKind, sample: Sample) {
        self.series_mut(kind).samples.push(sample);
    }

    /// Every series, in `MetricKind::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricSeries> + '_ {
        MetricKind::ALL.into_iter().map(move |kind| self.series(kind))
    }

    /// Total number of samples across all series.
    pub fn sample_count(&self) -> usize {
        self.iter().map(MetricSeries::len).sum()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Reset for Document {
    fn reset(&mut self) {
        for kind in MetricKind::ALL {
            self.series_mut(kind).samples.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, MetricKind, Sample};
    use crate::pool::{Pool, Reset};
    use chrono::{TimeZone, Utc};

    fn sample(value: f64) -> Sample {
        Sample {
            timestamp: Utc.with_ymd_and_hms(2025, 11, 12, 23, 0, 0).unwrap(),
            value,
            unit: "°C".to_owned(),
        }
    }

    #[test]
    fn test_push_routes_by_kind() {
        let mut doc = Document::new();
        doc.push(MetricKind::Temperature, sample(5.2));
        doc.push(MetricKind::WindGust, sample(3.1));

        assert_eq!(1, doc.series(MetricKind::Temperature).len());
        assert_eq!(1, doc.series(MetricKind::WindGust).len());
        assert!(doc.series(MetricKind::Humidity).is_empty());
        assert_eq!(2, doc.sample_count());
    }

    #[test]
    fn test_iter_kind_order() {
        let doc = Document::new();
        let kinds: Vec<MetricKind> = doc.iter().map(|s| s.kind).collect();
        assert_eq!(MetricKind::ALL.to_vec(), kinds);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut doc = Document::new();
        for i in 0..500 {
            doc.push(MetricKind::Radiation, sample(i as f64));
        }

        doc.reset();
        assert_eq!(0, doc.sample_count());
        assert!(doc.series(MetricKind::Radiation).samples.capacity() >= 500);
    }

    #[test]
    fn test_pooled_document_empty_after_reuse() {
        let pool = Pool::new(1, Document::new);
        {
            let mut doc = pool.acquire();
            for kind in MetricKind::ALL {
                doc.push(kind, sample(1.0));
            }
        }

        let doc = pool.acquire();
        for series in doc.iter() {
            assert_eq!(0, series.len(), "{} not reset", series.kind);
        }
    }
}

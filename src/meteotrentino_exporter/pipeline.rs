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

//! One fetch, aggregate, publish cycle.

use crate::aggregate::{self, EmptySeries, TimestampedPoint, WeatherSnapshot};
use crate::client::{ClientError, MeteoClient};
use crate::sink::{Records, Shape, Sink, SinkError};
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("unable to fetch station data")]
    Fetch(#[from] ClientError),

    #[error("unable to build snapshot")]
    Snapshot(#[from] EmptySeries),

    #[error("unable to publish to {sink}")]
    Sink {
        sink: &'static str,
        #[source]
        source: SinkError,
    },
}

impl CycleError {
    /// Render the error and each of its sources on one line, for logging.
    pub fn display_chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

/// Summary of a successful cycle, for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub samples: usize,
    pub points: usize,
    pub newest: Option<DateTime<Utc>>,
}

/// Fetches the latest station readings and hands them to every sink.
///
/// Everything the sinks need is derived from the document before any of them are
/// called: a cycle that cannot build a snapshot publishes nothing at all. Sinks run
/// in the order they were added and the first failure ends the cycle.
pub struct Pipeline {
    client: Arc<MeteoClient>,
    station: String,
    sinks: Vec<Arc<dyn Sink>>,
}

impl Pipeline {
    pub fn new(client: Arc<MeteoClient>, station: &str) -> Self {
        Pipeline {
            client,
            station: station.to_owned(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        let doc = self.client.fetch(cancel).await?;

        let snapshot = if self.wants(Shape::Snapshot) {
            Some(WeatherSnapshot::from_document(&doc)?)
        } else {
            None
        };
        let points: Vec<TimestampedPoint> = if self.wants(Shape::Points) {
            aggregate::points(&doc, &self.station)
        } else {
            Vec::new()
        };

        let report = CycleReport {
            samples: doc.sample_count(),
            points: points.len(),
            newest: doc.iter().flat_map(|s| s.samples.iter()).map(|s| s.timestamp).max(),
        };

        // Back to the pool before waiting on sinks
        drop(doc);

        for sink in &self.sinks {
            let records = match sink.shape() {
                Shape::Points => Records::Points(&points),
                Shape::Snapshot => match &snapshot {
                    Some(s) => Records::Snapshot(s),
                    None => continue,
                },
            };

            tracing::debug!(message = "publishing records", sink = sink.name(), shape = ?records.shape());
            sink.publish(records).await.map_err(|e| CycleError::Sink {
                sink: sink.name(),
                source: e,
            })?;
        }

        Ok(report)
    }

    fn wants(&self, shape: Shape) -> bool {
        self.sinks.iter().any(|s| s.shape() == shape)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks: Vec<&'static str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("client", &self.client)
            .field("station", &self.station)
            .field("sinks", &sinks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleError, Pipeline};
    use crate::aggregate::{EmptySeries, TimestampedPoint, WeatherSnapshot};
    use crate::client::{ClientError, MeteoClient};
    use crate::series::MetricKind;
    use crate::sink::{Records, Shape, Sink, SinkError};
    use crate::testing::serve;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use futures_util::future::{self, BoxFuture, FutureExt};
    use reqwest::{Client, Url};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const LAST_DATA: &str = include_str!("testdata/last_data.xml");
    const MINIMAL: &str = r#"<lastData>
        <temperature_list>
          <air_temperature UM="°C"><date>2025-11-13T00:00:00+01</date><value>5.2</value></air_temperature>
        </temperature_list>
        <relative_humidity_list>
          <relative_humidity UM="%"><date>2025-11-13T00:00:00+01</date><value>80</value></relative_humidity>
        </relative_humidity_list>
    </lastData>"#;

    #[derive(Debug, Default)]
    struct Recorded {
        snapshots: Vec<WeatherSnapshot>,
        points: Vec<Vec<TimestampedPoint>>,
    }

    struct RecordingSink {
        shape: Shape,
        fail: bool,
        recorded: Mutex<Recorded>,
    }

    impl RecordingSink {
        fn new(shape: Shape) -> Arc<Self> {
            Arc::new(RecordingSink {
                shape,
                fail: false,
                recorded: Mutex::new(Recorded::default()),
            })
        }

        fn failing(shape: Shape) -> Arc<Self> {
            Arc::new(RecordingSink {
                shape,
                fail: true,
                recorded: Mutex::new(Recorded::default()),
            })
        }

        fn calls(&self) -> usize {
            let recorded = self.recorded.lock().unwrap();
            recorded.snapshots.len() + recorded.points.len()
        }
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn shape(&self) -> Shape {
            self.shape
        }

        fn publish<'a>(&'a self, records: Records<'a>) -> BoxFuture<'a, Result<(), SinkError>> {
            let mut recorded = self.recorded.lock().unwrap();
            match records {
                Records::Snapshot(s) => recorded.snapshots.push(*s),
                Records::Points(p) => recorded.points.push(p.to_vec()),
            }

            let res = if self.fail {
                Err(SinkError::Unsupported {
                    sink: self.name(),
                    shape: self.shape,
                })
            } else {
                Ok(())
            };
            future::ready(res).boxed()
        }
    }

    async fn pipeline_for(body: &'static str, status: StatusCode) -> Pipeline {
        let app = Router::new().route("/data", get(move || async move { (status, body) }));
        let addr = serve(app).await;
        let base = Url::parse(&format!("http://{}/data", addr)).unwrap();
        let client = MeteoClient::new(Client::new(), &base, "T0129", Duration::from_secs(5));
        Pipeline::new(Arc::new(client), "T0129")
    }

    #[tokio::test]
    async fn test_full_document_reaches_every_sink() {
        let gauges = RecordingSink::new(Shape::Snapshot);
        let influx = RecordingSink::new(Shape::Points);
        let pipeline = pipeline_for(LAST_DATA, StatusCode::OK)
            .await
            .with_sink(gauges.clone())
            .with_sink(influx.clone());

        let report = pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(3, report.points);
        assert_eq!(Some(Utc.with_ymd_and_hms(2025, 11, 12, 23, 30, 0).unwrap()), report.newest);

        let recorded = gauges.recorded.lock().unwrap();
        let snapshots = &recorded.snapshots;
        assert_eq!(1, snapshots.len());
        assert_eq!(4.9, snapshots[0].temperature);
        assert_eq!(82.0, snapshots[0].humidity);

        let recorded = influx.recorded.lock().unwrap();
        let points = &recorded.points;
        assert_eq!(1, points.len());
        assert_eq!(3, points[0].len());
        assert!(points[0].iter().all(|p| p.station == "T0129"));
    }

    #[tokio::test]
    async fn test_empty_series_publishes_nothing() {
        let gauges = RecordingSink::new(Shape::Snapshot);
        let influx = RecordingSink::new(Shape::Points);
        let pipeline = pipeline_for(MINIMAL, StatusCode::OK)
            .await
            .with_sink(influx.clone())
            .with_sink(gauges.clone());

        let res = pipeline.run_once(&CancellationToken::new()).await;
        assert!(matches!(
            res,
            Err(CycleError::Snapshot(EmptySeries {
                kind: MetricKind::Precipitation
            }))
        ));
        assert_eq!(0, gauges.calls());
        assert_eq!(0, influx.calls());
    }

    #[tokio::test]
    async fn test_points_only_tolerates_empty_series() {
        let influx = RecordingSink::new(Shape::Points);
        let pipeline = pipeline_for(MINIMAL, StatusCode::OK).await.with_sink(influx.clone());

        let report = pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(1, report.points);
        assert_eq!(2, report.samples);

        let recorded = influx.recorded.lock().unwrap();
        let points = &recorded.points;
        assert_eq!(1, points.len());
        assert_eq!(2, points[0][0].fields.len());
    }

    #[tokio::test]
    async fn test_fetch_failure_publishes_nothing() {
        let gauges = RecordingSink::new(Shape::Snapshot);
        let influx = RecordingSink::new(Shape::Points);
        let pipeline = pipeline_for("", StatusCode::SERVICE_UNAVAILABLE)
            .await
            .with_sink(gauges.clone())
            .with_sink(influx.clone());

        let res = pipeline.run_once(&CancellationToken::new()).await;
        assert!(matches!(
            res,
            Err(CycleError::Fetch(ClientError::UnexpectedStatus { .. }))
        ));
        assert_eq!(0, gauges.calls());
        assert_eq!(0, influx.calls());
    }

    #[tokio::test]
    async fn test_display_chain_includes_causes() {
        let pipeline = pipeline_for("", StatusCode::SERVICE_UNAVAILABLE)
            .await
            .with_sink(RecordingSink::new(Shape::Snapshot));

        let err = pipeline.run_once(&CancellationToken::new()).await.unwrap_err();
        let chain = err.display_chain();
        assert!(
            chain.starts_with("unable to fetch station data: unexpected status 503"),
            "{}",
            chain
        );
        assert_eq!("unable to fetch station data", err.to_string());
    }

    #[tokio::test]
    async fn test_sink_failure_stops_cycle() {
        let first = RecordingSink::failing(Shape::Points);
        let second = RecordingSink::new(Shape::Snapshot);
        let pipeline = pipeline_for(LAST_DATA, StatusCode::OK)
            .await
            .with_sink(first.clone())
            .with_sink(second.clone());

        let res = pipeline.run_once(&CancellationToken::new()).await;
        assert!(matches!(res, Err(CycleError::Sink { sink: "recording", .. })));
        assert_eq!(1, first.calls());
        assert_eq!(0, second.calls());
    }
}

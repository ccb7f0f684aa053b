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

use crate::aggregate::TimestampedPoint;
use crate::config::InfluxConfig;
use crate::sink::{Records, Shape, Sink, SinkError};
use futures_util::future::{self, BoxFuture, FutureExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt::Write;
use std::time::Duration;

/// Writes points to InfluxDB using line protocol with second precision.
#[derive(Debug)]
pub struct InfluxWriter {
    client: Client,
    write_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl InfluxWriter {
    const MEASUREMENT: &'static str = "meteotrentino";
    const LINE_PROTOCOL: &'static str = "text/plain; charset=utf-8";

    pub fn new(client: Client, config: &InfluxConfig) -> Self {
        let mut write_url = config.url.clone();
        if let Ok(mut path) = write_url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v2", "write"]);
        }

        {
            let mut query = write_url.query_pairs_mut();
            query.append_pair("bucket", &config.database);
            if let Some(org) = &config.org {
                query.append_pair("org", org);
            }
            query.append_pair("precision", "s");
        }

        InfluxWriter {
            client,
            write_url,
            token: config.token.clone(),
            timeout: config.timeout,
        }
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Encode points as line protocol, one line per point, tagged with the upper-cased
    /// station.
    ///
    /// Non-finite values are dropped since line protocol cannot represent them, as are
    /// points left with no fields.
    pub fn encode(&self, points: &[TimestampedPoint]) -> String {
        let mut buf = String::new();

        for point in points {
            let mut fields = point.fields.iter().filter(|(_, v)| v.is_finite()).peekable();
            if fields.peek().is_none() {
                continue;
            }

            buf.push_str(Self::MEASUREMENT);
            buf.push_str(",station=");
            escape_into(&point.station.to_uppercase(), &mut buf);
            buf.push(' ');

            for (i, (kind, value)) in fields.enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                // Writing to a String cannot fail
                let _ = write!(buf, "{}={}", kind.name(), value);
            }

            let _ = writeln!(buf, " {}", point.timestamp.timestamp());
        }

        buf
    }

    pub async fn write(&self, points: &[TimestampedPoint]) -> Result<(), SinkError> {
        let body = self.encode(points);
        if body.is_empty() {
            return Ok(());
        }

        tracing::debug!(message = "writing points", url = %self.write_url, points = points.len());

        let mut req = self
            .client
            .post(self.write_url.clone())
            .header(USER_AGENT, crate::client::MeteoClient::USER_AGENT)
            .header(CONTENT_TYPE, Self::LINE_PROTOCOL)
            .timeout(self.timeout)
            .body(body);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Token {}", token));
        }

        let res = req.send().await.map_err(|e| SinkError::Transport {
            url: self.write_url.clone(),
            source: e,
        })?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }

        let message = match res.json::<WriteFailure>().await {
            Ok(failure) => failure.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_owned(),
        };

        Err(SinkError::Rejected {
            url: self.write_url.clone(),
            status,
            message,
        })
    }
}

impl Sink for InfluxWriter {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn shape(&self) -> Shape {
        Shape::Points
    }

    fn publish<'a>(&'a self, records: Records<'a>) -> BoxFuture<'a, Result<(), SinkError>> {
        match records {
            Records::Points(points) => self.write(points).boxed(),
            other => future::ready(Err(SinkError::Unsupported {
                sink: self.name(),
                shape: other.shape(),
            }))
            .boxed(),
        }
    }
}

/// Error body returned by InfluxDB for rejected writes.
#[derive(Debug, Deserialize)]
struct WriteFailure {
    message: String,
}

/// Escape a tag value: commas, equals signs and spaces are backslash escaped.
fn escape_into(s: &str, buf: &mut String) {
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            buf.push('\\');
        }
        buf.push(c);
    }
}

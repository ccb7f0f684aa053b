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

//! Destinations for the results of a fetch cycle.

use crate::aggregate::{TimestampedPoint, WeatherSnapshot};
use futures_util::future::BoxFuture;
use reqwest::{StatusCode, Url};
use thiserror::Error;

/// Shape of the records a sink consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Latest value per metric
    Snapshot,
    /// One record per distinct timestamp
    Points,
}

/// Records handed to a sink, always in the `Shape` it asked for.
#[derive(Debug, Clone, Copy)]
pub enum Records<'a> {
    Snapshot(&'a WeatherSnapshot),
    Points(&'a [TimestampedPoint]),
}

impl<'a> Records<'a> {
    pub fn shape(&self) -> Shape {
        match self {
            Records::Snapshot(_) => Shape::Snapshot,
            Records::Points(_) => Shape::Points,
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to {url} failed")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} rejected write with status {status}: {message}")]
    Rejected {
        url: Url,
        status: StatusCode,
        message: String,
    },

    #[error("sink {sink} does not accept {shape:?} records")]
    Unsupported { sink: &'static str, shape: Shape },
}

/// A place fetch cycle results are published to.
pub trait Sink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn shape(&self) -> Shape;

    fn publish<'a>(&'a self, records: Records<'a>) -> BoxFuture<'a, Result<(), SinkError>>;
}

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

//! Parsing of timestamps reported by stations.
//!
//! Stations report times like `2025-11-13T00:00:00+01`: an offset with hours only,
//! which RFC 3339 parsers reject. Full RFC 3339 values and values without any zone
//! are accepted too. Values without a zone are read as station local time, a fixed
//! UTC+01:00 (stations report in standard time all year, there is no daylight
//! saving shift).

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// Offset of station local time from UTC, in seconds.
pub const STATION_OFFSET_SECS: i32 = 3600;

/// None of the accepted layouts matched the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable timestamp {raw:?}")]
pub struct TimestampError {
    pub raw: String,
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    HourOffset,
    Rfc3339,
    StationLocal,
}

// Tried in order, first match wins.
const LAYOUTS: [Layout; 3] = [Layout::HourOffset, Layout::Rfc3339, Layout::StationLocal];

impl Layout {
    fn parse(self, s: &str) -> Option<DateTime<Utc>> {
        let parsed = match self {
            // %#z accepts an offset with or without minutes, e.g. "+01"
            Layout::HourOffset => DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%#z").ok(),
            Layout::Rfc3339 => DateTime::parse_from_rfc3339(s).ok(),
            Layout::StationLocal => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .and_then(|naive| station_offset().and_then(|tz| tz.from_local_datetime(&naive).single())),
        };

        parsed.map(|t| t.with_timezone(&Utc))
    }
}

fn station_offset() -> Option<FixedOffset> {
    FixedOffset::east_opt(STATION_OFFSET_SECS)
}

/// Parse a station timestamp into an absolute instant.
///
/// Surrounding whitespace is ignored. Fails with the offending string when no layout
/// matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let s = raw.trim();
    LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(s))
        .ok_or_else(|| TimestampError { raw: raw.to_owned() })
}

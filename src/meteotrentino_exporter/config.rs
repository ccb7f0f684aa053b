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

//! Command line and environment configuration.

use clap::{Parser, ValueEnum};
use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

pub const DEFAULT_API_URL: &str = "http://dati.meteotrentino.it/service.asmx/getLastDataOfMeteoStation";
const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3000);
const DEFAULT_REFRESH_SECS: u64 = 900;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable, for development
    Text,
    /// One JSON object per line, for production
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("station must not be empty")]
    MissingStation,

    #[error("invalid {name} {url:?}: {reason}")]
    InvalidUrl {
        name: &'static str,
        url: String,
        reason: String,
    },

    #[error("--influxdb-url is required when InfluxDB is enabled")]
    MissingInfluxUrl,

    #[error("--influxdb-database is required when InfluxDB is enabled")]
    MissingInfluxDatabase,

    #[error("--refresh-secs must be greater than zero")]
    ZeroRefresh,

    #[error("{option} must be greater than zero")]
    ZeroTimeout { option: &'static str },
}

#[derive(Debug, Parser)]
#[clap(name = "meteotrentino_exporter", version = clap::crate_version!())]
pub struct ExporterApplication {
    /// Meteotrentino station code to fetch readings for (e.g. T0129). Codes are listed at
    /// https://content.meteotrentino.it/dati-meteo/stazioni/dati-meteo.html
    #[clap(long, env = "STATION")]
    station: String,

    /// URL of the Meteotrentino "last data of station" service
    #[clap(long, env = "API_URL", default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Logging output format
    #[clap(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Fetch station data at this interval, in seconds.
    #[clap(long, env = "REFRESH_SECS", default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    /// Timeout for fetching and decoding station data, in milliseconds.
    #[clap(long, env = "TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to. By default, meteotrentino_exporter will bind to public address
    /// since the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, env = "METRICS_SERVER", default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,

    /// Fetch fresh station data on every request to /metrics, in addition to polling
    #[clap(long, env = "SCRAPE_FETCH")]
    scrape_fetch: bool,

    /// Run a single fetch cycle, publish it, and exit without starting the HTTP server
    #[clap(long)]
    oneshot: bool,

    /// Also write every fetched reading to InfluxDB
    #[clap(long, env = "ENABLE_INFLUXDB")]
    enable_influxdb: bool,

    /// Base URL of the InfluxDB server
    #[clap(long, env = "INFLUXDB_URL")]
    influxdb_url: Option<String>,

    /// InfluxDB database (bucket) to write to
    #[clap(long, env = "INFLUXDB_DATABASE")]
    influxdb_database: Option<String>,

    /// InfluxDB organization
    #[clap(long, env = "INFLUXDB_ORG")]
    influxdb_org: Option<String>,

    /// InfluxDB API token
    #[clap(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    influxdb_token: Option<String>,

    /// Timeout for each write to InfluxDB, in milliseconds.
    #[clap(long, env = "INFLUXDB_TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    influxdb_timeout_millis: u64,
}

/// Validated settings, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub station: String,
    pub api_url: Url,
    pub log_level: Level,
    pub log_format: LogFormat,
    pub refresh: Duration,
    pub timeout: Duration,
    pub bind: SocketAddr,
    pub scrape_fetch: bool,
    pub oneshot: bool,
    pub influxdb: Option<InfluxConfig>,
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: Url,
    pub database: String,
    pub org: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ExporterApplication {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let station = self.station.trim();
        if station.is_empty() {
            return Err(ConfigError::MissingStation);
        }

        if self.refresh_secs == 0 {
            return Err(ConfigError::ZeroRefresh);
        }

        if self.timeout_millis == 0 {
            return Err(ConfigError::ZeroTimeout {
                option: "--timeout-millis",
            });
        }

        let influxdb = if self.enable_influxdb {
            let url = non_blank(self.influxdb_url).ok_or(ConfigError::MissingInfluxUrl)?;
            if self.influxdb_timeout_millis == 0 {
                return Err(ConfigError::ZeroTimeout {
                    option: "--influxdb-timeout-millis",
                });
            }

            Some(InfluxConfig {
                url: parse_http_url("InfluxDB URL", &url)?,
                database: non_blank(self.influxdb_database).ok_or(ConfigError::MissingInfluxDatabase)?,
                org: non_blank(self.influxdb_org),
                token: non_blank(self.influxdb_token),
                timeout: Duration::from_millis(self.influxdb_timeout_millis),
            })
        } else {
            None
        };

        Ok(Config {
            station: station.to_owned(),
            api_url: parse_http_url("API URL", &self.api_url)?,
            log_level: self.log_level,
            log_format: self.log_format,
            refresh: Duration::from_secs(self.refresh_secs),
            timeout: Duration::from_millis(self.timeout_millis),
            bind: self.bind,
            scrape_fetch: self.scrape_fetch,
            oneshot: self.oneshot,
            influxdb,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

fn parse_http_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        name,
        url: raw.to_owned(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if !url.cannot_be_a_base() => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme {}", scheme))),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ExporterApplication, LogFormat, DEFAULT_API_URL};
    use clap::Parser;
    use std::time::Duration;
    use tracing::Level;

    fn parse(args: &[&str]) -> ExporterApplication {
        let mut argv = vec!["meteotrentino_exporter"];
        argv.extend_from_slice(args);
        ExporterApplication::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--station", "T0129"]).into_config().unwrap();

        assert_eq!("T0129", config.station);
        assert_eq!(DEFAULT_API_URL, config.api_url.as_str());
        assert_eq!(Level::INFO, config.log_level);
        assert_eq!(LogFormat::Text, config.log_format);
        assert_eq!(Duration::from_secs(900), config.refresh);
        assert_eq!(Duration::from_millis(5000), config.timeout);
        assert_eq!("0.0.0.0:3000", config.bind.to_string());
        assert!(!config.scrape_fetch);
        assert!(!config.oneshot);
        assert!(config.influxdb.is_none());
    }

    #[test]
    fn test_blank_station() {
        let res = parse(&["--station", "  "]).into_config();
        assert!(matches!(res, Err(ConfigError::MissingStation)));
    }

    #[test]
    fn test_zero_refresh() {
        let res = parse(&["--station", "T0129", "--refresh-secs", "0"]).into_config();
        assert!(matches!(res, Err(ConfigError::ZeroRefresh)));
    }

    #[test]
    fn test_zero_timeout() {
        let res = parse(&["--station", "T0129", "--timeout-millis", "0"]).into_config();
        assert!(matches!(
            res,
            Err(ConfigError::ZeroTimeout {
                option: "--timeout-millis"
            })
        ));

        let res = parse(&[
            "--station",
            "T0129",
            "--enable-influxdb",
            "--influxdb-url",
            "http://localhost:8181",
            "--influxdb-database",
            "weather",
            "--influxdb-timeout-millis",
            "0",
        ])
        .into_config();
        assert!(matches!(
            res,
            Err(ConfigError::ZeroTimeout {
                option: "--influxdb-timeout-millis"
            })
        ));
    }

    #[test]
    fn test_invalid_api_url() {
        let res = parse(&["--station", "T0129", "--api-url", "ftp://example.com/"]).into_config();
        assert!(matches!(res, Err(ConfigError::InvalidUrl { name: "API URL", .. })));

        let res = parse(&["--station", "T0129", "--api-url", "not a url"]).into_config();
        assert!(matches!(res, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_influxdb_requires_url() {
        let res = parse(&["--station", "T0129", "--enable-influxdb"]).into_config();
        assert!(matches!(res, Err(ConfigError::MissingInfluxUrl)));
    }

    #[test]
    fn test_influxdb_requires_database() {
        let res = parse(&[
            "--station",
            "T0129",
            "--enable-influxdb",
            "--influxdb-url",
            "http://localhost:8181",
        ])
        .into_config();
        assert!(matches!(res, Err(ConfigError::MissingInfluxDatabase)));
    }

    #[test]
    fn test_influxdb_config() {
        let config = parse(&[
            "--station",
            "T0129",
            "--enable-influxdb",
            "--influxdb-url",
            "http://localhost:8181",
            "--influxdb-database",
            "weather",
            "--influxdb-org",
            "",
            "--influxdb-token",
            "s3cret",
        ])
        .into_config()
        .unwrap();

        let influx = config.influxdb.unwrap();
        assert_eq!("http://localhost:8181/", influx.url.as_str());
        assert_eq!("weather", influx.database);
        assert_eq!(None, influx.org);
        assert_eq!(Some("s3cret".to_owned()), influx.token);
        assert_eq!(Duration::from_millis(5000), influx.timeout);
    }

    #[test]
    fn test_influxdb_options_ignored_when_disabled() {
        let config = parse(&["--station", "T0129", "--influxdb-url", "http://localhost:8181"])
            .into_config()
            .unwrap();
        assert!(config.influxdb.is_none());
    }

    #[test]
    fn test_log_options() {
        let config = parse(&["--station", "T0129", "--log-level", "debug", "--log-format", "json"])
            .into_config()
            .unwrap();
        assert_eq!(Level::DEBUG, config.log_level);
        assert_eq!(LogFormat::Json, config.log_format);
    }
}

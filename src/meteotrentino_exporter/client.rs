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

use crate::decode::{decode, DecodeError, ElementError, Scratch};
use crate::pool::{Pool, Pooled};
use crate::series::Document;
use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus { status: StatusCode, url: Url },

    #[error("no complete response from {url} within {timeout:?}")]
    Timeout { url: Url, timeout: Duration },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("connection to {url} failed while reading the response")]
    Body {
        url: Url,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid response from {url}")]
    Decode {
        url: Url,
        #[source]
        source: DecodeError,
    },
}

/// Client for the latest readings of a single Meteotrentino station.
///
/// Decoded documents and decoder buffers are pooled and reused between fetches.
#[derive(Debug)]
pub struct MeteoClient {
    client: Client,
    station_url: Url,
    timeout: Duration,
    documents: Pool<Document>,
    buffers: Pool<Scratch>,
}

impl MeteoClient {
    pub const USER_AGENT: &'static str = concat!(
        "meteotrentino_exporter/",
        env!("CARGO_PKG_VERSION"),
        " (https://github.com/meteotrentino-exporter/meteotrentino_exporter)"
    );
    const XML_RESPONSE: &'static str = "text/xml, application/xml;q=0.9";
    // Fetches overlap only when a scrape lands during a poll
    const MAX_IDLE: usize = 2;

    /// Create a client for `station`. Readings are requested from `base_url` with the
    /// station as its `codice` query parameter.
    pub fn new(client: Client, base_url: &Url, station: &str, timeout: Duration) -> Self {
        let mut station_url = base_url.clone();
        station_url.query_pairs_mut().append_pair("codice", station);

        MeteoClient {
            client,
            station_url,
            timeout,
            documents: Pool::new(Self::MAX_IDLE, Document::new),
            buffers: Pool::new(Self::MAX_IDLE, Scratch::new),
        }
    }

    pub fn station_url(&self) -> &Url {
        &self.station_url
    }

    /// Fetch and decode the latest readings of the station.
    ///
    /// The whole exchange, including reading the body, must complete within the
    /// configured timeout. The returned document goes back to the pool when dropped,
    /// as does every document from a failed fetch.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Pooled<'_, Document>, ClientError> {
        let mut doc = self.documents.acquire();
        let mut scratch = self.buffers.acquire();

        tracing::debug!(message = "making latest data request", url = %self.station_url);

        let res = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.fetch_into(&mut doc, &mut scratch)) => {
                res.unwrap_or_else(|_| Err(ClientError::Timeout {
                    url: self.station_url.clone(),
                    timeout: self.timeout,
                }))
            }
        };
        res?;

        tracing::debug!(message = "decoded latest data", samples = doc.sample_count());
        Ok(doc)
    }

    async fn fetch_into(&self, doc: &mut Document, scratch: &mut Scratch) -> Result<(), ClientError> {
        let res = self
            .client
            .get(self.station_url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::XML_RESPONSE)
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                url: self.station_url.clone(),
                source: e,
            })?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(ClientError::UnexpectedStatus {
                status,
                url: self.station_url.clone(),
            });
        }

        // Body chunks are decoded as they arrive instead of buffering the response
        let body = Box::pin(res.bytes_stream().map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
        decode(StreamReader::new(body), doc, scratch)
            .await
            .map_err(|e| match read_failure(e) {
                Ok(source) => ClientError::Body {
                    url: self.station_url.clone(),
                    source,
                },
                Err(e) => ClientError::Decode {
                    url: self.station_url.clone(),
                    source: e,
                },
            })
    }
}

/// Split body read failures out of decode errors, they are not the document's fault.
fn read_failure(e: DecodeError) -> Result<Arc<io::Error>, DecodeError> {
    match e {
        DecodeError::Document(quick_xml::Error::Io(source))
        | DecodeError::Element {
            cause: ElementError::Markup(quick_xml::Error::Io(source)),
            ..
        } => Ok(source),
        e => Err(e),
    }
}

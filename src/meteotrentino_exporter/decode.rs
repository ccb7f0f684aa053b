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

//! Streaming decoder for station responses.
//!
//! Responses are loosely generated markup: HTML style unclosed elements, bare
//! ampersands and HTML entities all show up. The decoder does not validate the
//! document structure. It watches for the entry elements it knows, no matter where
//! they are nested, reads the children it needs out of each one and ignores
//! everything else.

use crate::pool::Reset;
use crate::series::{Document, MetricKind, Sample};
use crate::time::{parse_timestamp, TimestampError};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tokio::io::AsyncBufRead;

const EVENT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Entry element of a station response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    AirTemperature,
    Precipitation,
    Wind,
    GlobalRadiation,
    RelativeHumidity,
}

impl ElementKind {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"air_temperature" => Some(ElementKind::AirTemperature),
            b"precipitation" => Some(ElementKind::Precipitation),
            b"wind10m" => Some(ElementKind::Wind),
            b"global_radiation" => Some(ElementKind::GlobalRadiation),
            b"relative_humidity" => Some(ElementKind::RelativeHumidity),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ElementKind::AirTemperature => "air_temperature",
            ElementKind::Precipitation => "precipitation",
            ElementKind::Wind => "wind10m",
            ElementKind::GlobalRadiation => "global_radiation",
            ElementKind::RelativeHumidity => "relative_humidity",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Why a single entry element could not be turned into samples.
#[derive(Debug, Error)]
pub enum ElementError {
    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error("missing <{0}>")]
    MissingField(&'static str),

    #[error("invalid number {raw:?} in <{field}>")]
    InvalidNumber { field: &'static str, raw: String },

    #[error("document ended inside element")]
    UnexpectedEof,

    #[error("malformed markup")]
    Markup(#[source] quick_xml::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// One entry could not be decoded. The whole document is rejected.
    #[error("error decoding {kind} element")]
    Element {
        kind: ElementKind,
        #[source]
        cause: ElementError,
    },

    #[error("malformed document")]
    Document(#[source] quick_xml::Error),
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Date,
    Value,
    Speed,
    Gust,
    Direction,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"date" => Some(Field::Date),
            b"value" => Some(Field::Value),
            b"speed_value" => Some(Field::Speed),
            b"windgust" => Some(Field::Gust),
            b"direction_value" => Some(Field::Direction),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Value => "value",
            Field::Speed => "speed_value",
            Field::Gust => "windgust",
            Field::Direction => "direction_value",
        }
    }
}

#[derive(Debug, Default)]
struct Fields {
    date: String,
    value: String,
    speed: String,
    gust: String,
    direction: String,
}

impl Fields {
    fn get(&self, field: Field) -> &str {
        match field {
            Field::Date => &self.date,
            Field::Value => &self.value,
            Field::Speed => &self.speed,
            Field::Gust => &self.gust,
            Field::Direction => &self.direction,
        }
    }

    fn get_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Date => &mut self.date,
            Field::Value => &mut self.value,
            Field::Speed => &mut self.speed,
            Field::Gust => &mut self.gust,
            Field::Direction => &mut self.direction,
        }
    }

    fn required(&self, field: Field) -> Result<&str, ElementError> {
        let s = self.get(field).trim();
        if s.is_empty() {
            Err(ElementError::MissingField(field.tag()))
        } else {
            Ok(s)
        }
    }

    fn number(&self, field: Field) -> Result<f64, ElementError> {
        let s = self.required(field)?;
        s.parse().map_err(|_| ElementError::InvalidNumber {
            field: field.tag(),
            raw: s.to_owned(),
        })
    }

    fn optional_number(&self, field: Field) -> Result<Option<f64>, ElementError> {
        match self.number(field) {
            Ok(v) => Ok(Some(v)),
            Err(ElementError::MissingField(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clear(&mut self) {
        self.date.clear();
        self.value.clear();
        self.speed.clear();
        self.gust.clear();
        self.direction.clear();
    }
}

/// Units of measure, from the attributes of an entry element.
#[derive(Debug, Default)]
struct Units {
    value: String,
    speed: String,
    gust: String,
    direction: String,
}

impl Units {
    fn read(&mut self, start: &BytesStart<'_>) {
        self.clear();

        let mut attributes = start.attributes();
        attributes.with_checks(false);

        for attr in attributes.flatten() {
            let slot = match attr.key.local_name().as_ref() {
                b"UM" => &mut self.value,
                b"UM_speed" => &mut self.speed,
                b"UM_windgust" => &mut self.gust,
                b"UM_direction" => &mut self.direction,
                _ => continue,
            };

            match attr.unescape_value() {
                Ok(v) => slot.push_str(&v),
                Err(_) => slot.push_str(&String::from_utf8_lossy(&attr.value)),
            }
        }
    }

    fn clear(&mut self) {
        self.value.clear();
        self.speed.clear();
        self.gust.clear();
        self.direction.clear();
    }
}

/// Scratch space for one decode, reused between cycles through a `Pool`.
#[derive(Debug)]
pub struct Scratch {
    events: Vec<u8>,
    fields: Fields,
    units: Units,
    // Names of open elements inside the current entry that are not fields
    children: Vec<Vec<u8>>,
}

impl Scratch {
    pub fn new() -> Self {
        Scratch {
            events: Vec::with_capacity(EVENT_BUFFER_CAPACITY),
            fields: Fields::default(),
            units: Units::default(),
            children: Vec::new(),
        }
    }

    /// Bytes currently allocated for reading markup events.
    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Reset for Scratch {
    fn reset(&mut self) {
        self.events.clear();
        self.fields.clear();
        self.units.clear();
        self.children.clear();
    }
}

/// Decode a station response from `source`, appending samples to `doc`.
///
/// Reading stops at the end of the stream. An entry ends at its own closing tag, at
/// the start of the next entry, or at a closing tag of an element it is nested in,
/// so entries that were never closed still produce their sample. The first entry
/// that cannot be decoded fails the whole document; samples already appended to
/// `doc` are left in place and must be discarded by the caller.
pub async fn decode<R>(source: R, doc: &mut Document, scratch: &mut Scratch) -> Result<(), DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true).check_end_names(false);

    let Scratch {
        events,
        fields,
        units,
        children,
    } = scratch;
    let mut open: Option<ElementKind> = None;
    let mut current: Option<Field> = None;

    loop {
        match reader.read_event_into_async(events).await {
            Ok(Event::Start(start)) => {
                let name = start.local_name();
                if let Some(kind) = ElementKind::from_local_name(name.as_ref()) {
                    if let Some(prev) = open.take() {
                        finish_entry(doc, prev, fields, units)?;
                    }
                    units.read(&start);
                    fields.clear();
                    children.clear();
                    current = None;
                    open = Some(kind);
                } else if open.is_some() {
                    current = Field::from_local_name(name.as_ref());
                    match current {
                        Some(field) => fields.get_mut(field).clear(),
                        None => children.push(name.as_ref().to_vec()),
                    }
                }
            }
            Ok(Event::Text(text)) => {
                if let (Some(_), Some(field)) = (open, current) {
                    fields.get_mut(field).push_str(&unescape_text(&text));
                }
            }
            Ok(Event::CData(data)) => {
                if let (Some(_), Some(field)) = (open, current) {
                    fields.get_mut(field).push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::End(end)) => {
                if let Some(kind) = open {
                    let name = end.local_name();
                    if Field::from_local_name(name.as_ref()).is_some() {
                        current = None;
                    } else if let Some(pos) = children.iter().rposition(|c| c.as_slice() == name.as_ref()) {
                        // Also drops children that were never closed, like <br>
                        children.truncate(pos);
                        current = None;
                    } else {
                        open = None;
                        current = None;
                        finish_entry(doc, kind, fields, units)?;
                    }
                }
            }
            Ok(Event::Eof) => {
                return match open {
                    Some(kind) => Err(DecodeError::Element {
                        kind,
                        cause: ElementError::UnexpectedEof,
                    }),
                    None => Ok(()),
                };
            }
            // Self-closed elements carry no reading
            Ok(_) => {}
            Err(e) => {
                return Err(match open {
                    Some(kind) => DecodeError::Element {
                        kind,
                        cause: ElementError::Markup(e),
                    },
                    None => DecodeError::Document(e),
                });
            }
        }
        events.clear();
    }
}

fn unescape_text<'a>(text: &'a BytesText<'_>) -> Cow<'a, str> {
    match text.unescape() {
        Ok(s) => s,
        // Bare '&' and unknown entities are kept as written
        Err(_) => String::from_utf8_lossy(text),
    }
}

fn finish_entry(doc: &mut Document, kind: ElementKind, fields: &Fields, units: &Units) -> Result<(), DecodeError> {
    push_samples(doc, kind, fields, units).map_err(|cause| DecodeError::Element { kind, cause })
}

fn push_samples(doc: &mut Document, kind: ElementKind, fields: &Fields, units: &Units) -> Result<(), ElementError> {
    let timestamp = parse_timestamp(fields.required(Field::Date)?)?;

    let metric = match kind {
        ElementKind::AirTemperature => MetricKind::Temperature,
        ElementKind::Precipitation => MetricKind::Precipitation,
        ElementKind::GlobalRadiation => MetricKind::Radiation,
        ElementKind::RelativeHumidity => MetricKind::Humidity,
        ElementKind::Wind => {
            // Parse everything before pushing anything so a bad entry adds nothing
            let readings = [
                (MetricKind::WindSpeed, fields.optional_number(Field::Speed)?, &units.speed),
                (MetricKind::WindGust, fields.optional_number(Field::Gust)?, &units.gust),
                (MetricKind::WindDirection, fields.optional_number(Field::Direction)?, &units.direction),
            ];

            for (metric, value, unit) in readings {
                if let Some(value) = value {
                    doc.push(
                        metric,
                        Sample {
                            timestamp,
                            value,
                            unit: unit.clone(),
                        },
                    );
                }
            }

            return Ok(());
        }
    };

    let value = fields.number(Field::Value)?;
    doc.push(
        metric,
        Sample {
            timestamp,
            value,
            unit: units.value.clone(),
        },
    );

    Ok(())
}

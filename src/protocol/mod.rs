/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! StatsD line protocol parsing
//!
//! Each line of a datagram carries one metric:
//!
//! ```text
//! <name>:[+|-]<value>|<type>[|@<rate>]
//! ```
//!
//! `name` consists of ASCII word characters and periods, `value` is an
//! unsigned decimal number, `type` is one of `c`, `g`, `ms` or `s`. Further
//! `|`-separated components other than the sample rate are ignored.

use crate::model::{Metric, MetricKind};
use thiserror::Error;

/// Classified failure to parse a protocol line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line does not follow the protocol grammar
    #[error("packet does not match the metric format")]
    MalformedPacket,

    /// The type code is well-formed but not supported
    #[error("unsupported metric type `{0}`")]
    UnsupportedType(String),

    /// A numeric field could not be converted to a finite number
    #[error("invalid numeric field `{0}`")]
    NumericConversionFailed(String),
}

/// Parses a single protocol line into a metric.
///
/// The caller splits batched datagrams; see [`parse_all`]. A trailing `\r`
/// is tolerated.
///
/// # Example
///
/// ```
/// use statsd_aggregator::model::MetricKind;
/// use statsd_aggregator::protocol::parse;
///
/// let metric = parse(b"api.requests:1|c|@0.5").expect("metric should parse");
/// assert_eq!(metric.name, "api.requests");
/// assert_eq!(metric.kind, MetricKind::Counter);
/// assert_eq!(metric.sample_rate, 0.5);
/// ```
pub fn parse(line: &[u8]) -> Result<Metric<'_>, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedPacket)?;
    parse_str(line.strip_suffix('\r').unwrap_or(line))
}

/// Splits a datagram on newlines and parses every non-empty line.
///
/// One malformed line does not affect its siblings; the iterator yields an
/// `Err` for it and continues.
pub fn parse_all<'a>(
    datagram: &'a [u8],
) -> impl Iterator<Item = (&'a [u8], Result<Metric<'a>, ParseError>)> {
    datagram
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty() && *line != b"\r")
        .map(|line| (line, parse(line)))
}

fn parse_str(line: &str) -> Result<Metric<'_>, ParseError> {
    let (name, rest) = line.split_once(':').ok_or(ParseError::MalformedPacket)?;
    if !is_valid_name(name) {
        return Err(ParseError::MalformedPacket);
    }

    let mut components = rest.split('|');
    let value_str = components.next().ok_or(ParseError::MalformedPacket)?;
    let code = components.next().ok_or(ParseError::MalformedPacket)?;

    let (negative, magnitude) = match value_str.as_bytes().first() {
        Some(b'-') => (true, &value_str[1..]),
        Some(b'+') => (false, &value_str[1..]),
        _ => (false, value_str),
    };
    if !is_decimal(magnitude) || !is_word(code) {
        return Err(ParseError::MalformedPacket);
    }

    let kind =
        MetricKind::from_code(code).ok_or_else(|| ParseError::UnsupportedType(code.to_owned()))?;
    let mut value = parse_number(magnitude)?;

    // Counters are always additive; a sign only negates the other kinds.
    if negative && kind != MetricKind::Counter {
        value = -value;
    }

    let mut metric = Metric::new(name, value, kind);
    for component in components {
        if let Some(rate) = component.strip_prefix('@') {
            if !is_decimal(rate) {
                return Err(ParseError::MalformedPacket);
            }
            metric.sample_rate = parse_number(rate)?;
        }
    }

    Ok(metric)
}

fn parse_number(string: &str) -> Result<f64, ParseError> {
    string
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ParseError::NumericConversionFailed(string.to_owned()))
}

fn is_word(string: &str) -> bool {
    !string.is_empty()
        && string
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.'))
}

/// Coarse lexical check; conversion failures are reported separately.
fn is_decimal(string: &str) -> bool {
    !string.is_empty() && string.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

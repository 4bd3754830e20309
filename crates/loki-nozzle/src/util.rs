// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small parsing and formatting helpers shared by the nozzle.

use serde::Deserialize;
use std::time::Duration;

/// A 128-bit identifier split into two little-endian halves, as carried by
/// firehose envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Uuid {
    pub low: u64,
    pub high: u64,
}

/// Formats an envelope UUID in the canonical 8-4-4-4-12 hex layout.
///
/// # Examples
///
/// ```
/// use loki_nozzle::util::{format_uuid, Uuid};
///
/// assert_eq!(
///     format_uuid(&Uuid { low: 0, high: 0 }),
///     "00000000-0000-0000-0000-000000000000"
/// );
/// ```
pub fn format_uuid(uuid: &Uuid) -> String {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&uuid.low.to_le_bytes());
    bytes[8..].copy_from_slice(&uuid.high.to_le_bytes());

    let hex = |range: &[u8]| range.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!(
        "{}-{}-{}-{}-{}",
        hex(&bytes[0..4]),
        hex(&bytes[4..6]),
        hex(&bytes[6..8]),
        hex(&bytes[8..10]),
        hex(&bytes[10..16])
    )
}

/// Parses a duration string such as `100ms`, `30s`, `5m`, `1h` or `1d`.
///
/// A bare number is read as seconds. Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let num_end = s
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());

    let (num_str, unit) = s.split_at(num_end);
    let num: f64 = num_str.parse().ok()?;

    let nanos_per_unit = match unit.trim() {
        "ms" => 1e6,
        "" | "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 60.0 * 60.0 * 1e9,
        "d" => 24.0 * 60.0 * 60.0 * 1e9,
        _ => return None,
    };

    Some(Duration::from_nanos((num * nanos_per_unit).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uuid_zero() {
        assert_eq!(
            format_uuid(&Uuid::default()),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_format_uuid_byte_order() {
        let uuid = Uuid {
            low: 0x0807_0605_0403_0201,
            high: 0x100f_0e0d_0c0b_0a09,
        };
        assert_eq!(format_uuid(&uuid), "01020304-0506-0708-090a-0b0c0d0e0f10");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration(" 15 "), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10y"), None);
        assert_eq!(parse_duration("s"), None);
    }
}

//! NMEA GGA sentence decoding.
//!
//! GPS channels carry the receiver's raw NMEA output. Only the GGA fix
//! sentence is needed: its UTC time is what ties two devices' clocks together.
//! A sentence whose XOR checksum does not match is rejected like any other
//! malformed sentence.

use std::str::FromStr;

use chrono::NaiveTime;

use crate::types::GpsPacket;
use crate::{Result, TelemetryError};

/// Fix quality indicator of a GGA sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    Invalid = 0,
    Gps = 1,
    Dgps = 2,
    Pps = 3,
    RealTimeKinematic = 4,
    FloatRtk = 5,
    Estimated = 6,
    ManualInput = 7,
    Simulation = 8,
}

impl FixQuality {
    fn from_digit(value: u8) -> Option<Self> {
        Some(match value {
            0 => FixQuality::Invalid,
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::RealTimeKinematic,
            5 => FixQuality::FloatRtk,
            6 => FixQuality::Estimated,
            7 => FixQuality::ManualInput,
            8 => FixQuality::Simulation,
            _ => return None,
        })
    }
}

/// Decoded GGA fix.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaSentence {
    /// Talker id, `GP` for GPS or `GN` for multi-constellation receivers.
    pub talker: String,
    /// UTC time of the fix, whole seconds.
    pub time: NaiveTime,
    /// Signed decimal degrees, south negative.
    pub latitude: f64,
    /// Signed decimal degrees, west negative.
    pub longitude: f64,
    pub fix_quality: FixQuality,
    pub satellites: u8,
    pub hdop: f64,
    /// Metres above mean sea level.
    pub altitude: f64,
    pub geoid_separation: f64,
    pub dgps_age: Option<f64>,
    pub dgps_station: Option<u16>,
    pub checksum: u8,
}

impl GgaSentence {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let body = text
            .strip_prefix('$')
            .ok_or_else(|| gps_error(format!("sentence does not start with '$': {:?}", text)))?;
        let (body, checksum_text) =
            body.split_once('*').ok_or_else(|| gps_error("sentence has no checksum"))?;

        let checksum = checksum_text
            .get(..2)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| gps_error(format!("invalid checksum field {:?}", checksum_text)))?;
        let computed = nmea_checksum(body);
        if computed != checksum {
            return Err(gps_error(format!(
                "checksum mismatch: sentence says {:02X}, computed {:02X}",
                checksum, computed
            )));
        }

        let fields: Vec<&str> = body.split(',').collect();
        let address = fields[0];
        if address.len() != 5 || !address.ends_with("GGA") {
            return Err(gps_error(format!("not a GGA sentence: {}", address)));
        }
        if fields.len() < 15 {
            return Err(gps_error(format!("GGA needs 15 fields, found {}", fields.len())));
        }

        let time_field = fields[1];
        let time = time_field
            .get(..6)
            .and_then(|hms| NaiveTime::parse_from_str(hms, "%H%M%S").ok())
            .ok_or_else(|| gps_error(format!("invalid UTC time {:?}", time_field)))?;

        let latitude = coordinate(fields[2], fields[3], 'N', 'S', 2)?;
        let longitude = coordinate(fields[4], fields[5], 'E', 'W', 3)?;

        let quality: u8 = number(fields[6], "fix quality")?;
        let fix_quality = FixQuality::from_digit(quality)
            .ok_or_else(|| gps_error(format!("unknown fix quality {}", quality)))?;

        let talker = address.get(..2).unwrap_or_default().to_string();

        Ok(Self {
            talker,
            time,
            latitude,
            longitude,
            fix_quality,
            satellites: number(fields[7], "satellite count")?,
            hdop: number(fields[8], "HDOP")?,
            altitude: number(fields[9], "altitude")?,
            geoid_separation: optional(fields[11], "geoid separation")?.unwrap_or(0.0),
            dgps_age: optional(fields[13], "DGPS age")?,
            dgps_station: optional(fields[14], "DGPS station")?,
            checksum,
        })
    }
}

impl GpsPacket {
    /// First GGA sentence in this packet's message that decodes.
    pub fn gga(&self) -> Result<GgaSentence> {
        let mut last_error = None;
        for line in self.message.split(['\r', '\n']).filter(|l| l.contains("GGA")) {
            match GgaSentence::parse(line) {
                Ok(sentence) => return Ok(sentence),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| gps_error("no GGA sentence in GPS message")))
    }
}

/// XOR of every byte between `$` and `*`.
pub fn nmea_checksum(body: &str) -> u8 {
    let body = body.strip_prefix('$').unwrap_or(body);
    let body = body.split('*').next().unwrap_or(body);
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn coordinate(
    value: &str,
    hemisphere: &str,
    positive: char,
    negative: char,
    degree_digits: usize,
) -> Result<f64> {
    let (Some(degrees), Some(minutes)) = (value.get(..degree_digits), value.get(degree_digits..))
    else {
        return Err(gps_error(format!("invalid coordinate {:?}", value)));
    };
    let degrees: f64 = number(degrees, "coordinate degrees")?;
    let minutes: f64 = number(minutes, "coordinate minutes")?;
    let magnitude = degrees + minutes / 60.0;

    match hemisphere.chars().next() {
        Some(c) if c == positive => Ok(magnitude),
        Some(c) if c == negative => Ok(-magnitude),
        _ => Err(gps_error(format!("invalid hemisphere {:?}", hemisphere))),
    }
}

fn number<T: FromStr>(field: &str, name: &str) -> Result<T> {
    field.parse().map_err(|_| gps_error(format!("invalid {} {:?}", name, field)))
}

fn optional<T: FromStr>(field: &str, name: &str) -> Result<Option<T>> {
    if field.is_empty() { Ok(None) } else { number(field, name).map(Some) }
}

fn gps_error(details: impl Into<String>) -> TelemetryError {
    TelemetryError::Gps { details: details.into() }
}

//! Record codec and typed per-verb records.
//!
//! A response line splits on `:` into positional fields; field 0 is the
//! echoed verb. No names travel on the wire, so each verb gets a fixed-layout
//! struct here and all index constants live in one place.
//!
//! Codec rules:
//! - interior empty fields are preserved, whitespace is never trimmed
//! - one trailing delimiter terminates the record instead of opening an
//!   empty last field, so `render(parse(line))` reproduces `line` with a
//!   trailing delimiter
//! - an empty line parses to no fields

use crate::protocol::{Verb, DELIMITER};
use focuserlink_core::error::LinkError;
use focuserlink_core::state::EnvironmentReading;

/// Split a line into positional fields.
pub fn parse(line: &str) -> Vec<String> {
    if line.is_empty() {
        return Vec::new();
    }
    let body = line.strip_suffix(DELIMITER).unwrap_or(line);
    body.split(DELIMITER).map(str::to_string).collect()
}

/// Join fields with `:` and append the trailing delimiter.
pub fn render<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for field in fields {
        line.push_str(field.as_ref());
        line.push(DELIMITER);
    }
    line
}

/// Parsed response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    /// Parse a response line.
    pub fn parse(line: &str) -> Self {
        Self {
            fields: parse(line),
        }
    }

    /// Field 0 as a character, if present.
    pub fn tag(&self) -> Option<char> {
        self.fields.first().and_then(|f| f.chars().next())
    }

    /// Number of fields, tag included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw field text.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// All fields.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Take the fields.
    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }

    /// Render back to a line with trailing delimiter.
    pub fn render(&self) -> String {
        render(&self.fields)
    }

    fn require(&self, verb: Verb, required: usize) -> Result<(), LinkError> {
        if self.fields.len() < required {
            return Err(LinkError::ShortRecord {
                verb: verb.as_char(),
                required,
                actual: self.fields.len(),
            });
        }
        Ok(())
    }

    fn number(&self, verb: Verb, index: usize) -> Result<f64, LinkError> {
        let raw = self.field(index).ok_or(LinkError::ShortRecord {
            verb: verb.as_char(),
            required: index + 1,
            actual: self.fields.len(),
        })?;
        raw.trim().parse::<f64>().map_err(|_| LinkError::Malformed {
            verb: verb.as_char(),
            index,
            value: raw.to_string(),
        })
    }

    fn integer(&self, verb: Verb, index: usize) -> Result<i64, LinkError> {
        Ok(self.number(verb, index)?.round() as i64)
    }
}

/// Status record `q` field positions.
pub mod status_field {
    /// Current position in steps
    pub const POSITION: usize = 1;
    /// Steps left in the current move
    pub const STEPS_TO_GO: usize = 2;
    /// Sensor type, 0 when no sensor is attached
    pub const SENSOR_TYPE: usize = 4;
    /// Temperature in °C
    pub const TEMPERATURE: usize = 5;
    /// Relative humidity in %
    pub const HUMIDITY: usize = 6;
    /// Dew point in °C
    pub const DEW_POINT: usize = 7;
    /// Temperature compensation delta in steps
    pub const COMPENSATION_DELTA: usize = 8;
}

/// Decoded status record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    /// Current position in steps
    pub position: i64,
    /// Steps left in the current move
    pub steps_to_go: i64,
    /// Sensor type, when the record carries the sensor block
    pub sensor_type: Option<i64>,
    /// Reading, only when the sensor type is non-zero
    pub environment: Option<EnvironmentReading>,
    /// Compensation delta, when the record carries it
    pub compensation_delta: Option<i64>,
}

impl StatusRecord {
    /// Decode a `q` record. Position and steps-to-go are mandatory, the
    /// sensor block and compensation delta are read when present.
    pub fn decode(record: &Record) -> Result<Self, LinkError> {
        use status_field::*;
        let verb = Verb::Status;
        record.require(verb, STEPS_TO_GO + 1)?;

        let position = record.integer(verb, POSITION)?;
        let steps_to_go = record.integer(verb, STEPS_TO_GO)?;

        let (sensor_type, environment) = if record.len() > DEW_POINT {
            let sensor_type = record.integer(verb, SENSOR_TYPE)?;
            let environment = if sensor_type > 0 {
                Some(EnvironmentReading {
                    temperature_c: record.number(verb, TEMPERATURE)?,
                    humidity_pct: record.number(verb, HUMIDITY)?,
                    dew_point_c: record.number(verb, DEW_POINT)?,
                    sensor_present: true,
                })
            } else {
                None
            };
            (Some(sensor_type), environment)
        } else {
            (None, None)
        };

        let compensation_delta = if record.len() > COMPENSATION_DELTA {
            Some(record.integer(verb, COMPENSATION_DELTA)?)
        } else {
            None
        };

        Ok(Self {
            position,
            steps_to_go,
            sensor_type,
            environment,
            compensation_delta,
        })
    }
}

/// Positions in the settings record (`u` / `U`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingsField {
    /// Maximum position in steps
    MaxPosition,
    /// Reverse flag, `0`/`1`
    Reversed,
    /// Step size in µm ×100
    StepSize,
    /// Compensation rate in steps/°C ×100
    CompensationStep,
    /// Compensation cycle in seconds
    CompensationCycle,
    /// Compensation trigger threshold in steps
    CompensationTrigger,
    /// Automatic compensation, `0`/`1`
    CompensationAuto,
}

impl SettingsField {
    /// Field position in the record.
    pub fn index(self) -> usize {
        match self {
            SettingsField::MaxPosition => 4,
            SettingsField::Reversed => 5,
            SettingsField::StepSize => 6,
            SettingsField::CompensationStep => 7,
            SettingsField::CompensationCycle => 8,
            SettingsField::CompensationTrigger => 9,
            SettingsField::CompensationAuto => 10,
        }
    }
}

/// Encode a value transmitted in hundredths: multiply by 100 and truncate.
pub fn encode_hundredths(value: f64) -> String {
    // nudge away from zero so 0.29 * 100 = 28.999.. truncates to 29
    let scaled = value * 100.0;
    let nudged = scaled + 1e-6_f64.copysign(scaled);
    format!("{}", nudged.trunc() as i64)
}

/// Encode a flag as `1`/`0`.
pub fn encode_flag(value: bool) -> String {
    u8::from(value).to_string()
}

/// Decoded settings record.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsRecord {
    /// Maximum position in steps
    pub max_position: i64,
    /// Motor reversed
    pub reversed: bool,
    /// Step size in µm
    pub step_size_microns: f64,
    /// Compensation rate in steps/°C
    pub compensation_steps_per_degree: f64,
    /// Compensation cycle in seconds
    pub compensation_cycle_secs: i64,
    /// Compensation trigger threshold in steps
    pub compensation_threshold_steps: i64,
    /// Automatic compensation enabled
    pub compensation_auto: bool,
}

impl SettingsRecord {
    /// Number of fields a complete settings record carries at least.
    pub const MIN_FIELDS: usize = 11;

    /// Decode a `u` record.
    pub fn decode(record: &Record) -> Result<Self, LinkError> {
        let verb = Verb::ReadSettings;
        record.require(verb, Self::MIN_FIELDS)?;
        let get = |field: SettingsField| record.number(verb, field.index());

        Ok(Self {
            max_position: get(SettingsField::MaxPosition)?.round() as i64,
            reversed: get(SettingsField::Reversed)? > 0.0,
            step_size_microns: get(SettingsField::StepSize)? / 100.0,
            compensation_steps_per_degree: get(SettingsField::CompensationStep)? / 100.0,
            compensation_cycle_secs: get(SettingsField::CompensationCycle)?.round() as i64,
            compensation_threshold_steps: get(SettingsField::CompensationTrigger)?.round() as i64,
            compensation_auto: get(SettingsField::CompensationAuto)? > 0.0,
        })
    }
}

/// Decoded hand-controller record `f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualRecord {
    /// Hand controller enabled
    pub enabled: bool,
}

impl ManualRecord {
    /// Decode an `f` record.
    pub fn decode(record: &Record) -> Result<Self, LinkError> {
        let verb = Verb::ReadManual;
        record.require(verb, 2)?;
        Ok(Self {
            enabled: record.number(verb, 1)? > 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_empty_fields_and_whitespace() {
        assert_eq!(parse("u:: 5:"), vec!["u", "", " 5"]);
        assert_eq!(parse("a::b"), vec!["a", "", "b"]);
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_round_trip_adds_only_trailing_delimiter() {
        for line in ["q:1234:0:1.47:1:2.12:45.1:-12.81:1", "u:1:2::4:", "H", "R:"] {
            let rendered = render(&parse(line));
            let expected = if line.ends_with(':') {
                line.to_string()
            } else {
                format!("{}:", line)
            };
            assert_eq!(rendered, expected);
            assert_eq!(render(&parse(&rendered)), rendered);
        }
    }

    #[test]
    fn test_status_record_reference_line() {
        let record = Record::parse("q:1234:0:1.47:1:2.12:45.1:-12.81:1");
        let status = StatusRecord::decode(&record).unwrap();
        assert_eq!(status.position, 1234);
        assert_eq!(status.steps_to_go, 0);
        assert_eq!(status.sensor_type, Some(1));
        let env = status.environment.unwrap();
        assert!(env.sensor_present);
        assert_eq!(env.temperature_c, 2.12);
        assert_eq!(env.humidity_pct, 45.1);
        assert_eq!(env.dew_point_c, -12.81);
        assert_eq!(status.compensation_delta, Some(1));
    }

    #[test]
    fn test_status_without_sensor() {
        let record = Record::parse("q:10:5:0:0:0:0:0:-3");
        let status = StatusRecord::decode(&record).unwrap();
        assert_eq!(status.sensor_type, Some(0));
        assert!(status.environment.is_none());
        assert_eq!(status.compensation_delta, Some(-3));
    }

    #[test]
    fn test_short_status_keeps_position_only() {
        let status = StatusRecord::decode(&Record::parse("q:77:12")).unwrap();
        assert_eq!(status.position, 77);
        assert_eq!(status.steps_to_go, 12);
        assert_eq!(status.sensor_type, None);
        assert_eq!(status.compensation_delta, None);

        assert!(matches!(
            StatusRecord::decode(&Record::parse("q:77")),
            Err(LinkError::ShortRecord { verb: 'q', required: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_malformed_number() {
        assert!(matches!(
            StatusRecord::decode(&Record::parse("q:abc:0")),
            Err(LinkError::Malformed { verb: 'q', index: 1, .. })
        ));
    }

    #[test]
    fn test_settings_record_decoding() {
        let record = Record::parse("u:0:0:0:30000:1:500:125:30:10:1");
        let settings = SettingsRecord::decode(&record).unwrap();
        assert_eq!(settings.max_position, 30000);
        assert!(settings.reversed);
        assert_eq!(settings.step_size_microns, 5.0);
        assert_eq!(settings.compensation_steps_per_degree, 1.25);
        assert_eq!(settings.compensation_cycle_secs, 30);
        assert_eq!(settings.compensation_threshold_steps, 10);
        assert!(settings.compensation_auto);
    }

    #[test]
    fn test_settings_record_too_short() {
        let record = Record::parse("u:0:0:0:30000:1:500:125:30");
        assert!(matches!(
            SettingsRecord::decode(&record),
            Err(LinkError::ShortRecord { verb: 'u', required: 11, actual: 9 })
        ));
    }

    #[test]
    fn test_manual_record() {
        assert!(ManualRecord::decode(&Record::parse("f:1")).unwrap().enabled);
        assert!(!ManualRecord::decode(&Record::parse("f:0")).unwrap().enabled);
    }

    #[test]
    fn test_encode_hundredths_truncates() {
        assert_eq!(encode_hundredths(5.0), "500");
        assert_eq!(encode_hundredths(0.29), "29");
        assert_eq!(encode_hundredths(1.259), "125");
        assert_eq!(encode_hundredths(-2.5), "-250");
        assert_eq!(encode_hundredths(0.0), "0");
    }
}

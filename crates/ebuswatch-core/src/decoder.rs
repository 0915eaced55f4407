// ── Decoder ──
//
// Turns one raw daemon line into typed value updates.
//
// Line shape: `<circuit> <field> = <value>`. The value is typed by the
// field's unit kind; multi-part values (`21.5;ok`) use the first part
// unless the unit is a schedule.

use std::sync::Arc;

use crate::catalog::FieldCatalog;
use crate::error::DecodeError;
use crate::model::{Attrs, Value, ValueUpdate};
use crate::units::{UnitKind, UnitTable};

const SEPARATOR: &str = " = ";
const EMPTY_SLOT: &str = "-:-";

/// Decodes raw protocol lines. Errors are per line and never fatal to a
/// connection.
pub trait Decoder: Send + Sync {
    fn decode(&self, line: &str) -> Result<Vec<ValueUpdate>, DecodeError>;
}

/// Default decoder for the daemon's verbose line format.
pub struct LineDecoder {
    catalog: Arc<dyn FieldCatalog>,
    units: UnitTable,
}

impl LineDecoder {
    pub fn new(catalog: Arc<dyn FieldCatalog>, units: UnitTable) -> Self {
        Self { catalog, units }
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }
}

impl Decoder for LineDecoder {
    fn decode(&self, line: &str) -> Result<Vec<ValueUpdate>, DecodeError> {
        let line = line.trim();
        let (head, raw) = line
            .split_once(SEPARATOR)
            .ok_or_else(|| DecodeError::format(line, "missing ' = '"))?;

        let mut words = head.split_whitespace();
        let (Some(circuit), Some(name), None) = (words.next(), words.next(), words.next()) else {
            return Err(DecodeError::format(line, "expected '<circuit> <field>'"));
        };

        let field = self
            .catalog
            .field(circuit, name)
            .ok_or_else(|| DecodeError::Unknown {
                circuit: circuit.to_owned(),
                field: name.to_owned(),
            })?;

        let (value, attrs) = decode_value(line, raw.trim(), self.units.kind(&field.unit_name))?;

        Ok(vec![ValueUpdate {
            circuit: circuit.to_owned(),
            field,
            value,
            attrs,
        }])
    }
}

// ── Value typing ─────────────────────────────────────────────────────

fn decode_value(line: &str, raw: &str, kind: UnitKind) -> Result<(Value, Attrs), DecodeError> {
    let first = raw.split(';').next().unwrap_or_default().trim();

    let value = match kind {
        UnitKind::Float { precision } => {
            let parsed: f64 = first
                .parse()
                .map_err(|_| DecodeError::format(line, format!("{first:?} is not a number")))?;
            Value::Float(round_to(parsed, precision))
        }
        UnitKind::Integer => {
            let parsed: i64 = first
                .parse()
                .map_err(|_| DecodeError::format(line, format!("{first:?} is not an integer")))?;
            Value::Int(parsed)
        }
        UnitKind::Switch => Value::Bool(parse_switch(first).ok_or_else(|| {
            DecodeError::format(line, format!("{first:?} is not a switch state"))
        })?),
        UnitKind::Text => Value::Text(raw.to_owned()),
        UnitKind::Schedule => {
            let attrs = schedule_attrs(line, raw)?;
            return Ok((Value::Text(raw.to_owned()), attrs));
        }
    };

    Ok((value, Attrs::new()))
}

fn round_to(value: f64, precision: u8) -> f64 {
    let factor = 10f64.powi(i32::from(precision));
    (value * factor).round() / factor
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "yes" | "1" | "true" => Some(true),
        "off" | "no" | "0" | "false" => Some(false),
        _ => None,
    }
}

/// `time_frame{n}_begin` / `time_frame{n}_end` for every non-empty slot.
fn schedule_attrs(line: &str, raw: &str) -> Result<Attrs, DecodeError> {
    let slots: Vec<&str> = raw.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if slots.len() % 2 != 0 {
        return Err(DecodeError::format(line, "schedule needs begin/end pairs"));
    }

    let mut attrs = Attrs::new();
    for (index, pair) in slots.chunks(2).enumerate() {
        let n = index + 1;
        for (slot, suffix) in pair.iter().zip(["begin", "end"]) {
            if *slot == EMPTY_SLOT {
                continue;
            }
            if !is_clock_time(slot) {
                return Err(DecodeError::format(line, format!("{slot:?} is not HH:MM")));
            }
            attrs.insert(
                format!("time_frame{n}_{suffix}"),
                Value::Text((*slot).to_owned()),
            );
        }
    }
    Ok(attrs)
}

fn is_clock_time(slot: &str) -> bool {
    let Some((hours, minutes)) = slot.split_once(':') else {
        return false;
    };
    let hours: Option<u8> = hours.parse().ok();
    let minutes: Option<u8> = minutes.parse().ok();
    matches!((hours, minutes), (Some(h), Some(m)) if h <= 24 && m < 60)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::model::FieldDescriptor;
    use pretty_assertions::assert_eq;

    fn decoder() -> LineDecoder {
        let catalog = StaticCatalog::new()
            .with_field("bai", FieldDescriptor::new("FlowTemp", "Flow temperature", "temp").status())
            .with_field("bai", FieldDescriptor::new("WaterPressure", "Water pressure", "pressure"))
            .with_field("bai", FieldDescriptor::new("PumpState", "Pump", "onoff"))
            .with_field("bai", FieldDescriptor::new("Hours", "Burner hours", "hours"))
            .with_field("hwc", FieldDescriptor::new("HwcTimer.Monday", "Monday", "timeschedule"))
            .with_field("mc", FieldDescriptor::new("OpMode", "Operating mode", "text"));
        LineDecoder::new(Arc::new(catalog), UnitTable::builtin())
    }

    #[test]
    fn decodes_float_using_first_part() {
        let updates = decoder().decode("bai FlowTemp = 45.06;ok").unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].circuit, "bai");
        assert_eq!(updates[0].field.name, "FlowTemp");
        assert_eq!(updates[0].value, Value::Float(45.1));
        assert!(updates[0].attrs.is_empty());
    }

    #[test]
    fn decodes_switch_integer_and_text() {
        let d = decoder();
        assert_eq!(d.decode("bai PumpState = on").unwrap()[0].value, Value::Bool(true));
        assert_eq!(d.decode("bai Hours = 1234").unwrap()[0].value, Value::Int(1234));
        assert_eq!(
            d.decode("mc OpMode = auto;day").unwrap()[0].value,
            Value::Text("auto;day".into())
        );
    }

    #[test]
    fn decodes_schedule_attrs_skipping_empty_slots() {
        let updates = decoder()
            .decode("hwc HwcTimer.Monday = 06:00;08:30;-:-;-:-;17:00;22:00")
            .unwrap();
        let attrs = &updates[0].attrs;
        assert_eq!(attrs.len(), 4);
        assert_eq!(attrs["time_frame1_begin"], Value::Text("06:00".into()));
        assert_eq!(attrs["time_frame1_end"], Value::Text("08:30".into()));
        assert!(!attrs.contains_key("time_frame2_begin"));
        assert_eq!(attrs["time_frame3_end"], Value::Text("22:00".into()));
    }

    #[test]
    fn malformed_lines_are_format_errors() {
        let d = decoder();
        assert!(matches!(d.decode("garbage"), Err(DecodeError::Format { .. })));
        assert!(matches!(d.decode("bai = 3"), Err(DecodeError::Format { .. })));
        assert!(matches!(
            d.decode("bai WaterPressure = high"),
            Err(DecodeError::Format { .. })
        ));
        assert!(matches!(
            d.decode("hwc HwcTimer.Monday = 06:00"),
            Err(DecodeError::Format { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_unknown_errors() {
        let err = decoder().decode("bai Bogus = 1").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Unknown {
                circuit: "bai".into(),
                field: "Bogus".into()
            }
        );
        assert!(matches!(
            decoder().decode("zz FlowTemp = 1"),
            Err(DecodeError::Unknown { .. })
        ));
    }
}

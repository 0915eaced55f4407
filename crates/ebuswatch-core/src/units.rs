// ── Unit table ──
//
// Maps a field's unit identifier to a unit of measurement, an icon hint
// and the kind of scalar the decoder should produce.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How the raw text of a field is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKind {
    /// Decimal number, rounded to `precision` fractional digits.
    Float { precision: u8 },
    Integer,
    /// `on`/`off`, `yes`/`no`, `1`/`0`.
    Switch,
    /// Kept verbatim.
    Text,
    /// `HH:MM;HH:MM;...` pairs of begin/end times.
    Schedule,
}

/// One unit definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit of measurement shown next to the value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(flatten)]
    pub kind: UnitKind,
}

impl Unit {
    fn new(uom: Option<&str>, icon: Option<&str>, kind: UnitKind) -> Self {
        Self {
            uom: uom.map(str::to_owned),
            icon: icon.map(str::to_owned),
            kind,
        }
    }
}

/// Lookup table from unit identifier to [`Unit`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitTable {
    units: HashMap<String, Unit>,
}

impl UnitTable {
    /// An empty table. Unknown units decode as [`UnitKind::Text`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in units for common heating installations.
    pub fn builtin() -> Self {
        let float1 = UnitKind::Float { precision: 1 };
        let float2 = UnitKind::Float { precision: 2 };
        let entries = [
            ("temp", Unit::new(Some("°C"), Some("mdi:thermometer"), float1)),
            ("pressure", Unit::new(Some("bar"), Some("mdi:gauge"), float2)),
            ("percent", Unit::new(Some("%"), Some("mdi:percent"), UnitKind::Integer)),
            ("power", Unit::new(Some("kW"), Some("mdi:flash"), float1)),
            ("energy", Unit::new(Some("kWh"), Some("mdi:lightning-bolt"), UnitKind::Integer)),
            ("flow", Unit::new(Some("l/h"), Some("mdi:water-pump"), UnitKind::Integer)),
            ("hours", Unit::new(Some("h"), Some("mdi:timer-outline"), UnitKind::Integer)),
            ("minutes", Unit::new(Some("min"), Some("mdi:timer-outline"), UnitKind::Integer)),
            ("seconds", Unit::new(Some("s"), Some("mdi:timer-outline"), UnitKind::Integer)),
            ("count", Unit::new(None, Some("mdi:counter"), UnitKind::Integer)),
            ("onoff", Unit::new(None, Some("mdi:toggle-switch"), UnitKind::Switch)),
            ("yesno", Unit::new(None, Some("mdi:toggle-switch"), UnitKind::Switch)),
            ("text", Unit::new(None, None, UnitKind::Text)),
            ("timeschedule", Unit::new(None, Some("mdi:calendar-clock"), UnitKind::Schedule)),
        ];
        Self {
            units: entries
                .into_iter()
                .map(|(name, unit)| (name.to_owned(), unit))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Unit> {
        self.units.get(name)
    }

    /// Kind for `name`, falling back to [`UnitKind::Text`].
    pub fn kind(&self, name: &str) -> UnitKind {
        self.get(name).map_or(UnitKind::Text, |u| u.kind)
    }

    pub fn insert(&mut self, name: impl Into<String>, unit: Unit) {
        self.units.insert(name.into(), unit);
    }

    /// Add or replace every unit in `overrides`.
    pub fn merge(&mut self, overrides: impl IntoIterator<Item = (String, Unit)>) {
        self.units.extend(overrides);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_has_temperature() {
        let table = UnitTable::builtin();
        let temp = table.get("temp");
        assert_eq!(temp.and_then(|u| u.uom.as_deref()), Some("°C"));
        assert_eq!(table.kind("temp"), UnitKind::Float { precision: 1 });
    }

    #[test]
    fn unknown_unit_is_text() {
        assert_eq!(UnitTable::empty().kind("nope"), UnitKind::Text);
    }

    #[test]
    fn merge_overrides_builtin() {
        let mut table = UnitTable::builtin();
        let before = table.len();
        table.merge([(
            "temp".to_owned(),
            Unit::new(Some("K"), None, UnitKind::Float { precision: 0 }),
        )]);
        assert_eq!(table.len(), before);
        assert_eq!(table.kind("temp"), UnitKind::Float { precision: 0 });
    }

    #[test]
    fn unit_deserializes_with_inline_kind() {
        let unit: Unit =
            serde_json::from_str(r#"{"uom": "bar", "kind": "float", "precision": 2}"#).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(unit.kind, UnitKind::Float { precision: 2 });
        assert_eq!(unit.uom.as_deref(), Some("bar"));
    }
}

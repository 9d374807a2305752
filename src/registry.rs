//! # Measurement Registry
//!
//! The fixed table of quantities the meter reports on its customer interface.
//! Each entry carries its metadata, the last raw value decoded for it and the
//! derived display value (raw × factor). Entries are never added or removed
//! after construction, and a value not present in a frame keeps its last
//! known value.
//!
//! ```rust
//! use smartmeter_rs::registry::MeasurementRegistry;
//!
//! let mut registry = MeasurementRegistry::new();
//! let obis = "0100010800FF".parse().unwrap();
//! registry.set(&obis, 12345);
//! assert!((registry.display_of("WirkenergieP") - 12.345).abs() < 1e-9);
//! assert_eq!(registry.display_of("Unbekannt"), 0.0);
//! ```

use crate::constants::NET_POWER_NAME;
use crate::dlms::obis::ObisCode;
use std::collections::HashMap;

/// Static description of one measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSpec {
    pub obis: ObisCode,
    /// Stable key used by sinks and lookups
    pub short_name: &'static str,
    /// Display label
    pub long_name: &'static str,
    pub unit: &'static str,
    /// Raw-to-engineering-unit factor
    pub factor: f64,
    /// MQTT topic suffix
    pub topic: &'static str,
    /// Label used in the console table
    pub meter_key: &'static str,
}

/// Quantities pushed by the meter, in export order.
pub const DEFAULT_MEASUREMENTS: [MeasurementSpec; 11] = [
    spec([1, 0, 1, 8, 0, 255], "WirkenergieP", "Wirkenergie Bezug", "kWh", 0.001, "WirkenergieBezug", "1.0.1.8.0.255"),
    spec([1, 0, 2, 8, 0, 255], "WirkenergieN", "Wirkenergie Lieferung", "kWh", 0.001, "WirkenergieLieferung", "1.0.2.8.0.255"),
    spec([1, 0, 1, 7, 0, 255], "MomentanleistungP", "Wirkleistung Bezug", "W", 1.0, "WirkleistungBezug", "1.0.1.7.0.255"),
    spec([1, 0, 2, 7, 0, 255], "MomentanleistungN", "Wirkleistung Lieferung", "W", 1.0, "WirkleistungLieferung", "1.0.2.7.0.255"),
    spec([1, 0, 32, 7, 0, 255], "SpannungL1", "Spannung L1", "V", 0.1, "SpannungL1", "1.0.32.7.0.255"),
    spec([1, 0, 52, 7, 0, 255], "SpannungL2", "Spannung L2", "V", 0.1, "SpannungL2", "1.0.52.7.0.255"),
    spec([1, 0, 72, 7, 0, 255], "SpannungL3", "Spannung L3", "V", 0.1, "SpannungL3", "1.0.72.7.0.255"),
    spec([1, 0, 31, 7, 0, 255], "StromL1", "Strom L1", "A", 0.01, "StromL1", "1.0.31.7.0.255"),
    spec([1, 0, 51, 7, 0, 255], "StromL2", "Strom L2", "A", 0.01, "StromL2", "1.0.51.7.0.255"),
    spec([1, 0, 71, 7, 0, 255], "StromL3", "Strom L3", "A", 0.01, "StromL3", "1.0.71.7.0.255"),
    spec([1, 0, 13, 7, 0, 255], "Leistungsfaktor", "Leistungsfaktor", "", 0.001, "Leistungsfaktor", "-------------"),
];

const fn spec(
    obis: [u8; 6],
    short_name: &'static str,
    long_name: &'static str,
    unit: &'static str,
    factor: f64,
    topic: &'static str,
    meter_key: &'static str,
) -> MeasurementSpec {
    MeasurementSpec {
        obis: ObisCode::new(obis),
        short_name,
        long_name,
        unit,
        factor,
        topic,
        meter_key,
    }
}

/// A registry entry: metadata plus current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    spec: MeasurementSpec,
    raw: u64,
    display: f64,
}

impl Measurement {
    fn new(spec: MeasurementSpec) -> Self {
        Self {
            spec,
            raw: 0,
            display: 0.0,
        }
    }

    pub fn obis(&self) -> &ObisCode {
        &self.spec.obis
    }

    pub fn short_name(&self) -> &'static str {
        self.spec.short_name
    }

    pub fn long_name(&self) -> &'static str {
        self.spec.long_name
    }

    pub fn unit(&self) -> &'static str {
        self.spec.unit
    }

    pub fn factor(&self) -> f64 {
        self.spec.factor
    }

    pub fn topic(&self) -> &'static str {
        self.spec.topic
    }

    pub fn meter_key(&self) -> &'static str {
        self.spec.meter_key
    }

    /// Last value decoded from the meter
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Value in engineering units
    pub fn display(&self) -> f64 {
        self.display
    }

    fn set(&mut self, raw: u64) {
        self.raw = raw;
        self.display = raw as f64 * self.spec.factor;
    }
}

/// Fixed set of measurements, iterated in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRegistry {
    entries: Vec<Measurement>,
    by_obis: HashMap<ObisCode, usize>,
    by_short: HashMap<&'static str, usize>,
}

impl Default for MeasurementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementRegistry {
    /// Registry over [`DEFAULT_MEASUREMENTS`].
    pub fn new() -> Self {
        Self::with_specs(&DEFAULT_MEASUREMENTS)
    }

    /// Registry over a custom table; later duplicates of an identifier are dropped.
    pub fn with_specs(specs: &[MeasurementSpec]) -> Self {
        let mut entries = Vec::with_capacity(specs.len());
        let mut by_obis = HashMap::new();
        let mut by_short = HashMap::new();
        for spec in specs {
            if by_obis.contains_key(&spec.obis) {
                continue;
            }
            by_obis.insert(spec.obis, entries.len());
            by_short.entry(spec.short_name).or_insert(entries.len());
            entries.push(Measurement::new(*spec));
        }
        Self {
            entries,
            by_obis,
            by_short,
        }
    }

    pub fn contains(&self, obis: &ObisCode) -> bool {
        self.by_obis.contains_key(obis)
    }

    /// Store a raw value; unknown identifiers are ignored.
    pub fn set(&mut self, obis: &ObisCode, raw: u64) {
        if let Some(&index) = self.by_obis.get(obis) {
            self.entries[index].set(raw);
        }
    }

    /// Display value by short name, 0 for unknown names.
    pub fn display_of(&self, short_name: &str) -> f64 {
        self.get(short_name).map_or(0.0, Measurement::display)
    }

    pub fn get(&self, short_name: &str) -> Option<&Measurement> {
        self.by_short.get(short_name).map(|&index| &self.entries[index])
    }

    /// Import minus export active power in W.
    pub fn net_active_power(&self) -> f64 {
        self.display_of("MomentanleistungP") - self.display_of("MomentanleistungN")
    }

    /// Name under which sinks export [`Self::net_active_power`].
    pub fn net_active_power_name(&self) -> &'static str {
        NET_POWER_NAME
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a MeasurementRegistry {
    type Item = &'a Measurement;
    type IntoIter = std::slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obis(s: &str) -> ObisCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_initial_state() {
        let registry = MeasurementRegistry::new();
        assert_eq!(registry.len(), 11);
        assert!(registry.iter().all(|m| m.raw() == 0 && m.display() == 0.0));
    }

    #[test]
    fn test_registration_order() {
        let registry = MeasurementRegistry::new();
        let names: Vec<_> = registry.iter().map(|m| m.short_name()).collect();
        assert_eq!(names.first(), Some(&"WirkenergieP"));
        assert_eq!(names.last(), Some(&"Leistungsfaktor"));
        assert_eq!(names[4], "SpannungL1");
    }

    #[test]
    fn test_set_scales_value() {
        let mut registry = MeasurementRegistry::new();
        registry.set(&obis("0100200700FF"), 2305);
        let entry = registry.get("SpannungL1").unwrap();
        assert_eq!(entry.raw(), 2305);
        assert!((entry.display() - 230.5).abs() < 1e-9);
    }

    #[test]
    fn test_set_unknown_is_noop() {
        let mut registry = MeasurementRegistry::new();
        registry.set(&obis("0100010800FF"), 1);
        let before = registry.clone();
        registry.set(&obis("0100630700FF"), 99);
        assert_eq!(registry, before);
    }

    #[test]
    fn test_display_of_unknown_is_zero() {
        let registry = MeasurementRegistry::new();
        assert_eq!(registry.display_of("Gibtsnicht"), 0.0);
    }

    #[test]
    fn test_net_active_power() {
        let mut registry = MeasurementRegistry::new();
        registry.set(&obis("0100010700FF"), 1500);
        registry.set(&obis("0100020700FF"), 400);
        assert_eq!(registry.net_active_power(), 1100.0);
    }

    #[test]
    fn test_custom_table_drops_duplicates() {
        let specs = [DEFAULT_MEASUREMENTS[0], DEFAULT_MEASUREMENTS[0], DEFAULT_MEASUREMENTS[1]];
        let registry = MeasurementRegistry::with_specs(&specs);
        assert_eq!(registry.len(), 2);
    }
}

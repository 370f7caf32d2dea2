//! Static registry of Wibeee measurements across vendor dialects.
//!
//! One canonical sensor type per measurement, with the key it goes by in
//! each dialect. The canonical identity of a sensor instance is
//! `mac + canonical_name + phase`, which stays stable when a firmware
//! update switches the device to a different dialect.

use crate::decoder::Snapshot;
use crate::device_client::{DeviceIdentity, Dialect};

/// Measurement phase. Wibeee reports three numbered phases plus a
/// neutral/total pseudo-phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    L1,
    L2,
    L3,
    Neutral,
}

pub const PHASES: [Phase; 4] = [Phase::L1, Phase::L2, Phase::L3, Phase::Neutral];

impl Phase {
    /// Tag used in legacy `faseN_*` keys. Neutral is "fase4", not "faseT".
    fn legacy_tag(self) -> &'static str {
        match self {
            Phase::L1 => "1",
            Phase::L2 => "2",
            Phase::L3 => "3",
            Phase::Neutral => "4",
        }
    }

    /// Tag appended to values2/push prefixes. Neutral is "t" here.
    fn modern_tag(self) -> &'static str {
        match self {
            Phase::L1 => "1",
            Phase::L2 => "2",
            Phase::L3 => "3",
            Phase::Neutral => "t",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
            Phase::Neutral => "N",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementClass {
    Voltage,
    Current,
    Frequency,
    Power,
    PowerFactor,
    Energy,
}

/// Static descriptor for one measurement. A `None` dialect key means the
/// measurement is not observable in that dialect.
#[derive(Debug)]
pub struct SensorType {
    pub canonical_name: &'static str,
    pub display_name: &'static str,
    pub unit: Option<&'static str>,
    pub class: Option<MeasurementClass>,
    legacy_suffix: Option<&'static str>,
    values2_prefix: Option<&'static str>,
    push_prefix: Option<&'static str>,
}

impl SensorType {
    pub fn legacy_key(&self, phase: Phase) -> Option<String> {
        self.legacy_suffix
            .map(|suffix| format!("fase{}_{}", phase.legacy_tag(), suffix))
    }

    pub fn values2_key(&self, phase: Phase) -> Option<String> {
        self.values2_prefix
            .map(|prefix| format!("{}{}", prefix, phase.modern_tag()))
    }

    pub fn push_key(&self, phase: Phase) -> Option<String> {
        self.push_prefix
            .map(|prefix| format!("{}{}", prefix, phase.modern_tag()))
    }

    pub fn dialect_key(&self, phase: Phase, dialect: Dialect) -> Option<String> {
        match dialect {
            Dialect::LegacyStatus => self.legacy_key(phase),
            Dialect::Values2 => self.values2_key(phase),
        }
    }
}

macro_rules! sensor {
    ($canonical:literal, $display:literal, $unit:expr, $class:expr,
     $legacy:expr, $values2:expr, $push:expr) => {
        SensorType {
            canonical_name: $canonical,
            display_name: $display,
            unit: $unit,
            class: $class,
            legacy_suffix: $legacy,
            values2_prefix: $values2,
            push_prefix: $push,
        }
    };
}

use MeasurementClass::*;

/// The full measurement registry, one entry per canonical sensor type.
pub const SENSOR_TYPES: &[SensorType] = &[
    sensor!("vrms", "Phase Voltage", Some("V"), Some(Voltage),
            Some("vrms"), Some("vrms"), Some("v")),
    sensor!("irms", "Current", Some("A"), Some(Current),
            Some("irms"), Some("irms"), Some("i")),
    sensor!("frecuencia", "Frequency", Some("Hz"), Some(Frequency),
            Some("frecuencia"), Some("freq"), Some("f")),
    sensor!("p_activa", "Active Power", Some("W"), Some(Power),
            Some("p_activa"), Some("pac"), Some("p")),
    sensor!("p_reactiva_ind", "Inductive Reactive Power", Some("VArL"), Some(Power),
            Some("p_reactiva_ind"), Some("preacind"), None),
    sensor!("p_reactiva_cap", "Capacitive Reactive Power", Some("VArC"), Some(Power),
            Some("p_reactiva_cap"), Some("preaccap"), None),
    sensor!("p_aparent", "Apparent Power", Some("VA"), Some(Power),
            Some("p_aparent"), Some("pap"), Some("a")),
    sensor!("factor_potencia", "Power Factor", None, Some(PowerFactor),
            Some("factor_potencia"), Some("fpot"), Some("pf")),
    sensor!("energia_activa", "Active Energy", Some("Wh"), Some(Energy),
            Some("energia_activa"), Some("eactiva"), Some("e")),
    sensor!("energia_reactiva_ind", "Inductive Reactive Energy", Some("VArLh"), Some(Energy),
            Some("energia_reactiva_ind"), Some("ereactind"), None),
    sensor!("energia_reactiva_cap", "Capacitive Reactive Energy", Some("VArCh"), Some(Energy),
            Some("energia_reactiva_cap"), Some("ereactcap"), None),
];

/// One sensor instance for a device: a sensor type observed on a phase,
/// with the key it goes by in the device's active dialect.
#[derive(Debug)]
pub struct StatusElement {
    pub phase: Phase,
    pub key: String,
    pub sensor: &'static SensorType,
}

impl StatusElement {
    /// Canonical identity, stable across dialects and restarts.
    pub fn unique_id(&self, mac: &str) -> String {
        format!("{}_{}_{}", mac, self.sensor.canonical_name, self.phase.label())
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.phase.label(), self.sensor.display_name)
    }
}

/// All elements the device's dialect can express. Types with no key in the
/// active dialect are silently skipped.
pub fn expected_elements(identity: &DeviceIdentity) -> Vec<StatusElement> {
    elements_for_dialect(identity.dialect)
}

pub fn elements_for_dialect(dialect: Dialect) -> Vec<StatusElement> {
    let mut elements = Vec::new();
    for phase in PHASES {
        for sensor in SENSOR_TYPES {
            if let Some(key) = sensor.dialect_key(phase, dialect) {
                elements.push(StatusElement { phase, key, sensor });
            }
        }
    }
    elements
}

/// Narrows the expected elements to those the device actually reported in
/// its first snapshot. This fixes the sensor set for the session.
pub fn present_elements(identity: &DeviceIdentity, first_snapshot: &Snapshot) -> Vec<StatusElement> {
    expected_elements(identity)
        .into_iter()
        .filter(|element| first_snapshot.contains_key(&element.key))
        .collect()
}

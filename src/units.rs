//! Linear length units and the factor between two of them.
//!
//! Every unit is stored as `mantissa * 10^exponent` metres with an integer
//! valued mantissa. Decimal ratios (m -> mm, m -> fermi) then come out of a
//! single correctly rounded multiply/divide instead of a chain of inexact
//! intermediate values.

use crate::error::{ScaleError, ScaleResult};
use tracing::debug;

/// A resolved unit of length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthUnit {
    /// Canonical abbreviation, used for output file names and comments.
    pub symbol: &'static str,
    mantissa: f64,
    exponent: i32,
}

impl LengthUnit {
    const fn new(symbol: &'static str, mantissa: f64, exponent: i32) -> LengthUnit {
        LengthUnit {
            symbol,
            mantissa,
            exponent,
        }
    }

    /// Length of one of this unit in metres.
    pub fn in_meters(&self) -> f64 {
        scale_by_pow10(self.mantissa, self.exponent)
    }
}

/// The metre and its SI-prefixed multiples.
struct MetricUnit {
    symbol: &'static str,
    symbol_aliases: &'static [&'static str],
    prefixes: &'static [&'static str],
    exponent: i32,
}

const METRIC_UNITS: &[MetricUnit] = &[
    metric("Ym", &[], &["yotta"], 24),
    metric("Zm", &[], &["zetta"], 21),
    metric("Em", &[], &["exa"], 18),
    metric("Pm", &[], &["peta"], 15),
    metric("Tm", &[], &["tera"], 12),
    metric("Gm", &[], &["giga"], 9),
    metric("Mm", &[], &["mega"], 6),
    metric("km", &[], &["kilo"], 3),
    metric("hm", &[], &["hecto"], 2),
    metric("dam", &[], &["deca", "deka"], 1),
    metric("m", &[], &[""], 0),
    metric("dm", &[], &["deci"], -1),
    metric("cm", &[], &["centi"], -2),
    metric("mm", &[], &["milli"], -3),
    metric("um", &["µm", "μm"], &["micro"], -6),
    metric("nm", &[], &["nano"], -9),
    metric("pm", &[], &["pico"], -12),
    metric("fm", &[], &["femto"], -15),
    metric("am", &[], &["atto"], -18),
    metric("zm", &[], &["zepto"], -21),
    metric("ym", &[], &["yocto"], -24),
];

const fn metric(
    symbol: &'static str,
    symbol_aliases: &'static [&'static str],
    prefixes: &'static [&'static str],
    exponent: i32,
) -> MetricUnit {
    MetricUnit {
        symbol,
        symbol_aliases,
        prefixes,
        exponent,
    }
}

const METER_SUFFIXES: &[&str] = &["meters", "metres", "meter", "metre"];

/// Units outside the prefixed metre family.
struct NamedUnit {
    symbols: &'static [&'static str],
    names: &'static [&'static str],
    unit: LengthUnit,
}

const NAMED_UNITS: &[NamedUnit] = &[
    NamedUnit {
        symbols: &[],
        names: &["micron", "microns"],
        unit: LengthUnit::new("um", 1.0, -6),
    },
    NamedUnit {
        symbols: &[],
        names: &["fermi", "fermis"],
        unit: LengthUnit::new("fm", 1.0, -15),
    },
    NamedUnit {
        symbols: &["Å"],
        names: &["angstrom", "angstroms", "ångström"],
        unit: LengthUnit::new("angstrom", 1.0, -10),
    },
    NamedUnit {
        symbols: &["in"],
        names: &["inch", "inches"],
        unit: LengthUnit::new("in", 254.0, -4),
    },
    NamedUnit {
        symbols: &["ft"],
        names: &["foot", "feet"],
        unit: LengthUnit::new("ft", 3048.0, -4),
    },
    NamedUnit {
        symbols: &["yd"],
        names: &["yard", "yards"],
        unit: LengthUnit::new("yd", 9144.0, -4),
    },
    NamedUnit {
        symbols: &["mi"],
        names: &["mile", "miles"],
        unit: LengthUnit::new("mi", 1_609_344.0, -3),
    },
    NamedUnit {
        symbols: &["mil"],
        names: &["thou", "mils"],
        unit: LengthUnit::new("mil", 254.0, -7),
    },
    NamedUnit {
        symbols: &["nmi"],
        names: &["nautical_mile", "nautical_miles"],
        unit: LengthUnit::new("nmi", 1852.0, 0),
    },
    NamedUnit {
        symbols: &["au"],
        names: &["astronomical_unit", "astronomical_units"],
        unit: LengthUnit::new("au", 149_597_870_700.0, 0),
    },
    NamedUnit {
        symbols: &["ly"],
        names: &["light_year", "light_years", "lightyear"],
        unit: LengthUnit::new("ly", 94_607_304_725_808.0, 2),
    },
];

/// Powers of ten that are exactly representable as f64.
const EXACT_POW10: [f64; 23] = [
    1e0, 1e1, 1e2, 1e3, 1e4, 1e5, 1e6, 1e7, 1e8, 1e9, 1e10, 1e11, 1e12, 1e13, 1e14, 1e15, 1e16,
    1e17, 1e18, 1e19, 1e20, 1e21, 1e22,
];

fn pow10(exponent: u32) -> f64 {
    match EXACT_POW10.get(exponent as usize) {
        Some(p) => *p,
        None => 10f64.powi(exponent as i32),
    }
}

fn scale_by_pow10(value: f64, exponent: i32) -> f64 {
    if exponent >= 0 {
        value * pow10(exponent.unsigned_abs())
    } else {
        value / pow10(exponent.unsigned_abs())
    }
}

/// Resolve a unit name or abbreviation.
///
/// Abbreviations are case-sensitive (`Mm` is not `mm`), spelled out names
/// are not (`Millimetres` works).
pub fn resolve_unit(name: &str) -> ScaleResult<LengthUnit> {
    let name = name.trim();
    let lowercase = name.to_lowercase();

    for metric in METRIC_UNITS {
        if metric.symbol == name || metric.symbol_aliases.contains(&name) {
            return Ok(LengthUnit::new(metric.symbol, 1.0, metric.exponent));
        }
    }

    for suffix in METER_SUFFIXES {
        if let Some(prefix) = lowercase.strip_suffix(suffix) {
            if let Some(metric) = METRIC_UNITS.iter().find(|m| m.prefixes.contains(&prefix)) {
                return Ok(LengthUnit::new(metric.symbol, 1.0, metric.exponent));
            }
        }
    }

    NAMED_UNITS
        .iter()
        .find(|named| named.symbols.contains(&name) || named.names.contains(&lowercase.as_str()))
        .map(|named| named.unit)
        .ok_or_else(|| ScaleError::UnknownUnit {
            unit: name.to_string(),
        })
}

/// Factor that turns a length in `from` into the same length in `to`.
pub fn conversion_factor(from: &LengthUnit, to: &LengthUnit) -> f64 {
    // Keep the power of ten on whichever side makes it a multiplication of
    // integers, so that exact results stay exact.
    let exponent = from.exponent - to.exponent;
    if exponent >= 0 {
        from.mantissa * pow10(exponent.unsigned_abs()) / to.mantissa
    } else {
        from.mantissa / (to.mantissa * pow10(exponent.unsigned_abs()))
    }
}

/// Resolve both units and compute the factor between them.
pub fn scale_factor(in_unit: &str, out_unit: &str) -> ScaleResult<f64> {
    Ok(Conversion::new(in_unit, out_unit)?.factor())
}

/// A resolved unit pair, computed once per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    from: LengthUnit,
    to: LengthUnit,
    factor: f64,
}

impl Conversion {
    pub fn new(in_unit: &str, out_unit: &str) -> ScaleResult<Conversion> {
        let from = resolve_unit(in_unit)?;
        let to = resolve_unit(out_unit)?;
        let factor = conversion_factor(&from, &to);
        debug!(from = from.symbol, to = to.symbol, factor, "resolved conversion");
        Ok(Conversion { from, to, factor })
    }

    pub fn from_unit(&self) -> &LengthUnit {
        &self.from
    }

    pub fn to_unit(&self) -> &LengthUnit {
        &self.to
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Abbreviation of the outgoing unit.
    pub fn label(&self) -> &'static str {
        self.to.symbol
    }

    pub fn convert(&self, length: f64) -> f64 {
        length * self.factor
    }
}

use serde::{Deserialize, Serialize};

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ScaleUnit {
    Bytes,
    KiloBytes,
    MegaBytes,
}

impl std::str::FromStr for ScaleUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bytes" => Ok(Self::Bytes),
            "KiloBytes" => Ok(Self::KiloBytes),
            "MegaBytes" => Ok(Self::MegaBytes),
            other => Err(format!(
                "unknown scale '{other}', expected Bytes, KiloBytes or MegaBytes"
            )),
        }
    }
}

/// Which metric family a raw value belongs to. Each family has its own
/// factor table because the server reports them in different base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// `mem.*`, reported by the server in megabytes.
    Memory,
    /// `network.*`, reported in bytes.
    Network,
    /// Aggregate database sizes, reported in bytes.
    Sizes,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Multiply,
    Divide,
}

/// Factor and label picked for one (domain, unit) pair. Keeping them in one
/// value guarantees the label always matches the factor applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factor {
    op: Op,
    by: f64,
    pub label: &'static str,
}

impl Factor {
    pub fn apply(&self, raw: f64) -> f64 {
        match self.op {
            Op::Multiply => raw * self.by,
            Op::Divide => raw / self.by,
        }
    }

    pub fn reverse(&self, scaled: f64) -> f64 {
        match self.op {
            Op::Multiply => scaled / self.by,
            Op::Divide => scaled * self.by,
        }
    }
}

impl Domain {
    pub fn factor(self, unit: Option<ScaleUnit>) -> Factor {
        use ScaleUnit::*;
        let (op, by, label) = match (self, unit) {
            (Domain::Memory, Some(KiloBytes)) => (Op::Multiply, KIB, "KB"),
            (Domain::Memory, Some(Bytes)) => (Op::Multiply, MIB, "Bytes"),
            (Domain::Memory, Some(MegaBytes) | None) => (Op::Multiply, 1.0, "MB"),
            (Domain::Network, Some(KiloBytes)) => (Op::Divide, KIB, "KB"),
            (Domain::Network, Some(MegaBytes)) => (Op::Divide, MIB, "MB"),
            (Domain::Network, Some(Bytes) | None) => (Op::Divide, 1.0, "Bytes"),
            (Domain::Sizes, Some(KiloBytes)) => (Op::Divide, KIB, "KBs"),
            (Domain::Sizes, Some(MegaBytes)) => (Op::Divide, MIB, "MBs"),
            (Domain::Sizes, Some(Bytes) | None) => (Op::Divide, 1.0, "Bytes"),
        };
        Factor { op, by, label }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaled {
    pub value: f64,
    pub label: &'static str,
    factor: Factor,
}

impl Scaled {
    pub fn unscale(&self) -> f64 {
        self.factor.reverse(self.value)
    }

    pub fn display(&self) -> String {
        format!("{:.2} {}", self.value, self.label)
    }
}

/// Round half up to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

pub fn scale(raw: f64, unit: Option<ScaleUnit>, domain: Domain) -> Scaled {
    let factor = domain.factor(unit);
    Scaled {
        value: round2(factor.apply(raw)),
        label: factor.label,
        factor,
    }
}

/// Display string for an aggregate size. Missing or non-numeric input
/// renders as zero instead of failing.
pub fn format_size(raw: Option<f64>, unit: Option<ScaleUnit>) -> String {
    match raw {
        Some(v) if !v.is_nan() => scale(v, unit, Domain::Sizes).display(),
        _ => format!("0.00 {}", Domain::Sizes.factor(unit).label),
    }
}

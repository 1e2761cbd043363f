use serde::{Deserialize, Serialize};
use std::fmt;

const PRELIM_WEIGHT: f64 = 0.2;
const MIDTERM_WEIGHT: f64 = 0.2;
const SEMIFINAL_WEIGHT: f64 = 0.2;
const FINAL_WEIGHT: f64 = 0.4;

/// 1-decimal rounding used for every displayed grade:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// The four sub-assessment percentages of a grade record. `None` means the
/// component was never entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScores {
    pub prelim: Option<f64>,
    pub midterm: Option<f64>,
    pub semifinal: Option<f64>,
    #[serde(rename = "final")]
    pub final_: Option<f64>,
}

impl ComponentScores {
    pub fn new(
        prelim: Option<f64>,
        midterm: Option<f64>,
        semifinal: Option<f64>,
        final_: Option<f64>,
    ) -> Self {
        Self {
            prelim,
            midterm,
            semifinal,
            final_,
        }
    }

    /// Reads the four components out of a JSON object, coercing each one the
    /// same way form input is coerced. Missing keys and non-objects yield `None`s.
    pub fn from_json(v: &serde_json::Value) -> Self {
        let get = |key: &str| v.get(key).and_then(component_from_json);
        Self {
            prelim: get("prelim"),
            midterm: get("midterm"),
            semifinal: get("semifinal"),
            final_: get("final"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Excellent,
    Good,
    Passing,
    Failing,
}

impl Tier {
    /// Lower bounds are inclusive: exactly 90, 80 or 75 lands in the higher tier.
    pub fn from_final_grade(final_grade: f64) -> Self {
        if final_grade >= 90.0 {
            Tier::Excellent
        } else if final_grade >= 80.0 {
            Tier::Good
        } else if final_grade >= 75.0 {
            Tier::Passing
        } else {
            Tier::Failing
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Excellent => "excellent",
            Tier::Good => "good",
            Tier::Passing => "passing",
            Tier::Failing => "failing",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    pub final_grade: f64,
    pub tier: Tier,
}

/// Absent, non-finite and out-of-range components all count as 0.
pub fn coerce_component(v: Option<f64>) -> f64 {
    match v {
        Some(x) if x.is_finite() && (0.0..=100.0).contains(&x) => x,
        _ => 0.0,
    }
}

pub fn compute(scores: &ComponentScores) -> GradeResult {
    let weighted = PRELIM_WEIGHT * coerce_component(scores.prelim)
        + MIDTERM_WEIGHT * coerce_component(scores.midterm)
        + SEMIFINAL_WEIGHT * coerce_component(scores.semifinal)
        + FINAL_WEIGHT * coerce_component(scores.final_);
    let final_grade = round_off_1_decimal(weighted);
    GradeResult {
        final_grade,
        tier: Tier::from_final_grade(final_grade),
    }
}

/// Lenient numeric-prefix parse of form text: "85", " 85.5", "85abc" and
/// "1e2" parse; "", "abc" and "." do not. Trailing characters are ignored.
pub fn parse_component_text(s: &str) -> Option<f64> {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0usize;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        end = frac_end;
    }
    if digits == 0 {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    t[..end].parse::<f64>().ok()
}

/// Numbers pass through, strings go through `parse_component_text`, anything
/// else (null, bools, arrays, objects) is treated as not entered.
pub fn component_from_json(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_component_text(s),
        _ => None,
    }
}

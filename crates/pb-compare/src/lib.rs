#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

const PREVIEW_ELEMENTS: usize = 6;

/// A named numeric field read back from an implementation's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Scalar(f64),
    Array { shape: Vec<usize>, data: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    ShapeDataMismatch { shape: Vec<usize>, len: usize },
    ShapeOverflow { shape: Vec<usize> },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeDataMismatch { shape, len } => {
                write!(f, "shape {shape:?} does not describe {len} elements")
            }
            Self::ShapeOverflow { shape } => {
                write!(f, "shape {shape:?} overflows the element count")
            }
        }
    }
}

impl std::error::Error for FieldError {}

impl FieldValue {
    pub fn array(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, FieldError> {
        let numel = checked_shape_numel(&shape)?;
        if numel != data.len() {
            return Err(FieldError::ShapeDataMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self::Array { shape, data })
    }

    /// Integer fields are stored as `f64`. Values are exact up to 2^53 in
    /// magnitude; beyond that they round to the nearest representable float.
    pub fn from_ints(shape: Vec<usize>, data: &[i64]) -> Result<Self, FieldError> {
        Self::array(shape, data.iter().map(|value| *value as f64).collect())
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Scalar(_) => &[],
            Self::Array { shape, .. } => shape,
        }
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        match self {
            Self::Scalar(value) => std::slice::from_ref(value),
            Self::Array { data, .. } => data,
        }
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    fn kind_label(&self) -> &'static str {
        if self.is_scalar() { "scalar" } else { "array" }
    }

    fn preview(&self) -> String {
        match self {
            Self::Scalar(value) => format!("{value:.15}"),
            Self::Array { shape, data } => {
                let head = data
                    .iter()
                    .take(PREVIEW_ELEMENTS)
                    .map(|value| format!("{value:.15}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let ellipsis = if data.len() > PREVIEW_ELEMENTS {
                    ", ..."
                } else {
                    ""
                };
                format!("array{shape:?}[{head}{ellipsis}]")
            }
        }
    }
}

fn checked_shape_numel(shape: &[usize]) -> Result<usize, FieldError> {
    shape
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| FieldError::ShapeOverflow {
            shape: shape.to_vec(),
        })
}

/// Mixed absolute/relative closeness: `|a - b| <= atol + rtol * max(|a|, |b|)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Tolerance {
    pub const DEFAULT: Tolerance = Tolerance {
        atol: 1e-8,
        rtol: 1e-5,
    };

    #[must_use]
    pub const fn new(atol: f64, rtol: f64) -> Self {
        Self { atol, rtol }
    }

    #[must_use]
    pub const fn exact() -> Self {
        Self::new(0.0, 0.0)
    }

    #[must_use]
    pub fn close(&self, lhs: f64, rhs: f64) -> bool {
        if lhs.is_nan() || rhs.is_nan() {
            return lhs.is_nan() && rhs.is_nan();
        }
        if lhs.is_infinite() || rhs.is_infinite() {
            return lhs == rhs;
        }
        (lhs - rhs).abs() <= self.atol + self.rtol * lhs.abs().max(rhs.abs())
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    ParityOk,
    MissingField,
    KindMismatch,
    ShapeMismatch,
    ValueMismatch,
}

impl Verdict {
    #[must_use]
    pub const fn reason_code(self) -> &'static str {
        match self {
            Self::ParityOk => "parity_ok",
            Self::MissingField => "missing_field",
            Self::KindMismatch => "kind_mismatch",
            Self::ShapeMismatch => "shape_mismatch",
            Self::ValueMismatch => "value_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldComparison {
    pub field: String,
    pub verdict: Verdict,
    pub status: &'static str,
    pub mismatched_elements: usize,
    pub max_abs_diff: Option<f64>,
    pub lhs: String,
    pub rhs: String,
}

impl FieldComparison {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::ParityOk
    }

    fn new(field: &str, verdict: Verdict, lhs: String, rhs: String) -> Self {
        Self {
            field: field.to_string(),
            verdict,
            status: if verdict == Verdict::ParityOk {
                "pass"
            } else {
                "mismatch"
            },
            mismatched_elements: 0,
            max_abs_diff: None,
            lhs,
            rhs,
        }
    }
}

/// Compares two values of the field `name` under `tolerance`.
///
/// Arrays pass only when their shapes agree and every element pair is close.
/// The verdict does not depend on argument order.
#[must_use]
pub fn compare(
    name: &str,
    lhs: &FieldValue,
    rhs: &FieldValue,
    tolerance: Tolerance,
) -> FieldComparison {
    if lhs.is_scalar() != rhs.is_scalar() {
        return FieldComparison::new(
            name,
            Verdict::KindMismatch,
            lhs.kind_label().to_string(),
            rhs.kind_label().to_string(),
        );
    }
    if lhs.shape() != rhs.shape() || lhs.values().len() != rhs.values().len() {
        return FieldComparison::new(
            name,
            Verdict::ShapeMismatch,
            format!("{:?}", lhs.shape()),
            format!("{:?}", rhs.shape()),
        );
    }

    let mut mismatched_elements = 0usize;
    let mut max_abs_diff = 0.0f64;
    for (a, b) in lhs.values().iter().zip(rhs.values()) {
        if !tolerance.close(*a, *b) {
            mismatched_elements += 1;
        }
        let diff = (a - b).abs();
        if diff > max_abs_diff {
            max_abs_diff = diff;
        }
    }

    let verdict = if mismatched_elements == 0 {
        Verdict::ParityOk
    } else {
        Verdict::ValueMismatch
    };
    let mut comparison = FieldComparison::new(name, verdict, lhs.preview(), rhs.preview());
    comparison.mismatched_elements = mismatched_elements;
    comparison.max_abs_diff = Some(max_abs_diff);
    comparison
}

/// Like [`compare`], but a field absent on either side is a reported mismatch.
#[must_use]
pub fn compare_present(
    name: &str,
    lhs: Option<&FieldValue>,
    rhs: Option<&FieldValue>,
    tolerance: Tolerance,
) -> FieldComparison {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => compare(name, lhs, rhs, tolerance),
        (lhs, rhs) => FieldComparison::new(
            name,
            Verdict::MissingField,
            presence_label(lhs),
            presence_label(rhs),
        ),
    }
}

fn presence_label(value: Option<&FieldValue>) -> String {
    value.map_or_else(|| "<missing>".to_string(), FieldValue::preview)
}

//! Tracked value types and element dtypes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Primitive element type of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Integer metric value.
    Int,
    /// Floating-point metric value (default for sequences with no dtype).
    Float,
    /// Text record.
    Text,
    /// Encoded image.
    Image,
    /// Encoded audio clip.
    Audio,
    /// Histogram of a value distribution.
    Distribution,
    /// Figure description (e.g. a plotting library's JSON spec).
    Figure,
}

impl DType {
    /// Stored name of the dtype.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Distribution => "distribution",
            Self::Figure => "figure",
        }
    }

    /// Parse a stored dtype name; unknown names yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "distribution" => Some(Self::Distribution),
            "figure" => Some(Self::Figure),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded image payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Encoding format (e.g. "png").
    pub format: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Optional caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Encoded audio payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audio {
    /// Encoding format (e.g. "wav").
    pub format: String,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Optional caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Histogram of a value distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Histogram range `(low, high)`.
    pub range: (f64, f64),
    /// Bin weights, `bin_count` long.
    pub weights: Vec<f64>,
}

impl Distribution {
    /// Histogram of `samples` over `bin_count` equal-width bins.
    ///
    /// Returns `None` for empty input, zero bins, or non-finite samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_samples(samples: &[f64], bin_count: usize) -> Option<Self> {
        if samples.is_empty() || bin_count == 0 || samples.iter().any(|s| !s.is_finite()) {
            return None;
        }
        let low = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let high = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = (high - low) / bin_count as f64;

        let mut weights = vec![0.0; bin_count];
        for &sample in samples {
            let bin = if width > 0.0 {
                (((sample - low) / width) as usize).min(bin_count - 1)
            } else {
                0
            };
            weights[bin] += 1.0;
        }
        Some(Self {
            range: (low, high),
            weights,
        })
    }

    /// Number of bins.
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.weights.len()
    }
}

/// A value passed to `Run::track`.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackedValue {
    /// Integer metric.
    Int(i64),
    /// Float metric.
    Float(f64),
    /// Text record.
    Text(String),
    /// Image record.
    Image(Image),
    /// Audio record.
    Audio(Audio),
    /// Distribution record.
    Distribution(Distribution),
    /// Figure record.
    Figure(Value),
}

impl TrackedValue {
    /// Dtype of this value.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::Int(_) => DType::Int,
            Self::Float(_) => DType::Float,
            Self::Text(_) => DType::Text,
            Self::Image(_) => DType::Image,
            Self::Audio(_) => DType::Audio,
            Self::Distribution(_) => DType::Distribution,
            Self::Figure(_) => DType::Figure,
        }
    }

    /// Stored form of the value.
    ///
    /// Non-finite floats are stored as `null`.
    ///
    /// # Errors
    ///
    /// Returns error if an object payload fails to serialize.
    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Self::Text(v) => Value::String(v.clone()),
            Self::Image(v) => serde_json::to_value(v)?,
            Self::Audio(v) => serde_json::to_value(v)?,
            Self::Distribution(v) => serde_json::to_value(v)?,
            Self::Figure(v) => v.clone(),
        })
    }

    /// Decode a stored value of the given dtype.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the stored value doesn't match `dtype`.
    pub fn from_json(dtype: DType, value: Value) -> Result<Self> {
        let mismatch = |value: &Value| Error::Storage(format!("stored value {value} is not a valid {dtype}"));
        Ok(match dtype {
            DType::Int => Self::Int(value.as_i64().ok_or_else(|| mismatch(&value))?),
            DType::Float => Self::Float(if value.is_null() {
                f64::NAN
            } else {
                value.as_f64().ok_or_else(|| mismatch(&value))?
            }),
            DType::Text => match value {
                Value::String(text) => Self::Text(text),
                other => return Err(mismatch(&other)),
            },
            DType::Image => Self::Image(serde_json::from_value(value)?),
            DType::Audio => Self::Audio(serde_json::from_value(value)?),
            DType::Distribution => Self::Distribution(serde_json::from_value(value)?),
            DType::Figure => Self::Figure(value),
        })
    }

    /// Numeric view of metric values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for TrackedValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for TrackedValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<i64> for TrackedValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for TrackedValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for TrackedValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TrackedValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Image> for TrackedValue {
    fn from(value: Image) -> Self {
        Self::Image(value)
    }
}

impl From<Audio> for TrackedValue {
    fn from(value: Audio) -> Self {
        Self::Audio(value)
    }
}

impl From<Distribution> for TrackedValue {
    fn from(value: Distribution) -> Self {
        Self::Distribution(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dtype_names() {
        for dtype in [
            DType::Int,
            DType::Float,
            DType::Text,
            DType::Image,
            DType::Audio,
            DType::Distribution,
            DType::Figure,
        ] {
            assert_eq!(DType::parse(dtype.as_str()), Some(dtype));
        }
        assert_eq!(DType::parse("list(image)"), None);
    }

    #[test]
    fn test_non_finite_float_stored_as_null() {
        let value = TrackedValue::Float(f64::NAN).to_json().unwrap();
        assert_eq!(value, Value::Null);

        let decoded = TrackedValue::from_json(DType::Float, value).unwrap();
        assert!(decoded.as_f64().unwrap().is_nan());
    }

    #[test]
    fn test_from_json_rejects_mismatched_value() {
        let err = TrackedValue::from_json(DType::Int, json!("seven")).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_distribution_from_samples() {
        let dist = Distribution::from_samples(&[0.0, 0.5, 1.0, 1.0], 2).unwrap();
        assert_eq!(dist.bin_count(), 2);
        assert_eq!(dist.range, (0.0, 1.0));
        assert_eq!(dist.weights, vec![1.0, 3.0]);

        assert!(Distribution::from_samples(&[], 4).is_none());
        assert!(Distribution::from_samples(&[1.0], 0).is_none());
        assert!(Distribution::from_samples(&[f64::NAN], 3).is_none());
    }

    #[test]
    fn test_constant_samples_fill_first_bin() {
        let dist = Distribution::from_samples(&[2.0, 2.0, 2.0], 4).unwrap();
        assert_eq!(dist.weights, vec![3.0, 0.0, 0.0, 0.0]);
    }
}

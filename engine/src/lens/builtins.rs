//! Stock lenses over numeric values.

use ringcore_types::{LensFailure, Value};
use serde_json::json;

use super::{Lens, LensContext};

const DEFAULT_BASE_HZ: f64 = 440.0;

fn numeric(value: &Value) -> Result<f64, LensFailure> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LensFailure::new(format!("expected a finite number, got {value}")))
}

/// Maps a number onto a blue-to-red hue between context `min` (default 0)
/// and `max` (default 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorLens;

impl Lens for ColorLens {
    fn transform(&self, value: &Value, context: &LensContext) -> Result<Value, LensFailure> {
        let v = numeric(value)?;
        let min = context.attribute_f64("min").unwrap_or(0.0);
        let max = context.attribute_f64("max").unwrap_or(1.0);
        if max <= min {
            return Err(LensFailure::new(format!(
                "color range is empty: min {min} >= max {max}"
            )));
        }
        let t = ((v - min) / (max - min)).clamp(0.0, 1.0);
        let hue = 240.0 * (1.0 - t);
        let (r, g, b) = hue_to_rgb(hue);
        Ok(json!({
            "hex": format!("#{r:02x}{g:02x}{b:02x}"),
            "hue": hue,
        }))
    }
}

/// Fully saturated, full-value HSV to 8-bit RGB.
fn hue_to_rgb(hue: f64) -> (u8, u8, u8) {
    let h = (hue % 360.0) / 60.0;
    let x = 1.0 - ((h % 2.0) - 1.0).abs();
    let (r, g, b) = match h {
        h if h < 1.0 => (1.0, x, 0.0),
        h if h < 2.0 => (x, 1.0, 0.0),
        h if h < 3.0 => (0.0, 1.0, x),
        h if h < 4.0 => (0.0, x, 1.0),
        h if h < 5.0 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let byte = |c: f64| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    (byte(r), byte(g), byte(b))
}

/// Treats the value as semitones above context `base_hz` (default 440).
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyLens;

impl Lens for FrequencyLens {
    fn transform(&self, value: &Value, context: &LensContext) -> Result<Value, LensFailure> {
        let semitones = numeric(value)?;
        let base = context.attribute_f64("base_hz").unwrap_or(DEFAULT_BASE_HZ);
        if base <= 0.0 {
            return Err(LensFailure::new(format!("base_hz must be positive, got {base}")));
        }
        Ok(json!({ "hz": base * (semitones / 12.0).exp2() }))
    }
}

/// Scales the unit vector of context `direction` (default `[1, 0, 0]`) by the
/// value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceLens;

impl Lens for ForceLens {
    fn transform(&self, value: &Value, context: &LensContext) -> Result<Value, LensFailure> {
        let magnitude = numeric(value)?;
        let direction = match context.attributes.get("direction") {
            None => vec![1.0, 0.0, 0.0],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_f64()
                        .ok_or_else(|| LensFailure::new("direction components must be numbers"))
                })
                .collect::<Result<Vec<f64>, _>>()?,
            Some(other) => {
                return Err(LensFailure::new(format!(
                    "direction must be an array, got {other}"
                )));
            }
        };

        let norm = direction.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(LensFailure::new("direction has zero length"));
        }
        let vector: Vec<f64> = direction.iter().map(|c| c / norm * magnitude).collect();
        Ok(json!({ "vector": vector, "magnitude": magnitude.abs() }))
    }
}

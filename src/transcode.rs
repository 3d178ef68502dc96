use crate::model::{Encoding, ScienceField, NODATA_VALUE};

const NODATA_INT: i32 = NODATA_VALUE as i32;

/// Scales a raw value into fixed point. The sentinel passes through unchanged,
/// and non-finite values are treated as missing.
pub fn to_scaled_int(value: f64, multiplier: f64) -> i32 {
    if value == NODATA_VALUE || !value.is_finite() {
        return NODATA_INT;
    }
    (value * multiplier).round_ties_even() as i32
}

pub fn passthrough_int(value: f64) -> i32 {
    if !value.is_finite() {
        return NODATA_INT;
    }
    value.trunc() as i32
}

pub fn encode(value: f64, encoding: Encoding) -> i32 {
    match encoding {
        Encoding::Scaled(multiplier) => to_scaled_int(value, multiplier),
        Encoding::Passthrough => passthrough_int(value),
    }
}

/// Encodes the shots at `indices` of one field. The input slice is not modified.
pub fn transcode_selected(values: &[f64], indices: &[usize], field: ScienceField) -> Vec<i32> {
    let encoding = field.encoding();
    indices.iter().map(|&i| encode(values[i], encoding)).collect()
}

/// Encodes a whole field array.
pub fn transcode(values: &[f64], field: ScienceField) -> Vec<i32> {
    let encoding = field.encoding();
    values.iter().map(|&v| encode(v, encoding)).collect()
}

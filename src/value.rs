//! Value types that need validation before they can be handed to the
//! [`crate::buffer::Buffer`] encoder: arrays (rectangular f64 tensors) and
//! decimals (unscaled-bigint or text-literal form).
//!
//! Follows the validate-before-touching-the-wire pattern seen in
//! `mssql/connection/ssrp.rs`'s `parse_tcp_port`, which rejects malformed
//! input before any state changes.

use crate::error::{Error, Result};
use num_bigint::{BigInt, Sign};

/// A rectangular, row-major f64 array column value (1..32 dimensions).
#[derive(Debug, Clone)]
pub struct ArrayValue {
    shape: Vec<u32>,
    data: Vec<f64>,
}

impl ArrayValue {
    /// Build from nested `Vec`s of arbitrary (but matching) depth. The
    /// element type is frozen to f64; other leaf types are rejected here
    /// rather than silently coerced.
    pub fn from_nested(nested: &NestedF64) -> Result<Self> {
        let mut shape = Vec::new();
        measure(nested, 0, &mut shape)?;
        if shape.len() > 32 {
            return Err(Error::layout(format!(
                "Array dimension count {} exceeds the maximum of 32",
                shape.len()
            )));
        }
        if shape.is_empty() {
            return Err(Error::layout("Array must have at least one dimension"));
        }
        let mut data = Vec::with_capacity(shape.iter().map(|&n| n as usize).product());
        flatten(nested, &mut data)?;
        Ok(ArrayValue { shape, data })
    }

    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

/// A minimal nested-array representation accepted from callers: either a
/// leaf row of finite-or-NaN f64s, or a list of equally-shaped sub-arrays.
#[derive(Debug, Clone)]
pub enum NestedF64 {
    Leaf(Vec<f64>),
    Nested(Vec<NestedF64>),
}

fn measure(n: &NestedF64, depth: usize, shape: &mut Vec<u32>) -> Result<()> {
    match n {
        NestedF64::Leaf(v) => {
            set_or_check(shape, depth, v.len())?;
        }
        NestedF64::Nested(children) => {
            set_or_check(shape, depth, children.len())?;
            for child in children {
                measure(child, depth + 1, shape)?;
            }
        }
    }
    Ok(())
}

fn set_or_check(shape: &mut Vec<u32>, depth: usize, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::layout("Array dimension length exceeds u32::MAX"))?;
    match shape.get(depth) {
        Some(&existing) if existing != len => Err(Error::layout(format!(
            "Lengths of sub-arrays do not match at dimension {}: expected {}, got {}",
            depth, existing, len
        ))),
        Some(_) => Ok(()),
        None => {
            shape.push(len);
            Ok(())
        }
    }
}

fn flatten(n: &NestedF64, out: &mut Vec<f64>) -> Result<()> {
    match n {
        NestedF64::Leaf(v) => {
            out.extend_from_slice(v);
            Ok(())
        }
        NestedF64::Nested(children) => {
            for child in children {
                flatten(child, out)?;
            }
            Ok(())
        }
    }
}

/// A decimal column value, either a pre-validated text literal or an
/// unscaled-bigint/scale pair encoded to two's-complement big-endian bytes.
#[derive(Debug, Clone)]
pub enum DecimalValue {
    Text(String),
    Unscaled { unscaled: BigInt, scale: u8 },
}

impl DecimalValue {
    /// Validate and wrap a text literal. Must match `-?\d+(\.\d+)?`;
    /// exponent forms (`1e10`) are rejected even case-insensitively.
    pub fn text(literal: impl Into<String>) -> Result<Self> {
        let literal = literal.into();
        if !is_valid_decimal_literal(&literal) {
            return Err(Error::layout(format!(
                "Invalid decimal literal: '{}'",
                literal
            )));
        }
        Ok(DecimalValue::Text(literal))
    }

    pub fn unscaled(unscaled: BigInt, scale: u8) -> Result<Self> {
        if scale > 76 {
            return Err(Error::layout(format!(
                "Decimal scale {} exceeds the maximum of 76",
                scale
            )));
        }
        if two_complement_be(&unscaled).len() > 127 {
            return Err(Error::layout(
                "Decimal unscaled value is too large to encode: payload exceeds 127 bytes",
            ));
        }
        Ok(DecimalValue::Unscaled { unscaled, scale })
    }

    /// Renders (scale, payload) for the binary encoding. Positive values use
    /// the minimal two's-complement big-endian form
    /// (`num_bigint::BigInt::to_signed_bytes_be`), with a leading zero byte
    /// when the top bit would otherwise be mistaken for a sign bit. Negative
    /// values are always widened by one extra `0xFF` sign byte beyond the
    /// minimal encoding, matching the wire example for `-10`/scale 2
    /// (`ff f6`, not the 1-byte minimal `f6`). An empty payload denotes NULL.
    /// `DecimalValue::unscaled` already rejects values whose encoding would
    /// exceed 127 bytes, so this never needs to signal overflow.
    pub fn to_binary(&self) -> Option<(u8, Vec<u8>)> {
        match self {
            DecimalValue::Unscaled { unscaled, scale } => {
                Some((*scale, two_complement_be(unscaled)))
            }
            DecimalValue::Text(_) => None,
        }
    }

    pub fn to_text(&self) -> Option<&str> {
        match self {
            DecimalValue::Text(s) => Some(s),
            DecimalValue::Unscaled { .. } => None,
        }
    }
}

fn two_complement_be(unscaled: &BigInt) -> Vec<u8> {
    let bytes = unscaled.to_signed_bytes_be();
    if unscaled.sign() == Sign::Minus {
        let mut widened = Vec::with_capacity(bytes.len() + 1);
        widened.push(0xFF);
        widened.extend_from_slice(&bytes);
        widened
    } else {
        bytes
    }
}

fn is_valid_decimal_literal(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    if chars.peek() == Some(&'-') {
        chars.next();
    }
    let mut saw_digit = false;
    let mut saw_dot = false;
    for ch in chars {
        match ch {
            '0'..='9' => saw_digit = true,
            '.' if !saw_dot => saw_dot = true,
            _ => return false,
        }
    }
    saw_digit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_rejects_ragged_shape() {
        let nested = NestedF64::Nested(vec![
            NestedF64::Leaf(vec![1.0, 2.0]),
            NestedF64::Leaf(vec![1.0]),
        ]);
        let err = ArrayValue::from_nested(&nested).unwrap_err();
        assert!(matches!(err, Error::Layout(_)));
    }

    #[test]
    fn array_2d_shape_and_flatten() {
        let nested = NestedF64::Nested(vec![
            NestedF64::Leaf(vec![12.3]),
            NestedF64::Leaf(vec![23.4]),
        ]);
        let arr = ArrayValue::from_nested(&nested).unwrap();
        assert_eq!(arr.shape(), &[2, 1]);
        assert_eq!(arr.data(), &[12.3, 23.4]);
    }

    #[test]
    fn decimal_text_rejects_exponent_form() {
        assert!(DecimalValue::text("1e10").is_err());
        assert!(DecimalValue::text("-12.5").is_ok());
        assert!(DecimalValue::text("7").is_ok());
    }

    #[test]
    fn decimal_unscaled_roundtrips_via_bigint() {
        let d = DecimalValue::unscaled(BigInt::from(-10), 2).unwrap();
        let (scale, payload) = d.to_binary().unwrap();
        assert_eq!(scale, 2);
        let back = BigInt::from_signed_bytes_be(&payload);
        assert_eq!(back, BigInt::from(-10));
    }

    #[test]
    fn decimal_positive_high_bit_gets_sign_byte() {
        // 255 needs a leading 0x00 so it isn't read back as -1.
        let d = DecimalValue::unscaled(BigInt::from(255), 0).unwrap();
        let (_, payload) = d.to_binary().unwrap();
        assert_eq!(payload, vec![0x00, 0xff]);
    }

    #[test]
    fn decimal_scale_out_of_range_rejected() {
        assert!(DecimalValue::unscaled(BigInt::from(1), 77).is_err());
    }

    #[test]
    fn decimal_negative_mid_example_produces_two_byte_payload() {
        let d = DecimalValue::unscaled(BigInt::from(-10), 2).unwrap();
        let (scale, payload) = d.to_binary().unwrap();
        assert_eq!(scale, 2);
        assert_eq!(payload, vec![0xff, 0xf6]);
    }

    #[test]
    fn decimal_unscaled_rejects_oversized_payload() {
        let huge = BigInt::from_bytes_be(Sign::Plus, &[0x01; 200]);
        assert!(DecimalValue::unscaled(huge, 0).is_err());
    }
}

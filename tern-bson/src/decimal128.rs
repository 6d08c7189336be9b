//! IEEE 754-2008 128-bit decimal values in BID encoding.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const EXPONENT_BIAS: i32 = 6176;
const EXPONENT_MAX: i32 = 6111;
const EXPONENT_MIN: i32 = -6176;
const MAX_DIGITS: usize = 34;
const MAX_COEFFICIENT: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;

const COMBINATION_INFINITY: u64 = 30;
const COMBINATION_NAN: u64 = 31;

/// A 128-bit decimal, stored as its 16 little-endian wire bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    bytes: [u8; 16],
}

enum Parts {
    Finite {
        negative: bool,
        exponent: i32,
        coefficient: u128,
    },
    Infinity {
        negative: bool,
    },
    NaN,
}

impl Decimal128 {
    /// Wrap raw wire bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// The raw wire bytes.
    pub const fn bytes(&self) -> [u8; 16] {
        self.bytes
    }

    fn halves(&self) -> (u64, u64) {
        let mut low = [0u8; 8];
        let mut high = [0u8; 8];
        low.copy_from_slice(&self.bytes[..8]);
        high.copy_from_slice(&self.bytes[8..]);
        (u64::from_le_bytes(high), u64::from_le_bytes(low))
    }

    fn from_halves(high: u64, low: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&low.to_le_bytes());
        bytes[8..].copy_from_slice(&high.to_le_bytes());
        Self { bytes }
    }

    fn parts(&self) -> Parts {
        let (high, low) = self.halves();
        let negative = high >> 63 == 1;
        let combination = (high >> 58) & 0x1f;

        if combination >> 3 == 0b11 {
            match combination {
                COMBINATION_INFINITY => return Parts::Infinity { negative },
                COMBINATION_NAN => return Parts::NaN,
                _ => {
                    // 0b11 form always implies a coefficient above 10^34 - 1.
                    let biased = ((high >> 47) & 0x3fff) as i32;
                    return Parts::Finite {
                        negative,
                        exponent: biased - EXPONENT_BIAS,
                        coefficient: 0,
                    };
                }
            }
        }

        let biased = ((high >> 49) & 0x3fff) as i32;
        let mut coefficient = (((high & 0x0001_ffff_ffff_ffff) as u128) << 64) | low as u128;
        if coefficient > MAX_COEFFICIENT {
            coefficient = 0;
        }
        Parts::Finite {
            negative,
            exponent: biased - EXPONENT_BIAS,
            coefficient,
        }
    }

    /// Check for NaN.
    pub fn is_nan(&self) -> bool {
        matches!(self.parts(), Parts::NaN)
    }

    /// Check for positive or negative infinity.
    pub fn is_infinite(&self) -> bool {
        matches!(self.parts(), Parts::Infinity { .. })
    }

    fn encode(negative: bool, exponent: i32, coefficient: u128) -> Self {
        let biased = (exponent + EXPONENT_BIAS) as u64;
        let sign = if negative { 1u64 << 63 } else { 0 };
        let high = sign | (biased << 49) | (coefficient >> 64) as u64;
        Self::from_halves(high, coefficient as u64)
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, exponent, coefficient) = match self.parts() {
            Parts::NaN => return f.write_str("NaN"),
            Parts::Infinity { negative } => {
                return f.write_str(if negative { "-Infinity" } else { "Infinity" });
            }
            Parts::Finite {
                negative,
                exponent,
                coefficient,
            } => (negative, exponent, coefficient),
        };

        let digits = coefficient.to_string();
        let adjusted = digits.len() as i32 - 1 + exponent;
        let mut out = String::with_capacity(digits.len() + 8);
        if negative {
            out.push('-');
        }

        if exponent > 0 || adjusted < -6 {
            out.push_str(&digits[..1]);
            if digits.len() > 1 {
                out.push('.');
                out.push_str(&digits[1..]);
            }
            out.push('E');
            if adjusted >= 0 {
                out.push('+');
            }
            out.push_str(&adjusted.to_string());
        } else if exponent == 0 {
            out.push_str(&digits);
        } else {
            let radix = digits.len() as i32 + exponent;
            if radix > 0 {
                let radix = radix as usize;
                out.push_str(&digits[..radix]);
                out.push('.');
                out.push_str(&digits[radix..]);
            } else {
                out.push_str("0.");
                for _ in 0..-radix {
                    out.push('0');
                }
                out.push_str(&digits);
            }
        }

        f.write_str(&out)
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal128(\"{}\")", self)
    }
}

impl FromStr for Decimal128 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidDecimal128(format!("'{}': {}", s, reason));

        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let lower = body.to_ascii_lowercase();
        if lower == "infinity" || lower == "inf" {
            let high = (if negative { 1u64 << 63 } else { 0 }) | (COMBINATION_INFINITY << 58);
            return Ok(Self::from_halves(high, 0));
        }
        if lower == "nan" {
            return Ok(Self::from_halves(COMBINATION_NAN << 58, 0));
        }

        let (mantissa, exp_part) = match body.find(['e', 'E']) {
            Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
            None => (body, None),
        };

        let mut exponent: i64 = match exp_part {
            Some(e) => e.parse::<i64>().map_err(|_| invalid("bad exponent"))?,
            None => 0,
        };
        if exponent.unsigned_abs() > 100_000 {
            return Err(invalid("exponent out of range"));
        }

        let mut digits = String::with_capacity(mantissa.len());
        let mut seen_point = false;
        for c in mantissa.chars() {
            match c {
                '0'..='9' => {
                    digits.push(c);
                    if seen_point {
                        exponent -= 1;
                    }
                }
                '.' if !seen_point => seen_point = true,
                _ => return Err(invalid("unexpected character")),
            }
        }
        if digits.is_empty() {
            return Err(invalid("no digits"));
        }

        let mut significant = digits.trim_start_matches('0').to_string();

        // Drop trailing zeros that cannot be stored, raising the exponent instead.
        while significant.len() > MAX_DIGITS && significant.ends_with('0') {
            significant.pop();
            exponent += 1;
        }
        if significant.len() > MAX_DIGITS {
            return Err(invalid("too many significant digits"));
        }

        let mut exponent = exponent as i32;
        while exponent > EXPONENT_MAX && !significant.is_empty() && significant.len() < MAX_DIGITS {
            significant.push('0');
            exponent -= 1;
        }
        while exponent < EXPONENT_MIN && significant.ends_with('0') {
            significant.pop();
            exponent += 1;
        }

        if significant.is_empty() {
            exponent = exponent.clamp(EXPONENT_MIN, EXPONENT_MAX);
            return Ok(Self::encode(negative, exponent, 0));
        }
        if !(EXPONENT_MIN..=EXPONENT_MAX).contains(&exponent) {
            return Err(invalid("exponent out of range"));
        }

        let coefficient: u128 = significant
            .parse()
            .map_err(|_| invalid("coefficient out of range"))?;
        Ok(Self::encode(negative, exponent, coefficient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) -> String {
        s.parse::<Decimal128>().unwrap().to_string()
    }

    #[test]
    fn test_simple_values() {
        assert_eq!(round_trip("0"), "0");
        assert_eq!(round_trip("1"), "1");
        assert_eq!(round_trip("-1"), "-1");
        assert_eq!(round_trip("0.1"), "0.1");
        assert_eq!(round_trip("-0.001"), "-0.001");
        assert_eq!(round_trip("12345678.90"), "12345678.90");
    }

    #[test]
    fn test_scientific_forms() {
        assert_eq!(round_trip("1E+3"), "1E+3");
        assert_eq!(round_trip("1.000000000000000000000000000000000E+6144"), "1.000000000000000000000000000000000E+6144");
        assert_eq!(round_trip("1E-7"), "1E-7");
        assert_eq!(round_trip("0.0000001"), "1E-7");
        assert_eq!(round_trip("0.000001"), "0.000001");
    }

    #[test]
    fn test_special_values() {
        assert!("NaN".parse::<Decimal128>().unwrap().is_nan());
        assert!("-Infinity".parse::<Decimal128>().unwrap().is_infinite());
        assert_eq!(round_trip("inf"), "Infinity");
        assert_eq!(round_trip("-Inf"), "-Infinity");
    }

    #[test]
    fn test_known_encoding() {
        // 1 is coefficient 1, exponent 0 => high word 0x3040000000000000.
        let one: Decimal128 = "1".parse().unwrap();
        let mut expected = [0u8; 16];
        expected[0] = 1;
        expected[14] = 0x40;
        expected[15] = 0x30;
        assert_eq!(one.bytes(), expected);
    }

    #[test]
    fn test_rejects_inexact() {
        assert!("1234567890123456789012345678901234567".parse::<Decimal128>().is_err());
        assert!("1.2.3".parse::<Decimal128>().is_err());
        assert!("".parse::<Decimal128>().is_err());
        assert!("1E+7000".parse::<Decimal128>().is_err());
    }

    #[test]
    fn test_clamps_trailing_zeros() {
        assert_eq!(round_trip("10000000000000000000000000000000000000"), "1.000000000000000000000000000000000E+37");
    }
}

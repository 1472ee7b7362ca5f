// Kubernetes resource quantities ("10Gi", "500M", "1.5Ti", "1e9") as integer bytes.

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(char, i32); 7] = [
    ('m', -3),
    ('k', 3),
    ('M', 6),
    ('G', 9),
    ('T', 12),
    ('P', 15),
    ('E', 18),
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} is negative")]
    Negative(String),

    #[error("quantity {0:?} does not fit in 64-bit bytes")]
    Overflow(String),
}

/// Parses a quantity into whole bytes, rounding fractional bytes up.
pub fn parse_quantity(input: &str) -> Result<u64, QuantityError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }
    if s.starts_with('-') {
        return Err(QuantityError::Negative(input.to_string()));
    }

    let (number, binary_power, mut exp10) = split_suffix(s);
    let (mantissa, number_exp10) =
        parse_decimal(number).ok_or_else(|| QuantityError::Invalid(input.to_string()))?;
    exp10 += number_exp10;

    let overflow = || QuantityError::Overflow(input.to_string());
    let mut value = mantissa;
    if binary_power > 0 {
        value = value
            .checked_mul(1u128 << (10 * binary_power))
            .ok_or_else(overflow)?;
    }
    if exp10 >= 0 {
        let scale = 10u128.checked_pow(exp10 as u32).ok_or_else(overflow)?;
        value = value.checked_mul(scale).ok_or_else(overflow)?;
    } else {
        let scale = 10u128
            .checked_pow(exp10.unsigned_abs())
            .ok_or_else(overflow)?;
        value = value.div_ceil(scale);
    }
    u64::try_from(value).map_err(|_| overflow())
}

/// Formats bytes with the largest binary suffix that divides them exactly.
pub fn format_bytes(bytes: u64) -> String {
    for (suffix, power) in BINARY_SUFFIXES.iter().rev() {
        let unit = 1u64 << (10 * power);
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

// Returns (number part, binary power, decimal exponent from the suffix).
fn split_suffix(s: &str) -> (&str, u32, i32) {
    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return (number, power, 0);
        }
    }
    if let Some(last) = s.chars().last() {
        for (suffix, exp) in DECIMAL_SUFFIXES {
            if last == suffix {
                return (&s[..s.len() - 1], 0, exp);
            }
        }
    }
    (s, 0, 0)
}

// "12.5e3" -> (125, 2); digits only, optional fraction and exponent.
fn parse_decimal(s: &str) -> Option<(u128, i32)> {
    let s = s.strip_prefix('+').unwrap_or(s);
    let (significand, exponent) = match s.find(['e', 'E']) {
        Some(idx) => (&s[..idx], s[idx + 1..].parse::<i32>().ok()?),
        None => (s, 0),
    };
    let (whole, fraction) = match significand.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (significand, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", whole, fraction);
    let trimmed = digits.trim_start_matches('0');
    let mantissa = if trimmed.is_empty() {
        0
    } else {
        trimmed.parse::<u128>().ok()?
    };
    let fraction_len = i32::try_from(fraction.len()).ok()?;
    Some((mantissa, exponent.checked_sub(fraction_len)?))
}

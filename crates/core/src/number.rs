//! Number <-> string coercion the way the runtime performs it
//!
//! Strings convert to numbers when they read as a decimal or hexadecimal
//! integer, or as a decimal float; surrounding whitespace is ignored.
//! Floats format with 14 significant digits and keep a trailing `.0` when
//! they would otherwise read as an integer.

/// A parsed numeric literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeral {
    Int(i64),
    Float(f64),
}

impl Numeral {
    pub fn as_f64(self) -> f64 {
        match self {
            Numeral::Int(n) => n as f64,
            Numeral::Float(f) => f,
        }
    }

    pub fn as_exact_i64(self) -> Option<i64> {
        match self {
            Numeral::Int(n) => Some(n),
            Numeral::Float(f) => float_to_exact_i64(f),
        }
    }
}

/// Integer value of `f` when it has an exact integer representation.
pub fn float_to_exact_i64(f: f64) -> Option<i64> {
    // 2^63 is the first float outside the i64 range.
    if f.fract() == 0.0 && f >= -9_223_372_036_854_775_808.0 && f < 9_223_372_036_854_775_808.0 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a numeric string.
pub fn parse_numeral(bytes: &[u8]) -> Option<Numeral> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    let (negative, unsigned) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        // Hex integers wrap around, as in the runtime.
        let mut value: i64 = 0;
        for b in hex.bytes() {
            let digit = (b as char).to_digit(16)? as i64;
            value = value.wrapping_mul(16).wrapping_add(digit);
        }
        return Some(Numeral::Int(if negative {
            value.wrapping_neg()
        } else {
            value
        }));
    }

    if !unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        // Rejects "inf", "nan" and friends that Rust's float parser accepts.
        return None;
    }

    if unsigned.bytes().all(|b| b.is_ascii_digit())
        && let Ok(n) = text.parse::<i64>()
    {
        return Some(Numeral::Int(n));
    }

    text.parse::<f64>().ok().map(Numeral::Float)
}

/// Format a float with 14 significant digits (`%.14g`), appending `.0` to
/// results that would read back as integers.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }

    let mut out = format_g14(f);
    if out.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        out.push_str(".0");
    }
    out
}

fn format_g14(f: f64) -> String {
    const PRECISION: i32 = 14;

    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.*e}", (PRECISION - 1) as usize, f);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= PRECISION {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            strip_trailing_zeros(mantissa),
            sign,
            exponent.abs()
        )
    } else {
        let decimals = (PRECISION - 1 - exponent) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, f)).to_string()
    }
}

fn strip_trailing_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Runtime formatting of an integer.
pub fn format_integer(n: i64) -> String {
    n.to_string()
}

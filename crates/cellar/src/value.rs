use std::{
    fmt,
    hash::Hash,
    sync::LazyLock,
};

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapId},
    resource::ResourceTracker,
    tracer::HeapTracer,
    unicode::JsString,
};

/// Largest integer index accepted by `ToIndex` (2^53 - 1).
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Fixed seeds so key hashes are reproducible across heaps and snapshots.
static KEY_HASHER: LazyLock<RandomState> = LazyLock::new(|| {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

/// A script value.
///
/// Primitive values are stored inline. Objects live in the heap and are referenced
/// by `Ref`; such a reference is only valid until the next call that may collect,
/// unless it is held in a root or inside another cell.
///
/// `PartialEq` is structural (so `NaN != NaN`); collections use
/// [`Value::same_value_zero`] instead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(JsString),
    Ref(HeapId),
}

/// Hashable projection of a key after SameValueZero normalisation.
#[derive(Hash)]
enum KeyRepr<'a> {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(&'a [u16]),
    Object(u64),
}

impl Value {
    /// The `SameValueZero` comparison used for collection keys.
    ///
    /// `NaN` equals itself and `+0` equals `-0`; objects compare by identity.
    #[must_use]
    pub fn same_value_zero(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }

    /// Replaces `-0` with `+0`, leaving every other value untouched.
    ///
    /// Keys are stored normalised so iteration never yields `-0`.
    #[must_use]
    pub fn normalize_zero(self) -> Self {
        match self {
            Self::Number(n) if n == 0.0 => Self::Number(0.0),
            other => other,
        }
    }

    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Hash consistent with [`Self::same_value_zero`].
    ///
    /// Objects hash by their stable [`ObjectId`](crate::heap::ObjectId), so the
    /// hash survives relocation by the collector.
    pub(crate) fn key_hash(&self, heap: &Heap<impl ResourceTracker, impl HeapTracer>) -> u64 {
        let repr = match self {
            Self::Undefined => KeyRepr::Undefined,
            Self::Null => KeyRepr::Null,
            Self::Bool(b) => KeyRepr::Bool(*b),
            Self::Number(n) if n.is_nan() => KeyRepr::Number(f64::NAN.to_bits()),
            Self::Number(n) if *n == 0.0 => KeyRepr::Number(0),
            Self::Number(n) => KeyRepr::Number(n.to_bits()),
            Self::String(s) => KeyRepr::String(s.as_units()),
            Self::Ref(id) => KeyRepr::Object(heap.object_id(*id).get()),
        };
        KEY_HASHER.hash_one(&repr)
    }

    /// The abstract `ToBoolean` operation.
    #[must_use]
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => !(n.is_nan() || *n == 0.0),
            Self::String(s) => !s.is_empty(),
            Self::Ref(_) => true,
        }
    }

    /// The abstract `ToNumber` operation.
    ///
    /// None of the heap objects defined here have a numeric primitive value,
    /// so objects convert to `NaN`.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined | Self::Ref(_) => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(&s.to_utf8_lossy()),
        }
    }

    /// The abstract `ToIndex` operation.
    ///
    /// `undefined` maps to 0; anything whose integer part is negative or above
    /// 2^53 - 1 is a RangeError.
    pub fn to_index(&self) -> RunResult<usize> {
        if self.is_undefined() {
            return Ok(0);
        }
        let integer = to_integer_or_infinity(self.to_number());
        if !(0.0..=MAX_SAFE_INTEGER).contains(&integer) {
            return Err(ExcType::range_error(format!("Invalid index: {self}")));
        }
        usize::try_from(integer as u64).map_err(|_| ExcType::range_error(format!("Invalid index: {self}")))
    }
}

/// The abstract `ToIntegerOrInfinity` operation on an already converted number.
#[must_use]
pub fn to_integer_or_infinity(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else if n.is_infinite() {
        n
    } else {
        // trunc keeps -0 for small negatives; normalise it
        n.trunc() + 0.0
    }
}

/// Integer conversion modulo 2^`bits` shared by `ToInt8`..`ToUint32`.
///
/// Non-finite inputs map to 0. The result is in `0..2^bits`; signed callers
/// reinterpret it with an `as` cast.
#[must_use]
pub(crate) fn wrap_to_bits(n: f64, bits: i32) -> u64 {
    if !n.is_finite() {
        return 0;
    }
    let modulus = 2f64.powi(bits);
    let mut r = n.trunc() % modulus;
    if r < 0.0 {
        r += modulus;
    }
    r as u64
}

/// `StringToNumber`: whitespace-trimmed decimal, `0x`/`0o`/`0b` literals and `Infinity`.
fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c: char| c.is_whitespace() || c == '\u{FEFF}');
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = match trimmed.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &trimmed[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        return digits
            .chars()
            .try_fold(0.0f64, |acc, c| c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d)))
            .unwrap_or(f64::NAN);
    }
    let (sign, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    if unsigned.starts_with(['+', '-']) {
        return f64::NAN;
    }
    // Rust's parser also accepts "inf" and "nan", which scripts must not
    if !unsigned.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-')) {
        return f64::NAN;
    }
    unsigned.parse::<f64>().map_or(f64::NAN, |n| sign * n)
}

/// `Number::prototype.toString()` for finite non-zero numbers.
///
/// ryu supplies the shortest round-tripping digits; the layout (plain, leading
/// `0.`, or exponent) follows the script thresholds of 1e21 and 1e-7.
#[expect(clippy::cast_possible_wrap, reason = "digit counts are at most 17")]
fn number_to_string(n: f64) -> String {
    let mut buffer = ryu::Buffer::new();
    let formatted = buffer.format_finite(n.abs());
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (formatted, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    // value = 0.<digits> * 10^point
    let all: String = format!("{int_part}{frac_part}");
    let significant = all.trim_start_matches('0');
    let point = int_part.len() as i32 + exponent - (all.len() - significant.len()) as i32;
    let digits = significant.trim_end_matches('0');
    let k = digits.len() as i32;

    let mut out = String::with_capacity(24);
    if n < 0.0 {
        out.push('-');
    }
    if k <= point && point <= 21 {
        out.push_str(digits);
        out.extend(std::iter::repeat_n('0', (point - k) as usize));
    } else if 0 < point && point <= 21 {
        let (whole, fraction) = digits.split_at(point as usize);
        out.push_str(whole);
        out.push('.');
        out.push_str(fraction);
    } else if -6 < point && point <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-point) as usize));
        out.push_str(digits);
    } else {
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        let e = point - 1;
        out.push_str(if e < 0 { "e-" } else { "e+" });
        out.push_str(&e.unsigned_abs().to_string());
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.is_nan() => f.write_str("NaN"),
            Self::Number(n) if n.is_infinite() => f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" }),
            Self::Number(n) if *n == 0.0 => f.write_str("0"),
            Self::Number(n) => f.write_str(&number_to_string(*n)),
            Self::String(s) => write!(f, "{s}"),
            Self::Ref(id) => write!(f, "[object #{}]", id.index()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(JsString::from(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Self::String(s)
    }
}

impl From<HeapId> for Value {
    fn from(id: HeapId) -> Self {
        Self::Ref(id)
    }
}

//! Text-to-value parsers
//!
//! One parser per scalar slot type. Each reports a [`ParseResult`] alongside
//! the value so callers can tell a clean parse from garbage or overflow.

use crate::ir::TypeId;
use crate::tuple::TimestampValue;
use chrono::{NaiveDate, NaiveDateTime, Timelike};

/// Outcome of parsing one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ParseResult {
    Success = 0,
    Failure = 1,
    /// Value out of range for the type; the returned value is saturated
    Overflow = 2,
}

/// A fixed-width value that can be parsed from field text
pub trait ParseField: Copy + Sized {
    const PARSE_FN: ParseFn;

    fn parse_field(s: &[u8]) -> (Self, ParseResult);
}

/// Named parser entry points, referenced by IR call instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseFn {
    StringToBool,
    StringToInt8,
    StringToInt16,
    StringToInt32,
    StringToInt64,
    StringToFloat,
    StringToDouble,
}

impl ParseFn {
    pub fn symbol(&self) -> &'static str {
        match self {
            ParseFn::StringToBool => "IrStringToBool",
            ParseFn::StringToInt8 => "IrStringToInt8",
            ParseFn::StringToInt16 => "IrStringToInt16",
            ParseFn::StringToInt32 => "IrStringToInt32",
            ParseFn::StringToInt64 => "IrStringToInt64",
            ParseFn::StringToFloat => "IrStringToFloat",
            ParseFn::StringToDouble => "IrStringToDouble",
        }
    }

    /// IR type of the parsed value
    pub fn result_type(&self) -> TypeId {
        match self {
            ParseFn::StringToBool => TypeId::BOOL,
            ParseFn::StringToInt8 => TypeId::I8,
            ParseFn::StringToInt16 => TypeId::I16,
            ParseFn::StringToInt32 => TypeId::I32,
            ParseFn::StringToInt64 => TypeId::I64,
            ParseFn::StringToFloat => TypeId::F32,
            ParseFn::StringToDouble => TypeId::F64,
        }
    }
}

/// Strip leading and trailing ASCII whitespace
fn trim(s: &[u8]) -> &[u8] {
    let start = s
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(s.len());
    let end = s
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &s[start..end]
}

/// Parse a decimal integer into an i64 bounded by `[min, max]`
fn parse_int(s: &[u8], min: i64, max: i64) -> (i64, ParseResult) {
    let s = trim(s);
    let (negative, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return (0, ParseResult::Failure);
    }

    // Accumulate toward the sign so i64::MIN is representable.
    let mut val: i64 = 0;
    let mut overflow = false;
    for &c in digits {
        if !c.is_ascii_digit() {
            return (0, ParseResult::Failure);
        }
        if overflow {
            continue;
        }
        let digit = (c - b'0') as i64;
        let next = val.checked_mul(10).and_then(|v| {
            if negative {
                v.checked_sub(digit)
            } else {
                v.checked_add(digit)
            }
        });
        match next {
            Some(v) if v >= min && v <= max => val = v,
            _ => overflow = true,
        }
    }

    if overflow {
        (if negative { min } else { max }, ParseResult::Overflow)
    } else {
        (val, ParseResult::Success)
    }
}

macro_rules! impl_parse_int {
    ($ty:ty, $parse_fn:expr) => {
        impl ParseField for $ty {
            const PARSE_FN: ParseFn = $parse_fn;

            fn parse_field(s: &[u8]) -> (Self, ParseResult) {
                let (v, result) = parse_int(s, <$ty>::MIN as i64, <$ty>::MAX as i64);
                (v as $ty, result)
            }
        }
    };
}

impl_parse_int!(i8, ParseFn::StringToInt8);
impl_parse_int!(i16, ParseFn::StringToInt16);
impl_parse_int!(i32, ParseFn::StringToInt32);
impl_parse_int!(i64, ParseFn::StringToInt64);

impl ParseField for bool {
    const PARSE_FN: ParseFn = ParseFn::StringToBool;

    fn parse_field(s: &[u8]) -> (Self, ParseResult) {
        let s = trim(s);
        if s.eq_ignore_ascii_case(b"true") {
            (true, ParseResult::Success)
        } else if s.eq_ignore_ascii_case(b"false") {
            (false, ParseResult::Success)
        } else {
            (false, ParseResult::Failure)
        }
    }
}

macro_rules! impl_parse_float {
    ($ty:ty, $parse_fn:expr) => {
        impl ParseField for $ty {
            const PARSE_FN: ParseFn = $parse_fn;

            fn parse_field(s: &[u8]) -> (Self, ParseResult) {
                let parsed = std::str::from_utf8(trim(s))
                    .ok()
                    .and_then(|text| text.parse::<$ty>().ok());
                match parsed {
                    Some(v) => (v, ParseResult::Success),
                    None => (0.0, ParseResult::Failure),
                }
            }
        }
    };
}

impl_parse_float!(f32, ParseFn::StringToFloat);
impl_parse_float!(f64, ParseFn::StringToDouble);

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse `YYYY-MM-DD`, optionally followed by a time of day
pub fn parse_timestamp(s: &[u8]) -> Option<TimestampValue> {
    let text = std::str::from_utf8(trim(s)).ok()?;
    let datetime = TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let days = datetime.date().signed_duration_since(epoch).num_days();
    let time = datetime.time();
    let nanos = time.num_seconds_from_midnight() as i64 * 1_000_000_000 + time.nanosecond() as i64;

    Some(TimestampValue {
        time_of_day_ns: nanos,
        days_since_epoch: i32::try_from(days).ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int32() {
        assert_eq!(i32::parse_field(b"123"), (123, ParseResult::Success));
        assert_eq!(i32::parse_field(b"-42"), (-42, ParseResult::Success));
        assert_eq!(i32::parse_field(b"+7"), (7, ParseResult::Success));
        assert_eq!(i32::parse_field(b"  99 "), (99, ParseResult::Success));
        assert_eq!(i32::parse_field(b"12x").1, ParseResult::Failure);
        assert_eq!(i32::parse_field(b"-").1, ParseResult::Failure);
        assert_eq!(i32::parse_field(b"").1, ParseResult::Failure);
    }

    #[test]
    fn test_parse_int_overflow_saturates() {
        assert_eq!(i8::parse_field(b"127"), (127, ParseResult::Success));
        assert_eq!(i8::parse_field(b"128"), (127, ParseResult::Overflow));
        assert_eq!(i8::parse_field(b"-128"), (-128, ParseResult::Success));
        assert_eq!(i8::parse_field(b"-129"), (-128, ParseResult::Overflow));
        assert_eq!(
            i64::parse_field(b"-9223372036854775808"),
            (i64::MIN, ParseResult::Success)
        );
        assert_eq!(
            i64::parse_field(b"99999999999999999999"),
            (i64::MAX, ParseResult::Overflow)
        );
    }

    #[test]
    fn test_overflow_then_garbage_is_failure() {
        assert_eq!(i8::parse_field(b"1000x").1, ParseResult::Failure);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(bool::parse_field(b"true"), (true, ParseResult::Success));
        assert_eq!(bool::parse_field(b"FALSE"), (false, ParseResult::Success));
        assert_eq!(bool::parse_field(b"yes").1, ParseResult::Failure);
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(f64::parse_field(b"1.5"), (1.5, ParseResult::Success));
        assert_eq!(f64::parse_field(b"-2e3"), (-2000.0, ParseResult::Success));
        assert_eq!(f32::parse_field(b"0.25"), (0.25, ParseResult::Success));
        assert_eq!(f64::parse_field(b"1.2.3").1, ParseResult::Failure);
        assert!(f64::parse_field(b"inf").0.is_infinite());
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp(b"1970-01-02 00:00:01.5").unwrap();
        assert_eq!(ts.days_since_epoch, 1);
        assert_eq!(ts.time_of_day_ns, 1_500_000_000);

        let date_only = parse_timestamp(b"1969-12-31").unwrap();
        assert_eq!(date_only.days_since_epoch, -1);
        assert_eq!(date_only.time_of_day_ns, 0);

        assert!(parse_timestamp(b"not a date").is_none());
    }

    #[test]
    fn test_parse_fn_result_types() {
        assert_eq!(i32::PARSE_FN.result_type(), TypeId::I32);
        assert_eq!(bool::PARSE_FN.result_type(), TypeId::BOOL);
        assert_eq!(f64::PARSE_FN.symbol(), "IrStringToDouble");
    }
}

//! Numeric Value
//!
//! A dynamically-typed scalar that is either an integer, a double, or a
//! string known (once parsed) to denote one of those. Arithmetic promotes to
//! double whenever either operand is a double; otherwise the result stays
//! integer. Strings are parsed lazily: integer first, then double.

use thiserror::Error;

/// Errors raised by `NumericValue` arithmetic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("value is neither integer, double, nor string")]
    BadType,

    #[error("string {0:?} does not parse as a number")]
    BadNumber(String),

    #[error("division by a value with magnitude below 1e-20")]
    DivByZero,
}

const DIV_EPSILON: f64 = 1e-20;

/// A scalar value flowing through the script engine's expression evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericValue {
    Int(i64),
    Double(f64),
    Str(String),
}

impl NumericValue {
    pub fn int(v: i64) -> Self {
        NumericValue::Int(v)
    }

    pub fn double(v: f64) -> Self {
        NumericValue::Double(v)
    }

    /// Coerce to an (is_integer, value) pair, parsing strings lazily:
    /// integer first, double second. A null/missing value reads as integer 0.
    fn coerce(&self) -> Result<(bool, f64), NumericError> {
        match self {
            NumericValue::Int(i) => Ok((true, *i as f64)),
            NumericValue::Double(d) => Ok((false, *d)),
            NumericValue::Str(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Ok((true, i as f64))
                } else if let Ok(d) = s.parse::<f64>() {
                    Ok((false, d))
                } else {
                    Err(NumericError::BadNumber(s.clone()))
                }
            }
        }
    }

    fn binary(
        &self,
        other: &NumericValue,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<NumericValue, NumericError> {
        let (l_int, l) = self.coerce()?;
        let (r_int, r) = other.coerce()?;
        let result = op(l, r);
        if l_int && r_int {
            Ok(NumericValue::Int(result as i64))
        } else {
            Ok(NumericValue::Double(result))
        }
    }

    pub fn increment(&mut self, other: &NumericValue) -> Result<(), NumericError> {
        *self = self.binary(other, |a, b| a + b)?;
        Ok(())
    }

    pub fn decrement(&mut self, other: &NumericValue) -> Result<(), NumericError> {
        *self = self.binary(other, |a, b| a - b)?;
        Ok(())
    }

    pub fn multiply(&mut self, other: &NumericValue) -> Result<(), NumericError> {
        *self = self.binary(other, |a, b| a * b)?;
        Ok(())
    }

    pub fn divide(&mut self, other: &NumericValue) -> Result<(), NumericError> {
        let (_, r) = other.coerce()?;
        if r.abs() < DIV_EPSILON {
            return Err(NumericError::DivByZero);
        }
        *self = self.binary(other, |a, b| a / b)?;
        Ok(())
    }

    /// Raise `self` to the power of `other`. Always yields a double, per the
    /// design note on `^` in §9 — a no-promotion-table floating-point power.
    pub fn power(&mut self, other: &NumericValue) -> Result<(), NumericError> {
        let (_, l) = self.coerce()?;
        let (_, r) = other.coerce()?;
        *self = NumericValue::Double(l.powf(r));
        Ok(())
    }

    /// Sign of `self - other`, comparing as doubles after coercion.
    pub fn compare(&self, other: &NumericValue) -> Result<std::cmp::Ordering, NumericError> {
        let (_, l) = self.coerce()?;
        let (_, r) = other.coerce()?;
        Ok(l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn to_f64(&self) -> Result<f64, NumericError> {
        Ok(self.coerce()?.1)
    }

    /// String form used when writing through the response context.
    pub fn to_output_string(&self) -> String {
        match self {
            NumericValue::Int(i) => i.to_string(),
            NumericValue::Double(d) => format_double(*d),
            NumericValue::Str(s) => s.clone(),
        }
    }
}

impl Default for NumericValue {
    /// A null value reads as integer zero.
    fn default() -> Self {
        NumericValue::Int(0)
    }
}

/// Render a double the way the interpreter's output does: no trailing `.0`
/// padding beyond what's needed, but never in scientific notation.
fn format_double(d: f64) -> String {
    if d == d.trunc() && d.abs() < 1e15 {
        format!("{:.1}", d)
    } else {
        let s = format!("{}", d);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_addition_stays_integer() {
        let mut a = NumericValue::int(3);
        a.increment(&NumericValue::int(4)).unwrap();
        assert_eq!(a, NumericValue::Int(7));
    }

    #[test]
    fn double_promotion_wins() {
        let mut a = NumericValue::int(3);
        a.increment(&NumericValue::double(4.5)).unwrap();
        assert_eq!(a, NumericValue::Double(7.5));
    }

    #[test]
    fn integer_division_truncates() {
        let mut a = NumericValue::int(3);
        a.divide(&NumericValue::int(2)).unwrap();
        assert_eq!(a, NumericValue::Int(1));
    }

    #[test]
    fn double_division_keeps_fraction() {
        let mut a = NumericValue::double(3.0);
        a.divide(&NumericValue::int(2)).unwrap();
        assert_eq!(a, NumericValue::Double(1.5));
    }

    #[test]
    fn divide_by_near_zero_fails() {
        let mut a = NumericValue::int(1);
        let err = a.divide(&NumericValue::double(1e-21)).unwrap_err();
        assert_eq!(err, NumericError::DivByZero);
    }

    #[test]
    fn bad_string_fails() {
        let mut a = NumericValue::int(1);
        let err = a.increment(&NumericValue::Str("abc".into())).unwrap_err();
        assert!(matches!(err, NumericError::BadNumber(_)));
    }

    #[test]
    fn compare_sign_matches_subtraction() {
        let a = NumericValue::int(5);
        let b = NumericValue::int(3);
        assert_eq!(a.compare(&b).unwrap(), std::cmp::Ordering::Greater);
        assert_eq!(b.compare(&a).unwrap(), std::cmp::Ordering::Less);
        assert_eq!(a.compare(&a).unwrap(), std::cmp::Ordering::Equal);
    }

    #[test]
    fn null_default_reads_as_zero() {
        let mut n = NumericValue::default();
        n.increment(&NumericValue::int(5)).unwrap();
        assert_eq!(n, NumericValue::Int(5));
    }

    #[test]
    fn string_parses_integer_before_double() {
        let v = NumericValue::Str("42".into());
        assert_eq!(v.coerce().unwrap(), (true, 42.0));
    }
}

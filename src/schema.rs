// 📐 Shape Layer - input validation
// Field-level checks shared by every entity, plus lenient decoding of
// request/CSV values where blank counters mean zero.

use serde::{Deserialize, Deserializer};

/// Upper bound for point counters and averages
pub const MAX_POINTS: f64 = 999.99;

/// Upper bound for integer counters
pub const MAX_COUNT: i64 = 32767;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    pub fn new(field: &str, message: &str, context: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.to_string(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

// ============================================================================
// FIELD CHECKS
// ============================================================================

/// Collects every failing check for one record instead of stopping at the first.
pub struct FieldChecks {
    context: &'static str,
    errors: Vec<ValidationError>,
}

impl FieldChecks {
    pub fn new(context: &'static str) -> Self {
        FieldChecks {
            context,
            errors: Vec::new(),
        }
    }

    pub fn fail(&mut self, field: &str, message: &str) -> &mut Self {
        self.errors
            .push(ValidationError::new(field, message, self.context));
        self
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.fail(field, "Required field is empty");
        }
        self
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        if value.chars().count() > max {
            self.fail(field, &format!("Must be {} characters or less", max));
        }
        self
    }

    pub fn max_len_opt(&mut self, field: &str, value: Option<&str>, max: usize) -> &mut Self {
        if let Some(v) = value {
            self.max_len(field, v, max);
        }
        self
    }

    /// 0 to 999.99
    pub fn points(&mut self, field: &str, value: f64) -> &mut Self {
        if !value.is_finite() || value < 0.0 || value > MAX_POINTS {
            self.fail(
                field,
                &format!("Must be between 0 and {}, got {}", MAX_POINTS, value),
            );
        }
        self
    }

    pub fn points_opt(&mut self, field: &str, value: Option<f64>) -> &mut Self {
        if let Some(v) = value {
            self.points(field, v);
        }
        self
    }

    /// 0 to 32767
    pub fn count(&mut self, field: &str, value: i64) -> &mut Self {
        if !(0..=MAX_COUNT).contains(&value) {
            self.fail(
                field,
                &format!("Must be between 0 and {}, got {}", MAX_COUNT, value),
            );
        }
        self
    }

    pub fn count_opt(&mut self, field: &str, value: Option<i64>) -> &mut Self {
        if let Some(v) = value {
            self.count(field, v);
        }
        self
    }

    pub fn finish(&mut self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }
}

// ============================================================================
// LENIENT DECODING
// ============================================================================

/// Any scalar a form, JSON body or CSV cell might carry.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Loose {
    fn to_f64<E: serde::de::Error>(self) -> Result<Option<f64>, E> {
        match self {
            Loose::Int(i) => Ok(Some(i as f64)),
            Loose::Float(f) => Ok(Some(f)),
            Loose::Bool(b) => Ok(Some(if b { 1.0 } else { 0.0 })),
            Loose::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Ok(None)
                } else {
                    s.parse::<f64>()
                        .map(Some)
                        .map_err(|_| E::custom(format!("not a number: {:?}", s)))
                }
            }
        }
    }

    fn to_i64<E: serde::de::Error>(self) -> Result<Option<i64>, E> {
        match self {
            Loose::Int(i) => Ok(Some(i)),
            Loose::Float(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
            Loose::Float(f) => Err(E::custom(format!("not a whole number: {}", f))),
            Loose::Bool(b) => Ok(Some(b as i64)),
            Loose::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Ok(None)
                } else {
                    s.parse::<i64>()
                        .map(Some)
                        .map_err(|_| E::custom(format!("not a whole number: {:?}", s)))
                }
            }
        }
    }

    fn to_flag<E: serde::de::Error>(self) -> Result<bool, E> {
        match self {
            Loose::Bool(b) => Ok(b),
            Loose::Int(i) => Ok(i != 0),
            Loose::Float(f) => Ok(f != 0.0),
            Loose::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "n" | "no" | "false" => Ok(false),
                "1" | "y" | "yes" | "true" => Ok(true),
                other => Err(E::custom(format!("not a yes/no value: {:?}", other))),
            },
        }
    }
}

/// Blank, null or absent counters decode as zero.
pub fn zero_if_blank_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Option::<Loose>::deserialize(d)? {
        Some(v) => Ok(v.to_f64()?.unwrap_or(0.0)),
        None => Ok(0.0),
    }
}

pub fn zero_if_blank_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Option::<Loose>::deserialize(d)? {
        Some(v) => Ok(v.to_i64()?.unwrap_or(0)),
        None => Ok(0),
    }
}

pub fn none_if_blank_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Option::<Loose>::deserialize(d)? {
        Some(v) => v.to_f64(),
        None => Ok(None),
    }
}

pub fn none_if_blank_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    match Option::<Loose>::deserialize(d)? {
        Some(v) => v.to_i64(),
        None => Ok(None),
    }
}

pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Option::<Loose>::deserialize(d)? {
        Some(v) => v.to_flag(),
        None => Ok(false),
    }
}

/// Trimmed text; blank becomes None.
pub fn none_if_blank_str<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

pub fn trimmed<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.map(|s| s.trim().to_string()).unwrap_or_default())
}

/// Non-blank after trimming.
pub fn is_present(value: Option<&str>) -> bool {
    value.map_or(false, |v| !v.trim().is_empty())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Counters {
        #[serde(default, deserialize_with = "zero_if_blank_f64")]
        points: f64,
        #[serde(default, deserialize_with = "zero_if_blank_i64")]
        legs: i64,
        #[serde(default, deserialize_with = "none_if_blank_f64")]
        average: Option<f64>,
        #[serde(default, deserialize_with = "flag")]
        shown: bool,
        #[serde(default, deserialize_with = "none_if_blank_str")]
        note: Option<String>,
    }

    #[test]
    fn test_blank_and_absent_counters_are_zero() {
        let c: Counters = serde_json::from_str(r#"{"points": "", "legs": null}"#).unwrap();
        assert_eq!(c.points, 0.0);
        assert_eq!(c.legs, 0);
        assert_eq!(c.average, None);
        assert!(!c.shown);
        assert_eq!(c.note, None);
    }

    #[test]
    fn test_numeric_strings_and_numbers() {
        let c: Counters = serde_json::from_str(
            r#"{"points": "12.5", "legs": 3, "average": 7, "shown": "yes", "note": "  fast  "}"#,
        )
        .unwrap();
        assert_eq!(c.points, 12.5);
        assert_eq!(c.legs, 3);
        assert_eq!(c.average, Some(7.0));
        assert!(c.shown);
        assert_eq!(c.note.as_deref(), Some("fast"));
    }

    #[test]
    fn test_garbage_number_is_rejected() {
        let result: Result<Counters, _> = serde_json::from_str(r#"{"legs": "three"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_field_checks_collect_all_errors() {
        let result = FieldChecks::new("Dog")
            .required("cwa_number", "  ")
            .max_len("registered_name", &"x".repeat(101), 100)
            .points("meet_points", 1000.0)
            .count("dpc_legs", -1)
            .points("arx_points", 999.99)
            .count("meet_wins", 32767)
            .finish();

        let errors = result.unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["cwa_number", "registered_name", "meet_points", "dpc_legs"]
        );
        assert!(errors.iter().all(|e| e.context == "Dog"));
    }

    #[test]
    fn test_is_present() {
        assert!(is_present(Some("AKC123")));
        assert!(!is_present(Some("   ")));
        assert!(!is_present(None));
    }
}

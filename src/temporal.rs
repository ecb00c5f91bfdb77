// ⏰ Age Model - explicit evaluation dates
//
// Every age-dependent rule is evaluated against a date the caller supplies.
// Nothing here reads the clock.
//
// Age in months ignores the day of month:
//   (as_of.year - birth.year) * 12 + (as_of.month - birth.month)

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Under this many months a dog races as a puppy (grade FTE)
pub const PUPPY_AGE_MONTHS: i32 = 8;

/// From this many months a dog counts as an adult
pub const ADULT_AGE_MONTHS: i32 = 14;

/// From this many months a dog counts as a veteran
pub const VETERAN_AGE_MONTHS: i32 = 84;

// ============================================================================
// AGE CLASS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeClass {
    Puppy,
    Adult,
    Veteran,
    /// No birthdate, or the 8-13 month band
    Unknown,
}

impl AgeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeClass::Puppy => "puppy",
            AgeClass::Adult => "adult",
            AgeClass::Veteran => "veteran",
            AgeClass::Unknown => "unknown",
        }
    }
}

// ============================================================================
// AGE ARITHMETIC
// ============================================================================

/// Whole months from the birth month to the evaluation month.
pub fn age_in_months(birthdate: NaiveDate, as_of: NaiveDate) -> i32 {
    (as_of.year() - birthdate.year()) * 12 + (as_of.month() as i32 - birthdate.month() as i32)
}

/// Age view of a dog at one evaluation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Age {
    months: Option<i32>,
}

impl Age {
    pub fn at(birthdate: Option<NaiveDate>, as_of: NaiveDate) -> Self {
        Age {
            months: birthdate.map(|b| age_in_months(b, as_of)),
        }
    }

    pub fn months(&self) -> Option<i32> {
        self.months
    }

    pub fn is_puppy(&self) -> bool {
        self.months.map_or(false, |m| m < PUPPY_AGE_MONTHS)
    }

    /// Veterans are adults too.
    pub fn is_adult(&self) -> bool {
        self.months.map_or(false, |m| m >= ADULT_AGE_MONTHS)
    }

    pub fn is_veteran(&self) -> bool {
        self.months.map_or(false, |m| m >= VETERAN_AGE_MONTHS)
    }

    pub fn class(&self) -> AgeClass {
        if self.is_veteran() {
            AgeClass::Veteran
        } else if self.is_adult() {
            AgeClass::Adult
        } else if self.is_puppy() {
            AgeClass::Puppy
        } else {
            AgeClass::Unknown
        }
    }
}

/// Evaluation date for an operation stamped at `at`.
pub fn evaluation_date(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_age_ignores_day_of_month() {
        let as_of = date(2025, 6, 15);

        assert_eq!(age_in_months(date(2024, 6, 1), as_of), 12);
        assert_eq!(age_in_months(date(2024, 6, 30), as_of), 12);
        assert_eq!(age_in_months(date(2025, 5, 31), date(2025, 6, 1)), 1);
    }

    #[test]
    fn test_puppy_boundary() {
        let as_of = date(2025, 9, 10);

        // 7 months
        assert!(Age::at(Some(date(2025, 2, 28)), as_of).is_puppy());
        // 8 months
        assert!(!Age::at(Some(date(2025, 1, 1)), as_of).is_puppy());
    }

    #[test]
    fn test_adult_and_veteran_boundaries() {
        let as_of = date(2025, 3, 1);

        let thirteen = Age::at(Some(date(2024, 2, 1)), as_of);
        let fourteen = Age::at(Some(date(2024, 1, 31)), as_of);
        assert!(!thirteen.is_adult());
        assert!(fourteen.is_adult());

        let veteran = Age::at(Some(date(2018, 3, 1)), as_of);
        assert_eq!(veteran.months(), Some(84));
        assert!(veteran.is_veteran());
        assert!(veteran.is_adult());
        assert_eq!(veteran.class(), AgeClass::Veteran);
    }

    #[test]
    fn test_middle_band_is_unknown() {
        let as_of = date(2025, 12, 1);
        let ten_months = Age::at(Some(date(2025, 2, 1)), as_of);

        assert!(!ten_months.is_puppy());
        assert!(!ten_months.is_adult());
        assert_eq!(ten_months.class(), AgeClass::Unknown);
    }

    #[test]
    fn test_missing_birthdate() {
        let age = Age::at(None, date(2025, 1, 1));

        assert_eq!(age.months(), None);
        assert!(!age.is_puppy());
        assert!(!age.is_adult());
        assert_eq!(age.class(), AgeClass::Unknown);
    }
}

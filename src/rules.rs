// 🏷️ Eligibility Rules - grade and title ruleset
// Fixed, hard-coded rules mapping a dog's accumulated statistics and age
// to a racing grade and the set of titles it currently qualifies for.
//
// Pure: no storage access, no clock. The evaluation date is supplied.

use crate::entities::dog::{Dog, DogStatus};
use crate::temporal::{Age, AgeClass};
use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// THRESHOLDS
// ============================================================================

pub const ARX_POINTS: f64 = 15.0;
pub const TRP_APPEARANCES: i64 = 10;
pub const PR_BASE_POINTS: f64 = 50.0;
pub const PR_TIER_STEP: f64 = 100.0;
pub const DPC_LEGS: i64 = 5;
pub const HC_WINS: i64 = 5;
pub const HCX_WINS: i64 = 10;

/// NARX/SRA ladder, highest first. First threshold reached wins.
const NARX_LADDER: [(f64, Title); 8] = [
    (300.0, Title::Sra(4)),
    (225.0, Title::Sra(3)),
    (150.0, Title::Sra(2)),
    (75.0, Title::Sra(1)),
    (60.0, Title::Narx(4)),
    (45.0, Title::Narx(3)),
    (30.0, Title::Narx(2)),
    (15.0, Title::Narx(1)),
];

/// Average thresholds for A/B/C (Active); Inactive dogs drop one letter.
const GRADE_LADDER: [(f64, Grade, Grade); 3] = [
    (15.0, Grade::A, Grade::B),
    (10.0, Grade::B, Grade::C),
    (5.0, Grade::C, Grade::D),
];

// ============================================================================
// GRADE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grade {
    /// First time entry: puppies and dogs without a meet appearance
    Fte,
    D,
    C,
    B,
    A,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Fte => "FTE",
            Grade::D => "D",
            Grade::C => "C",
            Grade::B => "B",
            Grade::A => "A",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "FTE" => Ok(Grade::Fte),
            "D" => Ok(Grade::D),
            "C" => Ok(Grade::C),
            "B" => Ok(Grade::B),
            "A" => Ok(Grade::A),
            other => Err(format!(
                "Grade must be one of 'FTE', 'D', 'C', 'B', or 'A', got {:?}",
                other
            )),
        }
    }
}

impl Default for Grade {
    fn default() -> Self {
        Grade::Fte
    }
}

impl Serialize for Grade {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Grade {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for Grade {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Grade {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================================================
// TITLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Title {
    /// Award of Racing Excellence
    Arx,
    /// Title of Racing Proficiency
    Trp,
    /// Performance title; tier 1 renders as `PR`
    Pr(u32),
    /// National award of racing excellence, tiers 1..=4
    Narx(u8),
    /// Superior racing award, tiers 1..=4
    Sra(u8),
    Dpc,
    Dpcx,
    Hc,
    Hcx,
}

fn tiered(prefix: &str, tier: u32) -> String {
    if tier <= 1 {
        prefix.to_string()
    } else {
        format!("{}{}", prefix, tier)
    }
}

impl Title {
    /// Catalog code, as stored in `dog_titles.title`.
    pub fn code(&self) -> String {
        match self {
            Title::Arx => "ARX".to_string(),
            Title::Trp => "TRP".to_string(),
            Title::Pr(tier) => tiered("PR", *tier),
            Title::Narx(tier) => tiered("NARX", *tier as u32),
            Title::Sra(tier) => tiered("SRA", *tier as u32),
            Title::Dpc => "DPC".to_string(),
            Title::Dpcx => "DPCX".to_string(),
            Title::Hc => "HC".to_string(),
            Title::Hcx => "HCX".to_string(),
        }
    }

    /// Human description used when the catalog row has to be created.
    pub fn description(&self) -> String {
        match self {
            Title::Arx => "Award of Racing Excellence".to_string(),
            Title::Trp => "Title of Racing Proficiency".to_string(),
            Title::Pr(tier) => tiered("Performance Racing ", *tier).trim_end().to_string(),
            Title::Narx(tier) => tiered("National Award of Racing Excellence ", *tier as u32)
                .trim_end()
                .to_string(),
            Title::Sra(tier) => tiered("Superior Racing Award ", *tier as u32)
                .trim_end()
                .to_string(),
            Title::Dpc => "Dual Purpose Championship".to_string(),
            Title::Dpcx => "Dual Purpose Championship Excellent".to_string(),
            Title::Hc => "High Combined".to_string(),
            Title::Hcx => "High Combined Excellent".to_string(),
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

fn parse_tier(rest: &str) -> Option<u32> {
    if rest.is_empty() {
        Some(1)
    } else if rest.chars().all(|c| c.is_ascii_digit()) {
        rest.parse().ok().filter(|t| *t >= 2)
    } else {
        None
    }
}

impl FromStr for Title {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let parsed = match code {
            "ARX" => Some(Title::Arx),
            "TRP" => Some(Title::Trp),
            "DPC" => Some(Title::Dpc),
            "DPCX" => Some(Title::Dpcx),
            "HC" => Some(Title::Hc),
            "HCX" => Some(Title::Hcx),
            _ => {
                if let Some(rest) = code.strip_prefix("NARX") {
                    parse_tier(rest).filter(|t| *t <= 4).map(|t| Title::Narx(t as u8))
                } else if let Some(rest) = code.strip_prefix("SRA") {
                    parse_tier(rest).filter(|t| *t <= 4).map(|t| Title::Sra(t as u8))
                } else if let Some(rest) = code.strip_prefix("PR") {
                    parse_tier(rest).map(Title::Pr)
                } else {
                    None
                }
            }
        };

        parsed.ok_or_else(|| format!("not a ruleset title code: {:?}", code))
    }
}

impl Serialize for Title {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.code())
    }
}

// ============================================================================
// ELIGIBILITY
// ============================================================================

/// Result of evaluating one dog: what its grade and titles should be.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub cwa_number: String,
    pub as_of: NaiveDate,
    pub age_class: AgeClass,
    pub grade: Grade,
    pub titles: Vec<Title>,
}

impl Eligibility {
    pub fn title_codes(&self) -> Vec<String> {
        self.titles.iter().map(Title::code).collect()
    }
}

// ============================================================================
// ELIGIBILITY EVALUATOR
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct EligibilityEvaluator {
    as_of: NaiveDate,
}

impl EligibilityEvaluator {
    /// Evaluate against the month containing `as_of`.
    pub fn new(as_of: NaiveDate) -> Self {
        EligibilityEvaluator { as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn age(&self, dog: &Dog) -> Age {
        Age::at(dog.birthdate, self.as_of)
    }

    /// Grade rule, first match wins.
    pub fn grade(&self, dog: &Dog) -> Grade {
        if self.age(dog).is_puppy() || dog.meet_appearances == 0 {
            return Grade::Fte;
        }

        let active = dog.status == DogStatus::Active;
        for (threshold, when_active, when_inactive) in GRADE_LADDER {
            if dog.average >= threshold {
                return if active { when_active } else { when_inactive };
            }
        }

        Grade::D
    }

    pub fn arx_title(&self, dog: &Dog) -> Option<Title> {
        (dog.arx_points >= ARX_POINTS).then_some(Title::Arx)
    }

    pub fn trp_title(&self, dog: &Dog) -> Option<Title> {
        (dog.meet_appearances >= TRP_APPEARANCES).then_some(Title::Trp)
    }

    /// PR below 150 points, then one tier per further 100 points.
    pub fn pr_title(&self, dog: &Dog) -> Option<Title> {
        if dog.meet_points < PR_BASE_POINTS {
            return None;
        }
        let tier = ((dog.meet_points - PR_BASE_POINTS) / PR_TIER_STEP).floor() as u32 + 1;
        Some(Title::Pr(tier))
    }

    pub fn narx_title(&self, dog: &Dog) -> Option<Title> {
        NARX_LADDER
            .iter()
            .find(|(threshold, _)| dog.narx_points >= *threshold)
            .map(|(_, title)| *title)
    }

    /// Needs TRP plus either an outside-registry number or enough DPC legs.
    pub fn dpc_title(&self, dog: &Dog) -> Option<Title> {
        if self.trp_title(dog).is_none() {
            return None;
        }
        if !(dog.has_alternate_registry() || dog.dpc_legs >= DPC_LEGS) {
            return None;
        }
        if self.arx_title(dog).is_some() {
            Some(Title::Dpcx)
        } else {
            Some(Title::Dpc)
        }
    }

    pub fn hc_title(&self, dog: &Dog) -> Option<Title> {
        if !self.age(dog).is_adult() {
            return None;
        }
        if dog.high_combined_wins >= HCX_WINS {
            Some(Title::Hcx)
        } else if dog.high_combined_wins >= HC_WINS {
            Some(Title::Hc)
        } else {
            None
        }
    }

    /// All qualifying titles, in ARX, TRP, PR, NARX, DPC, HC order.
    pub fn check_titles(&self, dog: &Dog) -> Vec<Title> {
        [
            self.arx_title(dog),
            self.trp_title(dog),
            self.pr_title(dog),
            self.narx_title(dog),
            self.dpc_title(dog),
            self.hc_title(dog),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn evaluate(&self, dog: &Dog) -> Eligibility {
        Eligibility {
            cwa_number: dog.cwa_number.clone(),
            as_of: self.as_of,
            age_class: self.age(dog).class(),
            grade: self.grade(dog),
            titles: self.check_titles(dog),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

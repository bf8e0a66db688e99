use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Rural/urban classification of a locality. A catalog-wide axis, not
/// scoped to town, substation or feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum LocalityClass {
    Rural,
    Urban,
}

impl LocalityClass {
    /// Label as it appears in the reference table and in the encoder's categories.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalityClass::Rural => "Rural",
            LocalityClass::Urban => "Urban",
        }
    }
}

impl FromStr for LocalityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rural" => Ok(LocalityClass::Rural),
            "urban" => Ok(LocalityClass::Urban),
            _ => Err(format!("unknown locality class `{}`", s.trim())),
        }
    }
}

impl TryFrom<String> for LocalityClass {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<LocalityClass> for &'static str {
    fn from(c: LocalityClass) -> Self {
        c.as_str()
    }
}

impl fmt::Display for LocalityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four form fields, in form order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Town,
    Substation,
    Feeder,
    LocalityClass,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Town, Field::Substation, Field::Feeder, Field::LocalityClass];

    /// Column header in the reference table and in the fitted transformer.
    pub fn column(&self) -> &'static str {
        match self {
            Field::Town => "Town Name",
            Field::Substation => "Substation",
            Field::Feeder => "Feeder Name",
            Field::LocalityClass => "Rural/Urban",
        }
    }

    /// Position in [`Field::ALL`] and in [`FeatureRow::values`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The field that must be set before this one can be.
    pub fn prerequisite(&self) -> Option<Field> {
        match self {
            Field::Substation => Some(Field::Town),
            Field::Feeder => Some(Field::Substation),
            Field::Town | Field::LocalityClass => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Town => "town",
            Field::Substation => "substation",
            Field::Feeder => "feeder",
            Field::LocalityClass => "locality_class",
        })
    }
}

/// One row of the reference table. A `None` cell is a missing value in the
/// source and never shows up as a choice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalityRecord {
    pub town: Option<String>,
    pub substation: Option<String>,
    pub feeder: Option<String>,
    pub locality_class: Option<LocalityClass>,
}

impl LocalityRecord {
    pub fn new(town: &str, substation: &str, feeder: &str, locality_class: LocalityClass) -> Self {
        Self {
            town: Some(town.to_string()),
            substation: Some(substation.to_string()),
            feeder: Some(feeder.to_string()),
            locality_class: Some(locality_class),
        }
    }
}

/// Where a selection sits in the town -> substation -> feeder chain.
/// `Complete` additionally requires the locality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Empty,
    TownChosen,
    SubstationChosen,
    FeederChosen,
    Complete,
}

/// The user's in-progress input. `None` is the "not yet chosen" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub substation: Option<String>,
    #[serde(default)]
    pub feeder: Option<String>,
    #[serde(default)]
    pub locality_class: Option<LocalityClass>,
}

impl Selection {
    pub fn value(&self, field: Field) -> Option<&str> {
        match field {
            Field::Town => self.town.as_deref(),
            Field::Substation => self.substation.as_deref(),
            Field::Feeder => self.feeder.as_deref(),
            Field::LocalityClass => self.locality_class.as_ref().map(LocalityClass::as_str),
        }
    }

    pub fn missing_fields(&self) -> Vec<Field> {
        Field::ALL.into_iter().filter(|f| self.value(*f).is_none()).collect()
    }

    pub fn is_complete(&self) -> bool {
        Field::ALL.iter().all(|f| self.value(*f).is_some())
    }

    pub fn stage(&self) -> Stage {
        if self.is_complete() {
            return Stage::Complete;
        }
        match (&self.town, &self.substation, &self.feeder) {
            (Some(_), Some(_), Some(_)) => Stage::FeederChosen,
            (Some(_), Some(_), None) => Stage::SubstationChosen,
            (Some(_), None, _) => Stage::TownChosen,
            (None, _, _) => Stage::Empty,
        }
    }

    /// Single-row record for the feature transformer, or
    /// `IncompleteSelection` naming every unset field.
    pub fn feature_row(&self) -> Result<FeatureRow<'_>> {
        match (
            self.town.as_deref(),
            self.substation.as_deref(),
            self.feeder.as_deref(),
            self.locality_class,
        ) {
            (Some(town), Some(substation), Some(feeder), Some(class)) => Ok(FeatureRow {
                town,
                substation,
                feeder,
                locality_class: class.as_str(),
            }),
            _ => Err(Error::IncompleteSelection { missing: self.missing_fields() }),
        }
    }
}

/// A complete selection laid out in the transformer's column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRow<'a> {
    pub town: &'a str,
    pub substation: &'a str,
    pub feeder: &'a str,
    pub locality_class: &'a str,
}

impl<'a> FeatureRow<'a> {
    pub fn values(&self) -> [&'a str; 4] {
        [self.town, self.substation, self.feeder, self.locality_class]
    }
}

/// Estimated daily duration of steady supply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult {
    pub raw_seconds: f64,
    pub clamped_seconds: u64,
    pub hours: u64,
    pub minutes: u32,
}

impl PredictionResult {
    /// Clamps negative output to zero and floors into hours and minutes;
    /// leftover seconds are dropped.
    pub fn from_raw_seconds(raw_seconds: f64) -> Self {
        // `as` saturates, and NaN.max(0.0) is 0.0
        let clamped_seconds = raw_seconds.max(0.0).floor() as u64;
        Self {
            raw_seconds,
            clamped_seconds,
            hours: clamped_seconds / 3600,
            minutes: ((clamped_seconds % 3600) / 60) as u32,
        }
    }

    pub fn message(&self) -> String {
        format!(
            "We expect a steady electricity supply for {} hours {} minutes per day, in your locality.",
            self.hours, self.minutes
        )
    }
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hours {} minutes", self.hours, self.minutes)
    }
}

// ---------- Wire types ----------

#[derive(Debug, Default, Deserialize)]
pub struct OptionsQuery {
    pub town: Option<String>,
    pub substation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsOut {
    pub towns: Vec<String>,
    pub substations: Vec<String>,
    pub feeders: Vec<String>,
    pub locality_classes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetFieldRequest {
    pub field: Field,
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionOut {
    pub id: u64,
    pub selection: Selection,
    pub stage: Stage,
    pub complete: bool,
    pub options: OptionsOut,
}

/// How a prediction attempt ended, as the form's output region styles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Warning,
    Error,
    Unavailable,
}

/// Outcome shown in the form's output region.
#[derive(Debug, Serialize)]
pub struct PredictionOut {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionResult>,
}

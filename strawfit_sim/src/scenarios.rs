//! Validation scenarios for the track fit.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// FIT-001: straight tracks in a zero field
    StraightLine,

    /// FIT-002: conversion electrons in the nominal solenoid
    Conversion,

    /// FIT-003: conversion electrons with corrupted hit times
    Outliers,

    /// FIT-004: t0 taken from the calorimeter cluster
    CaloSeed,

    /// FIT-005: hits withheld from the seed and added after the fit
    AddHits,

    /// FIT-006: definitions below the minimum hit count
    TooFewHits,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::StraightLine,
            ScenarioId::Conversion,
            ScenarioId::Outliers,
            ScenarioId::CaloSeed,
            ScenarioId::AddHits,
            ScenarioId::TooFewHits,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::StraightLine => "straight_line",
            ScenarioId::Conversion => "conversion",
            ScenarioId::Outliers => "outliers",
            ScenarioId::CaloSeed => "calo_seed",
            ScenarioId::AddHits => "add_hits",
            ScenarioId::TooFewHits => "too_few_hits",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::StraightLine => "Zero field, straight tracks, verify fit quality",
            ScenarioId::Conversion => "105 MeV/c electrons in 1 T, verify momentum resolution",
            ScenarioId::Outliers => "10% of hits delayed by 15-40 ns, verify weeding purity",
            ScenarioId::CaloSeed => "t0 from the calorimeter cluster, verify t0 resolution",
            ScenarioId::AddHits => "Every 4th hit withheld, then added back to the fit",
            ScenarioId::TooFewHits => "Definitions below min_straws must fail cleanly",
        }
    }

    /// Whether the scenario runs in a zero field.
    pub fn zero_field(&self) -> bool {
        matches!(self, ScenarioId::StraightLine)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "straight_line" | "straightline" | "fit-001" => Ok(ScenarioId::StraightLine),
            "conversion" | "fit-002" => Ok(ScenarioId::Conversion),
            "outliers" | "fit-003" => Ok(ScenarioId::Outliers),
            "calo_seed" | "caloseed" | "fit-004" => Ok(ScenarioId::CaloSeed),
            "add_hits" | "addhits" | "fit-005" => Ok(ScenarioId::AddHits),
            "too_few_hits" | "toofewhits" | "fit-006" => Ok(ScenarioId::TooFewHits),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

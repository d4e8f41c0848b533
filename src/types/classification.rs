//! Transcript classification types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Responder department, also the allow-list of facility datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Department {
    Police,
    FireBrigade,
    Hospital,
}

impl Department {
    pub const ALL: [Department; 3] = [Department::Police, Department::FireBrigade, Department::Hospital];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Police => "police",
            Department::FireBrigade => "firebrigade",
            Department::Hospital => "hospital",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned for any category outside the allow-list
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown department '{0}'")]
pub struct UnknownDepartment(pub String);

impl FromStr for Department {
    type Err = UnknownDepartment;

    /// Exact match only; no trimming or case folding of classifier output
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Department::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownDepartment(s.to_string()))
    }
}

/// Structured facts extracted from a transcript
///
/// `depts` holds the raw strings the classifier produced. They are only
/// turned into [`Department`] values at lookup time so that the published
/// analysis reflects what the classifier said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub depts: Vec<String>,
    #[serde(default = "unknown_person", deserialize_with = "null_as_unknown_person")]
    pub person_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

fn unknown_person() -> String {
    "Unknown".to_string()
}

// Models emit `null` for facts they could not find; treat it like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_unknown_person<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(unknown_person))
}

impl ClassificationResult {
    /// Departments in classifier order with duplicates removed
    pub fn unique_depts(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.depts.len());
        for dept in &self.depts {
            if !seen.contains(&dept.as_str()) {
                seen.push(dept.as_str());
            }
        }
        seen
    }
}

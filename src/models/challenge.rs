use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CATALOG_JSON: &str = include_str!("challenges.json");

static CATALOG: OnceLock<Result<Vec<Challenge>, String>> = OnceLock::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub title: String,
    pub description: String,
    pub signature: String,
    pub starter_code: String,
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Vec<TestInput>,
    pub expected: serde_json::Value,
}

/// One positional argument of a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestInput {
    /// Script expression evaluated in the candidate's realm (function inputs).
    Script {
        #[serde(rename = "$script")]
        script: String,
    },
    Json(serde_json::Value),
}

impl fmt::Display for TestInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestInput::Script { script } => write!(f, "{}", script),
            TestInput::Json(value) => write!(f, "{}", value),
        }
    }
}

impl TestCase {
    /// Inputs as one list, e.g. `[[1,2,3],2]`.
    pub fn render_input(&self) -> String {
        let parts: Vec<String> = self.input.iter().map(|i| i.to_string()).collect();
        format!("[{}]", parts.join(","))
    }
}

impl Challenge {
    /// File name used for the candidate source, e.g. `binary_search.ts`.
    pub fn file_name(&self) -> String {
        let slug = self
            .title
            .to_lowercase()
            .replace(' ', "_")
            .replace(|c: char| !c.is_alphanumeric() && c != '_', "");
        format!("{}.ts", slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("challenge {index} does not exist (there are {count})")]
    OutOfRange { index: usize, count: usize },
    #[error("challenge catalog is invalid: {0}")]
    Catalog(String),
}

pub fn catalog() -> Result<&'static [Challenge], RegistryError> {
    let parsed = CATALOG.get_or_init(|| serde_json::from_str(CATALOG_JSON).map_err(|e| e.to_string()));
    match parsed {
        Ok(challenges) => Ok(challenges),
        Err(e) => Err(RegistryError::Catalog(e.clone())),
    }
}

pub fn count() -> usize {
    catalog().map(|c| c.len()).unwrap_or(0)
}

pub fn get(index: usize) -> Result<&'static Challenge, RegistryError> {
    let challenges = catalog()?;
    challenges.get(index).ok_or(RegistryError::OutOfRange {
        index,
        count: challenges.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_parses() {
        let challenges = catalog().unwrap();
        assert_eq!(challenges.len(), 3);
        assert_eq!(challenges[0].title, "ARRAY DEDUPLICATION");
        assert_eq!(challenges[1].tests.len(), 6);
        assert!(challenges.iter().all(|c| !c.tests.is_empty()));
    }

    #[test]
    fn test_get_out_of_range() {
        assert!(get(0).is_ok());
        assert_eq!(get(3).unwrap_err(), RegistryError::OutOfRange { index: 3, count: 3 });
    }

    #[test]
    fn test_script_inputs_are_distinguished() {
        let race = get(2).unwrap();
        assert!(matches!(race.tests[0].input[0], TestInput::Script { .. }));
        assert_eq!(race.tests[0].input[1], TestInput::Json(serde_json::json!(200)));
    }

    #[test]
    fn test_render_input_and_file_name() {
        let search = get(1).unwrap();
        assert_eq!(search.tests[0].render_input(), "[[1,3,5,7,9],5]");
        assert_eq!(search.file_name(), "binary_search.ts");
    }
}

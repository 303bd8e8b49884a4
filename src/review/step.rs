//! The five structural review steps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structural analysis applied to every node of a plan, once per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStep {
    Contracts,
    Interfaces,
    Promises,
    DataModels,
    #[serde(rename = "apis")]
    Apis,
}

impl ReviewStep {
    pub const COUNT: usize = 5;

    /// Execution order within a phase.
    pub const ALL: [ReviewStep; Self::COUNT] = [
        ReviewStep::Contracts,
        ReviewStep::Interfaces,
        ReviewStep::Promises,
        ReviewStep::DataModels,
        ReviewStep::Apis,
    ];

    pub fn all() -> &'static [ReviewStep] {
        &Self::ALL
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<ReviewStep> {
        Self::ALL.get(index).copied()
    }

    /// What the analyzer is asked to look for in this step.
    pub fn focus(self) -> &'static str {
        match self {
            ReviewStep::Contracts => {
                "Pre- and post-conditions, invariants and the responsibilities each requirement commits to"
            }
            ReviewStep::Interfaces => {
                "Interface elements (types, methods, parameters) the requirement needs and whether they are declared"
            }
            ReviewStep::Promises => {
                "Behavioural guarantees: idempotency, ordering, retries, timeouts and consistency"
            }
            ReviewStep::DataModels => {
                "Entities, relationships, schemas and backward compatibility of stored data"
            }
            ReviewStep::Apis => {
                "Endpoints, status codes, error handling and versioning of externally visible APIs"
            }
        }
    }
}

impl fmt::Display for ReviewStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewStep::Contracts => "Contracts",
            ReviewStep::Interfaces => "Interfaces",
            ReviewStep::Promises => "Promises",
            ReviewStep::DataModels => "DataModels",
            ReviewStep::Apis => "APIs",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ReviewStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "contracts" | "contract" => Ok(ReviewStep::Contracts),
            "interfaces" | "interface" => Ok(ReviewStep::Interfaces),
            "promises" | "promise" => Ok(ReviewStep::Promises),
            "datamodels" | "datamodel" => Ok(ReviewStep::DataModels),
            "apis" | "api" => Ok(ReviewStep::Apis),
            _ => anyhow::bail!(
                "Invalid step '{}'. Valid values: contracts, interfaces, promises, data-models, apis",
                s
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        let names: Vec<String> = ReviewStep::all().iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec!["Contracts", "Interfaces", "Promises", "DataModels", "APIs"]
        );
        for (i, step) in ReviewStep::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(ReviewStep::from_index(i), Some(*step));
        }
        assert_eq!(ReviewStep::from_index(5), None);
    }

    #[test]
    fn test_step_from_str() {
        assert_eq!("APIs".parse::<ReviewStep>().unwrap(), ReviewStep::Apis);
        assert_eq!(
            "data-models".parse::<ReviewStep>().unwrap(),
            ReviewStep::DataModels
        );
        assert_eq!(
            "DataModels".parse::<ReviewStep>().unwrap(),
            ReviewStep::DataModels
        );
        assert!("security".parse::<ReviewStep>().is_err());
    }

    #[test]
    fn test_step_serde() {
        assert_eq!(serde_json::to_string(&ReviewStep::Apis).unwrap(), "\"apis\"");
        assert_eq!(
            serde_json::to_string(&ReviewStep::DataModels).unwrap(),
            "\"data_models\""
        );
    }
}

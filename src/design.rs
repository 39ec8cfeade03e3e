//! Experimental designs
//!
//! A [`DesignSpecification`] is an immutable value describing which subjects are
//! compared and how. Each variant carries exactly the data its design needs, so a
//! regression without a covariate cannot be expressed.

use crate::error::DesignError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Subject label without the `sub-` prefix
pub type SubjectId = String;

/// Entity filters (task, session, run, space, ...) selecting one artifact per subject
pub type Entities = BTreeMap<String, String>;

/// Design tag, used in cache keys and provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignKind {
    Independent,
    Paired,
    Regression,
}

impl fmt::Display for DesignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DesignKind::Independent => "independent",
            DesignKind::Paired => "paired",
            DesignKind::Regression => "regression",
        };
        f.write_str(name)
    }
}

/// A named list of subjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub subjects: Vec<SubjectId>,
}

impl Group {
    pub fn new(name: impl Into<String>, subjects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
        }
    }
}

/// The comparison to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "design", rename_all = "lowercase")]
pub enum DesignSpecification {
    /// Two independent groups, Welch's t-test
    Independent { group1: Group, group2: Group },

    /// Two conditions measured on paired subjects, paired t-test
    ///
    /// Pairs are formed by position: `subjects_a[k]` under `condition_a` is paired
    /// with `subjects_b[k]` under `condition_b`.
    Paired {
        subjects_a: Vec<SubjectId>,
        subjects_b: Vec<SubjectId>,
        condition_a: Entities,
        condition_b: Entities,
    },

    /// Per-connection OLS on a covariate, adjusted for confounds
    Regression {
        subjects: Vec<SubjectId>,
        covariate: String,
        confounds: Vec<String>,
    },
}

impl DesignSpecification {
    pub fn independent(group1: Group, group2: Group) -> Self {
        Self::Independent { group1, group2 }
    }

    /// Paired design over the same subjects in two conditions
    pub fn paired(
        subjects: impl IntoIterator<Item = impl Into<String>>,
        condition_a: Entities,
        condition_b: Entities,
    ) -> Self {
        let subjects: Vec<SubjectId> = subjects.into_iter().map(Into::into).collect();
        Self::Paired {
            subjects_a: subjects.clone(),
            subjects_b: subjects,
            condition_a,
            condition_b,
        }
    }

    pub fn regression(
        subjects: impl IntoIterator<Item = impl Into<String>>,
        covariate: impl Into<String>,
        confounds: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Regression {
            subjects: subjects.into_iter().map(Into::into).collect(),
            covariate: covariate.into(),
            confounds: confounds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> DesignKind {
        match self {
            Self::Independent { .. } => DesignKind::Independent,
            Self::Paired { .. } => DesignKind::Paired,
            Self::Regression { .. } => DesignKind::Regression,
        }
    }

    /// Check the design before any data is collected
    pub fn validate(&self) -> Result<(), DesignError> {
        match self {
            Self::Independent { group1, group2 } => {
                for group in [group1, group2] {
                    if group.subjects.len() < 2 {
                        return Err(DesignError::GroupTooSmall {
                            group: group.name.clone(),
                            size: group.subjects.len(),
                        });
                    }
                    check_unique(&group.subjects, &group.name)?;
                }
                let first: HashSet<&SubjectId> = group1.subjects.iter().collect();
                if let Some(shared) = group2.subjects.iter().find(|s| first.contains(s)) {
                    return Err(DesignError::DuplicateSubject {
                        subject: shared.clone(),
                        list: format!("both '{}' and '{}'", group1.name, group2.name),
                    });
                }
            }
            Self::Paired {
                subjects_a,
                subjects_b,
                ..
            } => {
                if subjects_a.len() != subjects_b.len() {
                    return Err(DesignError::PairedCountMismatch {
                        condition_a: subjects_a.len(),
                        condition_b: subjects_b.len(),
                    });
                }
                if subjects_a.len() < 2 {
                    return Err(DesignError::TooFewPairs(subjects_a.len()));
                }
                check_unique(subjects_a, "condition a")?;
                check_unique(subjects_b, "condition b")?;
            }
            Self::Regression {
                subjects,
                covariate,
                confounds,
            } => {
                if covariate.is_empty() {
                    return Err(DesignError::MissingColumn(covariate.clone()));
                }
                if let Some(empty) = confounds.iter().find(|c| c.is_empty()) {
                    return Err(DesignError::MissingColumn(empty.clone()));
                }
                check_unique(subjects, "regression subjects")?;
                let parameters = confounds.len() + 2;
                if subjects.len() <= parameters {
                    return Err(DesignError::InsufficientDegreesOfFreedom {
                        subjects: subjects.len(),
                        parameters,
                    });
                }
            }
        }
        Ok(())
    }

    /// Entity keys whose values differ between the two paired conditions
    ///
    /// These "pair-making" entities are dropped from the cache key and from
    /// provenance, since the comparison spans both values. Empty for other designs.
    pub fn pair_making_entities(&self) -> Vec<String> {
        match self {
            Self::Paired {
                condition_a,
                condition_b,
                ..
            } => {
                let mut keys: Vec<String> = condition_a
                    .keys()
                    .chain(condition_b.keys())
                    .filter(|k| condition_a.get(*k) != condition_b.get(*k))
                    .cloned()
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            }
            _ => Vec::new(),
        }
    }
}

fn check_unique(subjects: &[SubjectId], list: &str) -> Result<(), DesignError> {
    let mut seen = HashSet::new();
    for subject in subjects {
        if !seen.insert(subject) {
            return Err(DesignError::DuplicateSubject {
                subject: subject.clone(),
                list: list.to_string(),
            });
        }
    }
    Ok(())
}

/// Where the comparison's data lives and how its results are labelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonContext {
    /// Analysis label, e.g. "patientsVersusControls"
    pub label: String,
    /// Connectivity descriptor, e.g. "correlation"
    pub descriptor: String,
    /// Entity filters shared by every artifact lookup
    pub entities: Entities,
}

impl ComparisonContext {
    pub fn new(label: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            descriptor: descriptor.into(),
            entities: Entities::new(),
        }
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }

    /// Same context for another connectivity descriptor
    pub fn for_descriptor(&self, descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            ..self.clone()
        }
    }

    /// Shared entities overridden by condition-specific ones
    pub fn merged_entities(&self, condition: &Entities) -> Entities {
        let mut merged = self.entities.clone();
        merged.extend(condition.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities(pairs: &[(&str, &str)]) -> Entities {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_independent_group_too_small() {
        let spec = DesignSpecification::independent(
            Group::new("patients", ["01"]),
            Group::new("controls", ["02", "03"]),
        );
        assert_eq!(
            spec.validate(),
            Err(DesignError::GroupTooSmall {
                group: "patients".to_string(),
                size: 1
            })
        );
    }

    #[test]
    fn test_independent_overlapping_groups() {
        let spec = DesignSpecification::independent(
            Group::new("a", ["01", "02"]),
            Group::new("b", ["02", "03"]),
        );
        assert!(matches!(
            spec.validate(),
            Err(DesignError::DuplicateSubject { ref subject, .. }) if subject == "02"
        ));
    }

    #[test]
    fn test_paired_count_mismatch() {
        let spec = DesignSpecification::Paired {
            subjects_a: vec!["01".into(), "02".into(), "03".into()],
            subjects_b: vec!["01".into(), "02".into(), "03".into(), "04".into()],
            condition_a: entities(&[("task", "rest")]),
            condition_b: entities(&[("task", "motor")]),
        };
        assert_eq!(
            spec.validate(),
            Err(DesignError::PairedCountMismatch {
                condition_a: 3,
                condition_b: 4
            })
        );
    }

    #[test]
    fn test_regression_degrees_of_freedom() {
        let spec = DesignSpecification::regression(["01", "02", "03"], "age", ["sex"]);
        assert!(matches!(
            spec.validate(),
            Err(DesignError::InsufficientDegreesOfFreedom {
                subjects: 3,
                parameters: 3
            })
        ));

        let spec = DesignSpecification::regression(["01", "02", "03", "04"], "age", ["sex"]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_pair_making_entities() {
        let spec = DesignSpecification::paired(
            ["01", "02"],
            entities(&[("task", "rest"), ("session", "1")]),
            entities(&[("task", "rest"), ("session", "2")]),
        );
        assert_eq!(spec.pair_making_entities(), vec!["session".to_string()]);
        assert_eq!(spec.kind(), DesignKind::Paired);
    }

    #[test]
    fn test_design_kind_display() {
        assert_eq!(DesignKind::Regression.to_string(), "regression");
    }

    #[test]
    fn test_merged_entities_condition_wins() {
        let ctx = ComparisonContext::new("x", "correlation")
            .with_entity("task", "rest")
            .with_entity("space", "MNI");
        let merged = ctx.merged_entities(&entities(&[("task", "motor")]));
        assert_eq!(merged["task"], "motor");
        assert_eq!(merged["space"], "MNI");
    }
}

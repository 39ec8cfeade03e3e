// Sample collection through injected providers
//
// The collector never resolves paths or dataset layout. It asks a StorageProvider
// for one matrix per (subject, entities, descriptor) and, for regression, a
// ParticipantTableProvider for the aligned design matrix.

mod memory;
mod participants;

pub use memory::InMemoryStorage;
pub use participants::{GroupGuess, TsvParticipantTable};

use crate::design::{
    ComparisonContext, DesignKind, DesignSpecification, Entities, Group, SubjectId,
};
use crate::error::{
    ArtifactError, CollectionError, DesignError, InferenceError, Result, TableError,
};
use crate::matrix::ConnectivityMatrix;
use nalgebra::DMatrix;

/// Source of per-subject connectivity matrices
pub trait StorageProvider {
    fn get_artifact(
        &self,
        subject: &str,
        entities: &Entities,
        descriptor: &str,
    ) -> std::result::Result<ConnectivityMatrix, ArtifactError>;
}

/// Source of covariate and confound values (regression only)
pub trait ParticipantTableProvider {
    /// Rows in `subjects` order, columns `[covariate, confounds...]`
    fn get_table(
        &self,
        subjects: &[SubjectId],
        covariate: &str,
        confounds: &[String],
    ) -> std::result::Result<DesignMatrix, TableError>;
}

/// Subject × regressor table, without the intercept
///
/// Column 0 is the covariate of interest; the remaining columns are confounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    subjects: Vec<SubjectId>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl DesignMatrix {
    pub fn new(
        subjects: Vec<SubjectId>,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> std::result::Result<Self, TableError> {
        if columns.is_empty() {
            return Err(TableError::MissingColumn("<covariate>".to_string()));
        }
        if rows.len() != subjects.len() {
            return Err(TableError::Read(format!(
                "{} rows for {} subjects",
                rows.len(),
                subjects.len()
            )));
        }
        for (subject, row) in subjects.iter().zip(&rows) {
            if row.len() != columns.len() {
                return Err(TableError::Read(format!(
                    "subject '{}' has {} values, expected {}",
                    subject,
                    row.len(),
                    columns.len()
                )));
            }
            if let Some((column, value)) = columns.iter().zip(row).find(|(_, v)| !v.is_finite()) {
                return Err(TableError::InvalidValue {
                    subject: subject.clone(),
                    column: column.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(Self {
            subjects,
            columns,
            rows,
        })
    }

    pub fn subjects(&self) -> &[SubjectId] {
        &self.subjects
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn covariate(&self) -> &str {
        &self.columns[0]
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Regressors ready for OLS: mean-centered columns followed by an intercept
    ///
    /// The covariate stays in column 0.
    pub fn regressors(&self) -> DMatrix<f64> {
        let n = self.rows.len();
        let p = self.columns.len();
        let mut x = DMatrix::from_element(n, p + 1, 1.0);
        for c in 0..p {
            let mean = self.rows.iter().map(|r| r[c]).sum::<f64>() / n as f64;
            for (r, row) in self.rows.iter().enumerate() {
                x[(r, c)] = row[c] - mean;
            }
        }
        x
    }
}

/// One group of an independent comparison
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSample {
    pub name: String,
    pub subjects: Vec<SubjectId>,
    pub matrices: Vec<ConnectivityMatrix>,
}

/// Matched condition matrices for a paired comparison
#[derive(Debug, Clone, PartialEq)]
pub struct PairedSample {
    pairs: Vec<(SubjectId, SubjectId)>,
    condition_a: Vec<ConnectivityMatrix>,
    condition_b: Vec<ConnectivityMatrix>,
}

impl PairedSample {
    pub fn new(
        pairs: Vec<(SubjectId, SubjectId)>,
        condition_a: Vec<ConnectivityMatrix>,
        condition_b: Vec<ConnectivityMatrix>,
    ) -> std::result::Result<Self, DesignError> {
        if condition_a.len() != condition_b.len() {
            return Err(DesignError::PairedCountMismatch {
                condition_a: condition_a.len(),
                condition_b: condition_b.len(),
            });
        }
        if condition_a.len() < 2 {
            return Err(DesignError::TooFewPairs(condition_a.len()));
        }
        Ok(Self {
            pairs,
            condition_a,
            condition_b,
        })
    }

    pub fn pairs(&self) -> &[(SubjectId, SubjectId)] {
        &self.pairs
    }

    pub fn condition_a(&self) -> &[ConnectivityMatrix] {
        &self.condition_a
    }

    pub fn condition_b(&self) -> &[ConnectivityMatrix] {
        &self.condition_b
    }
}

/// Matrices aligned with a design matrix
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionSample {
    matrices: Vec<ConnectivityMatrix>,
    design: DesignMatrix,
}

impl RegressionSample {
    pub fn new(
        matrices: Vec<ConnectivityMatrix>,
        design: DesignMatrix,
    ) -> std::result::Result<Self, DesignError> {
        if design.n_rows() != matrices.len() {
            return Err(DesignError::DesignRowMismatch {
                rows: design.n_rows(),
                subjects: matrices.len(),
            });
        }
        let parameters = design.columns().len() + 1;
        if matrices.len() <= parameters {
            return Err(DesignError::InsufficientDegreesOfFreedom {
                subjects: matrices.len(),
                parameters,
            });
        }
        Ok(Self { matrices, design })
    }

    pub fn matrices(&self) -> &[ConnectivityMatrix] {
        &self.matrices
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }
}

/// Concrete numeric data for one comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Independent {
        group1: GroupSample,
        group2: GroupSample,
    },
    Paired(PairedSample),
    Regression(RegressionSample),
}

impl Sample {
    /// Independent sample with the group-size precondition checked
    pub fn independent(
        group1: GroupSample,
        group2: GroupSample,
    ) -> std::result::Result<Self, DesignError> {
        for group in [&group1, &group2] {
            if group.matrices.len() < 2 {
                return Err(DesignError::GroupTooSmall {
                    group: group.name.clone(),
                    size: group.matrices.len(),
                });
            }
        }
        Ok(Self::Independent { group1, group2 })
    }

    pub fn kind(&self) -> DesignKind {
        match self {
            Sample::Independent { .. } => DesignKind::Independent,
            Sample::Paired(_) => DesignKind::Paired,
            Sample::Regression(_) => DesignKind::Regression,
        }
    }

    /// Node count shared by every matrix
    pub fn n_nodes(&self) -> usize {
        let first = match self {
            Sample::Independent { group1, .. } => group1.matrices.first(),
            Sample::Paired(p) => p.condition_a.first(),
            Sample::Regression(r) => r.matrices.first(),
        };
        first.map_or(0, ConnectivityMatrix::n)
    }
}

/// Resolves a design specification into a [`Sample`]
pub struct SampleCollector<'a> {
    storage: &'a dyn StorageProvider,
    participants: Option<&'a dyn ParticipantTableProvider>,
}

impl<'a> SampleCollector<'a> {
    pub fn new(storage: &'a dyn StorageProvider) -> Self {
        Self {
            storage,
            participants: None,
        }
    }

    pub fn with_participants(mut self, participants: &'a dyn ParticipantTableProvider) -> Self {
        self.participants = Some(participants);
        self
    }

    /// Collect exactly the requested subjects' data, or fail
    pub fn collect(&self, spec: &DesignSpecification, ctx: &ComparisonContext) -> Result<Sample> {
        spec.validate()?;
        let mut nodes = NodeCount::default();

        let sample = match spec {
            DesignSpecification::Independent { group1, group2 } => {
                let group1 = self.fetch_group(group1, ctx, &mut nodes)?;
                let group2 = self.fetch_group(group2, ctx, &mut nodes)?;
                Sample::independent(group1, group2)?
            }
            DesignSpecification::Paired {
                subjects_a,
                subjects_b,
                condition_a,
                condition_b,
            } => {
                let entities_a = ctx.merged_entities(condition_a);
                let entities_b = ctx.merged_entities(condition_b);
                let a = self.fetch_all(subjects_a, &entities_a, ctx, &mut nodes)?;
                let b = self.fetch_all(subjects_b, &entities_b, ctx, &mut nodes)?;
                let pairs = subjects_a
                    .iter()
                    .cloned()
                    .zip(subjects_b.iter().cloned())
                    .collect();
                Sample::Paired(PairedSample::new(pairs, a, b)?)
            }
            DesignSpecification::Regression {
                subjects,
                covariate,
                confounds,
            } => {
                let participants = self.participants.ok_or_else(|| {
                    CollectionError::Table(TableError::Read(
                        "no participant table provider configured".to_string(),
                    ))
                })?;
                let design = participants
                    .get_table(subjects, covariate, confounds)
                    .map_err(|e| match e {
                        TableError::MissingColumn(column) => {
                            InferenceError::Design(DesignError::MissingColumn(column))
                        }
                        other => InferenceError::Collection(CollectionError::Table(other)),
                    })?;
                check_table_order(subjects, design.subjects())?;
                let matrices = self.fetch_all(subjects, &ctx.entities, ctx, &mut nodes)?;
                Sample::Regression(RegressionSample::new(matrices, design)?)
            }
        };

        tracing::debug!(
            "Collected {} sample with {} nodes for {}",
            sample.kind(),
            sample.n_nodes(),
            ctx.descriptor
        );
        Ok(sample)
    }

    fn fetch_group(
        &self,
        group: &Group,
        ctx: &ComparisonContext,
        nodes: &mut NodeCount,
    ) -> std::result::Result<GroupSample, CollectionError> {
        let matrices = self.fetch_all(&group.subjects, &ctx.entities, ctx, nodes)?;
        tracing::info!(
            "Group '{}' contains {} participants: {:?}",
            group.name,
            matrices.len(),
            group.subjects
        );
        Ok(GroupSample {
            name: group.name.clone(),
            subjects: group.subjects.clone(),
            matrices,
        })
    }

    fn fetch_all(
        &self,
        subjects: &[SubjectId],
        entities: &Entities,
        ctx: &ComparisonContext,
        nodes: &mut NodeCount,
    ) -> std::result::Result<Vec<ConnectivityMatrix>, CollectionError> {
        subjects
            .iter()
            .map(|subject| {
                let matrix = self
                    .storage
                    .get_artifact(subject, entities, &ctx.descriptor)
                    .map_err(|source| CollectionError::Artifact {
                        subject: subject.clone(),
                        descriptor: ctx.descriptor.clone(),
                        source,
                    })?;
                nodes.check(subject, matrix.n())?;
                Ok(matrix)
            })
            .collect()
    }
}

/// Design rows must follow the requested subject order
fn check_table_order(
    requested: &[SubjectId],
    table: &[SubjectId],
) -> std::result::Result<(), CollectionError> {
    match requested
        .iter()
        .zip(table)
        .enumerate()
        .find(|(_, (expected, found))| expected != found)
    {
        Some((position, (expected, found))) => Err(CollectionError::TableOrder {
            position,
            expected: expected.clone(),
            found: found.clone(),
        }),
        None => Ok(()),
    }
}

/// Node count fixed by the first collected matrix
#[derive(Default)]
struct NodeCount(Option<usize>);

impl NodeCount {
    fn check(&mut self, subject: &str, n: usize) -> std::result::Result<(), CollectionError> {
        match self.0 {
            None => {
                self.0 = Some(n);
                Ok(())
            }
            Some(expected) if expected == n => Ok(()),
            Some(expected) => Err(CollectionError::NodeCountMismatch {
                subject: subject.to_string(),
                expected,
                found: n,
            }),
        }
    }
}

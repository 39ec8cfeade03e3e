//! `participants.tsv` reader
//!
//! A tab-separated table with a header row and a `participant_id` column holding
//! `sub-`-prefixed labels. Subject ids elsewhere in the crate carry no prefix.

use super::{DesignMatrix, ParticipantTableProvider};
use crate::design::{Group, SubjectId};
use crate::diagnostics::Diagnostic;
use crate::error::TableError;
use std::io::Read;
use std::path::Path;

const PARTICIPANT_ID: &str = "participant_id";
const GROUP_COLUMN: &str = "group";
const SUBJECT_PREFIX: &str = "sub-";

/// Result of guessing groups from the `group` column
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGuess {
    /// Groups in order of first appearance in the table
    pub groups: Vec<Group>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Participant table loaded from a BIDS `participants.tsv`
#[derive(Debug, Clone)]
pub struct TsvParticipantTable {
    columns: Vec<String>,
    records: Vec<Vec<String>>,
}

impl TsvParticipantTable {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let file = std::fs::File::open(path.as_ref()).map_err(|e| {
            TableError::Read(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(false)
            .from_reader(reader);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| TableError::Read(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if !columns.iter().any(|c| c == PARTICIPANT_ID) {
            return Err(TableError::MissingColumn(PARTICIPANT_ID.to_string()));
        }

        let records = reader
            .records()
            .map(|record| {
                record
                    .map(|r| r.iter().map(|v| v.trim().to_string()).collect())
                    .map_err(|e| TableError::Read(e.to_string()))
            })
            .collect::<Result<Vec<Vec<String>>, _>>()?;

        Ok(Self { columns, records })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    fn subject_of(&self, record: &[String]) -> Option<SubjectId> {
        let id_column = self.columns.iter().position(|c| c == PARTICIPANT_ID)?;
        let id = record.get(id_column)?;
        Some(id.strip_prefix(SUBJECT_PREFIX).unwrap_or(id).to_string())
    }

    fn record_for(&self, subject: &str) -> Option<&Vec<String>> {
        self.records
            .iter()
            .find(|r| self.subject_of(r).as_deref() == Some(subject))
    }

    /// Group subjects by the `group` column
    ///
    /// When `available` is given, only those subjects are kept (e.g. subjects
    /// with participant-level outputs).
    pub fn guess_groups(&self, available: Option<&[SubjectId]>) -> GroupGuess {
        let Ok(group_column) = self.column_index(GROUP_COLUMN) else {
            let diagnostic = Diagnostic::NoGroupColumn;
            diagnostic.emit();
            return GroupGuess {
                groups: Vec::new(),
                diagnostics: vec![diagnostic],
            };
        };

        let mut groups: Vec<Group> = Vec::new();
        for record in &self.records {
            let (Some(subject), Some(label)) = (self.subject_of(record), record.get(group_column))
            else {
                continue;
            };
            if available.is_some_and(|a| !a.contains(&subject)) {
                continue;
            }
            match groups.iter_mut().find(|g| &g.name == label) {
                Some(group) => group.subjects.push(subject),
                None => groups.push(Group {
                    name: label.clone(),
                    subjects: vec![subject],
                }),
            }
        }

        let mut diagnostics = Vec::new();
        if groups.len() != 2 {
            let diagnostic = Diagnostic::UnexpectedGroupCount {
                found: groups.len(),
            };
            diagnostic.emit();
            diagnostics.push(diagnostic);
        }
        GroupGuess {
            groups,
            diagnostics,
        }
    }
}

impl ParticipantTableProvider for TsvParticipantTable {
    fn get_table(
        &self,
        subjects: &[SubjectId],
        covariate: &str,
        confounds: &[String],
    ) -> Result<DesignMatrix, TableError> {
        let names: Vec<String> = std::iter::once(covariate.to_string())
            .chain(confounds.iter().cloned())
            .collect();
        let indices = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<usize>, _>>()?;

        let mut rows = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let record = self
                .record_for(subject)
                .ok_or_else(|| TableError::MissingSubject(subject.clone()))?;
            let row = names
                .iter()
                .zip(&indices)
                .map(|(name, &i)| {
                    let raw = record.get(i).map(String::as_str).unwrap_or("");
                    raw.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| TableError::InvalidValue {
                            subject: subject.clone(),
                            column: name.clone(),
                            value: raw.to_string(),
                        })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            rows.push(row);
        }

        DesignMatrix::new(subjects.to_vec(), names, rows)
    }
}

//! In-memory storage provider
//!
//! Artifacts are registered with the full entity set they were produced under; a
//! lookup matches every artifact whose entities contain the requested filters,
//! mirroring how a dataset layout query behaves.

use super::StorageProvider;
use crate::design::Entities;
use crate::error::ArtifactError;
use crate::matrix::ConnectivityMatrix;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredArtifact {
    entities: Entities,
    matrix: ConnectivityMatrix,
}

/// Storage provider backed by a map of (subject, descriptor) to artifacts
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    artifacts: HashMap<(String, String), Vec<StoredArtifact>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact for a subject
    pub fn insert(
        &mut self,
        subject: impl Into<String>,
        entities: Entities,
        descriptor: impl Into<String>,
        matrix: ConnectivityMatrix,
    ) {
        self.artifacts
            .entry((subject.into(), descriptor.into()))
            .or_default()
            .push(StoredArtifact { entities, matrix });
    }

    /// Total number of registered artifacts
    pub fn len(&self) -> usize {
        self.artifacts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn describe(subject: &str, entities: &Entities, descriptor: &str) -> String {
    let mut name = format!("sub-{}", subject);
    for (key, value) in entities {
        name.push_str(&format!("_{}-{}", key, value));
    }
    name.push_str(&format!("_desc-{}", descriptor));
    name
}

impl StorageProvider for InMemoryStorage {
    fn get_artifact(
        &self,
        subject: &str,
        entities: &Entities,
        descriptor: &str,
    ) -> Result<ConnectivityMatrix, ArtifactError> {
        let candidates = self
            .artifacts
            .get(&(subject.to_string(), descriptor.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let matches: Vec<&StoredArtifact> = candidates
            .iter()
            .filter(|a| {
                entities
                    .iter()
                    .all(|(k, v)| a.entities.get(k).is_some_and(|found| found == v))
            })
            .collect();

        match matches.as_slice() {
            [] => Err(ArtifactError::NotFound),
            [single] => Ok(single.matrix.clone()),
            many => Err(ArtifactError::Ambiguous(
                many.iter()
                    .map(|a| describe(subject, &a.entities, descriptor))
                    .collect(),
            )),
        }
    }
}

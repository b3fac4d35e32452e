//! Matrix expansion
//!
//! Turns a stage's axes into one [`MatrixCell`] per combination. Cells are
//! enumerated in lexicographic product order of axis declaration order (the
//! last axis varies fastest). The order is only used for logs; jobs of a
//! stage run in parallel.

use keel_core::domain::job::MatrixCell;
use keel_core::domain::pipeline::StageDefinition;
use std::collections::HashSet;

use crate::error::GraphError;

/// Expands a stage into its matrix cells
///
/// A stage without axes yields exactly one empty cell.
pub fn expand(stage: &StageDefinition) -> Result<Vec<MatrixCell>, GraphError> {
    let mut seen = HashSet::new();
    for axis in &stage.matrix {
        if axis.values.is_empty() {
            return Err(GraphError::EmptyAxis {
                stage: stage.name.clone(),
                axis: axis.name.clone(),
            });
        }
        if !seen.insert(axis.name.as_str()) {
            return Err(GraphError::DuplicateAxis {
                stage: stage.name.clone(),
                axis: axis.name.clone(),
            });
        }
    }

    let mut cells: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for axis in &stage.matrix {
        cells = cells
            .into_iter()
            .flat_map(|prefix| {
                axis.values.iter().map(move |value| {
                    let mut coords = prefix.clone();
                    coords.push((axis.name.clone(), value.clone()));
                    coords
                })
            })
            .collect();
    }

    Ok(cells.into_iter().map(MatrixCell).collect())
}

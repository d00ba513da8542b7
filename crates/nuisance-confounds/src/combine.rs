// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Merging of several tissue-probability maps into one.

use crate::error::{Component, ConfoundError, ConfoundResult};
use ndarray::{Array3, Zip};
use nuisance_config::CombineMethod;
use nuisance_structures::ProbabilityMap;
use tracing::debug;

/// Combine `maps[i]` for every `i` in `indices` (order preserved).
///
/// `Sum` adds the maps and clips to [0, 1]; `Maximum` takes the element-wise
/// maximum. A single index returns that map unchanged. The result is named
/// after the selected maps joined with `+`.
pub fn combine(
    maps: &[ProbabilityMap],
    indices: &[usize],
    method: CombineMethod,
) -> ConfoundResult<ProbabilityMap> {
    if indices.is_empty() {
        return Err(ConfoundError::invalid(
            Component::MapCombiner,
            "indices",
            "at least one map must be selected",
        ));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i >= maps.len()) {
        return Err(ConfoundError::invalid(
            Component::MapCombiner,
            "indices",
            format!("index {} out of range for {} maps", bad, maps.len()),
        ));
    }

    let selected: Vec<&ProbabilityMap> = indices.iter().map(|&i| &maps[i]).collect();
    let first = selected[0];
    for other in &selected[1..] {
        if !first.same_grid(other) {
            return Err(ConfoundError::ShapeMismatch {
                component: Component::MapCombiner,
                input: other.name().to_string(),
                reason: format!(
                    "'{}' has shape {:?}, '{}' has shape {:?} (or the affines differ)",
                    first.name(),
                    first.shape(),
                    other.name(),
                    other.shape()
                ),
            });
        }
    }
    if selected.len() == 1 {
        return Ok(first.clone());
    }

    let mut merged: Array3<f64> = first.probabilities().clone();
    for map in &selected[1..] {
        let zip = Zip::from(&mut merged).and(map.probabilities());
        match method {
            CombineMethod::Sum => zip.for_each(|acc, &p| *acc += p),
            CombineMethod::Maximum => zip.for_each(|acc, &p| *acc = acc.max(p)),
        }
    }
    let name = selected
        .iter()
        .map(|m| m.name())
        .collect::<Vec<_>>()
        .join("+");
    debug!(target: "nuisance-confounds", "[COMBINE] {} via {:?}", name, method);

    // from_probabilities clips the sum to [0, 1]
    Ok(ProbabilityMap::from_probabilities(name, merged, *first.affine()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nuisance_structures::Affine;

    fn map(name: &str, values: [f64; 4]) -> ProbabilityMap {
        let probabilities = Array3::from_shape_vec((2, 2, 1), values.to_vec()).unwrap();
        ProbabilityMap::from_probabilities(name, probabilities, Affine::identity())
    }

    #[test]
    fn test_sum_clips_to_one() {
        let maps = vec![map("wm", [0.7, 0.2, 0.0, 1.0]), map("csf", [0.6, 0.3, 0.0, 0.5])];
        let combined = combine(&maps, &[0, 1], CombineMethod::Sum).unwrap();
        assert_eq!(combined.name(), "wm+csf");
        let values: Vec<f64> = combined.probabilities().iter().cloned().collect();
        assert_eq!(values, vec![1.0, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_maximum() {
        let maps = vec![map("wm", [0.7, 0.2, 0.0, 1.0]), map("csf", [0.6, 0.3, 0.0, 0.5])];
        let combined = combine(&maps, &[1, 0], CombineMethod::Maximum).unwrap();
        assert_eq!(combined.name(), "csf+wm");
        let values: Vec<f64> = combined.probabilities().iter().cloned().collect();
        assert_eq!(values, vec![0.7, 0.3, 0.0, 1.0]);
    }

    #[test]
    fn test_single_index_returns_map_unchanged() {
        let maps = vec![map("wm", [0.7, 0.2, 0.0, 1.0]), map("csf", [0.6, 0.3, 0.0, 0.5])];
        let combined = combine(&maps, &[1], CombineMethod::Sum).unwrap();
        assert_eq!(combined, maps[1]);
    }

    #[test]
    fn test_index_out_of_range() {
        let maps = vec![map("wm", [0.0; 4])];
        let result = combine(&maps, &[0, 2], CombineMethod::Sum);
        assert!(matches!(result, Err(ConfoundError::InvalidParameter { .. })));
        assert!(combine(&maps, &[], CombineMethod::Sum).is_err());
    }

    #[test]
    fn test_mismatched_grids() {
        let probabilities = Array3::<f64>::zeros((3, 2, 1));
        let maps = vec![
            map("wm", [0.0; 4]),
            ProbabilityMap::from_probabilities("csf", probabilities, Affine::identity()),
        ];
        let result = combine(&maps, &[0, 1], CombineMethod::Sum);
        assert!(matches!(result, Err(ConfoundError::ShapeMismatch { .. })));
    }
}

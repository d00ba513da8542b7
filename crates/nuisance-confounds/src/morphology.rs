// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Binary erosion on 3-D boolean volumes.

A voxel survives one erosion iteration when it and every neighbour of the
structuring element are set. Neighbours outside the volume count as
background, so voxels on the volume border are always removed.
*/

use ndarray::{Array3, Zip};
use nuisance_config::Connectivity;

/// Offsets of the face neighbours
const FACE_OFFSETS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

fn neighbour_offsets(connectivity: Connectivity) -> Vec<[isize; 3]> {
    match connectivity {
        Connectivity::Six => FACE_OFFSETS.to_vec(),
        Connectivity::TwentySix => {
            let mut offsets = Vec::with_capacity(26);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        if (dx, dy, dz) != (0, 0, 0) {
                            offsets.push([dx, dy, dz]);
                        }
                    }
                }
            }
            offsets
        }
    }
}

/// One erosion iteration
pub fn erode_once(mask: &Array3<bool>, connectivity: Connectivity) -> Array3<bool> {
    let offsets = neighbour_offsets(connectivity);
    let (nx, ny, nz) = mask.dim();
    let dims = [nx as isize, ny as isize, nz as isize];
    let survives = |(x, y, z): (usize, usize, usize), &on: &bool| -> bool {
        if !on {
            return false;
        }
        offsets.iter().all(|offset| {
            let n = [
                x as isize + offset[0],
                y as isize + offset[1],
                z as isize + offset[2],
            ];
            if (0..3).any(|axis| n[axis] < 0 || n[axis] >= dims[axis]) {
                return false;
            }
            mask[[n[0] as usize, n[1] as usize, n[2] as usize]]
        })
    };

    #[cfg(feature = "parallel")]
    {
        Zip::indexed(mask).par_map_collect(survives)
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::indexed(mask).map_collect(survives)
    }
}

/// Erode `iterations` times, stopping early once the mask is empty.
pub fn binary_erosion(
    mask: &Array3<bool>,
    connectivity: Connectivity,
    iterations: usize,
) -> Array3<bool> {
    let mut current = mask.clone();
    for _ in 0..iterations {
        if !current.iter().any(|&v| v) {
            break;
        }
        current = erode_once(&current, connectivity);
    }
    current
}

/// Erode one iteration at a time until at most `proportion` of the original
/// voxels remain. An already-empty mask is returned unchanged.
pub fn erode_to_proportion(
    mask: &Array3<bool>,
    connectivity: Connectivity,
    proportion: f64,
) -> Array3<bool> {
    let original = count(mask);
    let mut current = mask.clone();
    if original == 0 {
        return current;
    }
    let mut remaining = original;
    while remaining as f64 / original as f64 > proportion {
        let next = erode_once(&current, connectivity);
        let next_count = count(&next);
        current = next;
        if next_count == remaining {
            // no progress
            break;
        }
        remaining = next_count;
    }
    current
}

/// Iterations needed to erode `millimeters` on a grid with the given voxel
/// spacing: `floor(mm / max_zoom)`.
pub fn iterations_for_distance(millimeters: f64, zooms: [f64; 3]) -> usize {
    let max_zoom = zooms.iter().cloned().fold(f64::MIN, f64::max);
    if millimeters <= 0.0 || max_zoom <= 0.0 {
        return 0;
    }
    (millimeters / max_zoom).floor() as usize
}

pub fn count(mask: &Array3<bool>) -> usize {
    mask.iter().filter(|&&v| v).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn cube(size: usize, inner: std::ops::Range<usize>) -> Array3<bool> {
        let mut mask = Array3::from_elem((size, size, size), false);
        mask.slice_mut(s![inner.clone(), inner.clone(), inner]).fill(true);
        mask
    }

    #[test]
    fn test_six_connected_erosion_peels_one_layer() {
        let mask = cube(7, 1..6);
        let eroded = erode_once(&mask, Connectivity::Six);
        assert_eq!(count(&eroded), 27);
        assert!(eroded[[3, 3, 3]]);
        assert!(!eroded[[1, 3, 3]]);
    }

    #[test]
    fn test_border_counts_as_background() {
        let mask = Array3::from_elem((3, 3, 3), true);
        let eroded = erode_once(&mask, Connectivity::Six);
        assert_eq!(count(&eroded), 1);
        assert!(eroded[[1, 1, 1]]);
    }

    #[test]
    fn test_twenty_six_connectivity_removes_edges() {
        // Centre keeps all face neighbours but loses one corner neighbour
        let mut mask = Array3::from_elem((5, 5, 5), false);
        mask.slice_mut(s![1..4, 1..4, 1..4]).fill(true);
        mask[[1, 1, 1]] = false;
        assert!(erode_once(&mask, Connectivity::Six)[[2, 2, 2]]);
        assert!(!erode_once(&mask, Connectivity::TwentySix)[[2, 2, 2]]);
    }

    #[test]
    fn test_proportional_erosion_stops_below_target() {
        let mask = cube(12, 1..11);
        let eroded = erode_to_proportion(&mask, Connectivity::Six, 0.3);
        // 1000 -> 512 -> 216 voxels
        assert_eq!(count(&eroded), 216);
        let previous = binary_erosion(&mask, Connectivity::Six, 1);
        assert!(count(&previous) as f64 / count(&mask) as f64 > 0.3);
    }

    #[test]
    fn test_iterations_for_distance() {
        assert_eq!(iterations_for_distance(30.0, [3.0, 3.0, 3.0]), 10);
        assert_eq!(iterations_for_distance(5.0, [2.0, 2.0, 3.0]), 1);
        assert_eq!(iterations_for_distance(2.0, [3.0, 3.0, 3.0]), 0);
        assert_eq!(iterations_for_distance(0.0, [1.0, 1.0, 1.0]), 0);
    }
}

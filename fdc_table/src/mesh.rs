//! Bed-mesh normalization.
//!
//! The frame keeps deforming while the probe sweeps the bed, so the absolute
//! height of a single map drifts independently of the bed's actual shape.
//! Rebasing every map to its physical center cell removes that common-mode
//! drift and makes maps taken at different temperatures comparable.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::FdcError;

/// One probed height map plus the metadata the probe reported with it.
/// `params` is opaque to the pipeline and carried through to the serializer.
#[derive(Clone, Debug)]
pub struct MeshSample {
    pub points: Array2<f64>,
    pub params: BTreeMap<String, JsonValue>,
}

/// Rebase `points` so the center cell reads exactly zero.
///
/// Requires odd row and column counts; an even count has no single center
/// cell and is rejected. Emits a diagnostic (not an error) when the
/// pre-normalization center magnitude exceeds `drift_tol`.
pub fn normalize(points: &Array2<f64>, drift_tol: f64) -> Result<Array2<f64>, FdcError> {
    let (rows, cols) = points.dim();
    if rows % 2 == 0 || cols % 2 == 0 {
        return Err(FdcError::MeshShape { rows, cols });
    }
    let center = points[(rows / 2, cols / 2)];
    if center.abs() > drift_tol {
        warn!(
            center,
            drift_tol, "mesh center drifted beyond tolerance before rebase"
        );
    }
    Ok(points.mapv(|v| v - center))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn center_cell_is_exactly_zero() {
        let mesh = arr2(&[
            [0.01, 0.02, 0.03],
            [0.00, 0.05, 0.01],
            [-0.02, 0.00, 0.04],
        ]);
        let out = normalize(&mesh, 0.002).unwrap();
        assert_eq!(out[(1, 1)], 0.0);
        assert_eq!(out[(0, 0)], 0.01 - 0.05);
    }

    #[test]
    fn all_equal_mesh_becomes_all_zero() {
        let mesh = Array2::from_elem((5, 5), 0.0137);
        let out = normalize(&mesh, 0.002).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn even_grids_are_rejected() {
        for dim in [(4, 4), (6, 6), (5, 4), (4, 5), (0, 0)] {
            let mesh = Array2::zeros(dim);
            assert!(matches!(
                normalize(&mesh, 0.002),
                Err(FdcError::MeshShape { .. })
            ));
        }
    }
}

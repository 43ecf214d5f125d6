//! Taste projection: a deterministic 2D map of voters
//!
//! # Pipeline
//! 1. Order voters by identity string so the geometry does not depend on sheet order
//! 2. Drop voters without a single valid rating (their row mean is undefined)
//! 3. Impute each missing rating with that voter's own mean rating
//! 4. Standardize every song column (zero mean, unit population variance)
//! 5. Classical multidimensional scaling to two dimensions
//! 6. Re-normalize each output axis to zero mean and unit variance
//!
//! Step 5 needs the optional `taste-map` feature (ndarray). Availability is a
//! `Capabilities` flag resolved once at startup; when it is off, or anything
//! in the pipeline degenerates, `project` returns an empty projection.
//!
//! # Determinism
//! Classical MDS is solved by power iteration with a fixed start vector and
//! deflation. Each eigenvector's sign is fixed so that its largest-magnitude
//! component is positive. Same matrix in, same coordinates out.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::comparison::{local_part, DEFAULT_IDENTITY_COLUMN};
use crate::scoring::RatingMatrix;

/// Added to the per-axis standard deviation before dividing
const AXIS_EPSILON: f64 = 1e-9;

/// Optional numeric capabilities, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub taste_projection: bool,
}

impl Capabilities {
    /// Capabilities compiled into this build
    pub fn detect() -> Self {
        Self {
            taste_projection: cfg!(feature = "taste-map"),
        }
    }

    /// Every optional capability switched off
    pub fn none() -> Self {
        Self {
            taste_projection: false,
        }
    }
}

/// Why a projection could not be produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("taste projection is not available in this build")]
    Unavailable,

    #[error("not enough data for a taste projection: {0}")]
    Degenerate(String),

    #[error("taste projection failed: {0}")]
    Numerical(String),
}

/// One voter's position on the taste map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TastePoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub is_current_user: bool,
}

/// Projects voters onto a 2D taste map
#[derive(Debug, Clone)]
pub struct TasteProjector {
    capabilities: Capabilities,
    identity_column: String,
}

impl TasteProjector {
    pub fn new(capabilities: Capabilities, identity_column: impl Into<String>) -> Self {
        Self {
            capabilities,
            identity_column: identity_column.into(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Project voters; any failure yields an empty projection
    pub fn project(&self, matrix: Option<&RatingMatrix>, highlight: Option<&str>) -> Vec<TastePoint> {
        match self.try_project(matrix, highlight) {
            Ok(points) => points,
            Err(ProjectionError::Numerical(reason)) => {
                warn!(%reason, "Taste projection failed, returning empty map");
                Vec::new()
            }
            Err(e) => {
                debug!(reason = %e, "Taste projection skipped");
                Vec::new()
            }
        }
    }

    /// Project voters, reporting why a projection is empty
    pub fn try_project(
        &self,
        matrix: Option<&RatingMatrix>,
        highlight: Option<&str>,
    ) -> Result<Vec<TastePoint>, ProjectionError> {
        if !self.capabilities.taste_projection {
            return Err(ProjectionError::Unavailable);
        }
        let matrix = matrix.ok_or_else(|| ProjectionError::Degenerate("no data".into()))?;
        if matrix.song_count() == 0 {
            return Err(ProjectionError::Degenerate("no song columns".into()));
        }
        let column = matrix
            .identity_index(&self.identity_column)
            .ok_or_else(|| ProjectionError::Degenerate("missing identity column".into()))?;

        // Stable voter order: identity string, then original row
        let mut order: Vec<usize> = (0..matrix.voter_count())
            .filter(|&i| matrix.voters[i].rated_count() > 0)
            .collect();
        order.sort_by(|&a, &b| {
            matrix.voters[a].identity[column].cmp(&matrix.voters[b].identity[column])
        });

        if order.len() < 2 {
            return Err(ProjectionError::Degenerate(format!(
                "{} voter(s) with ratings, need at least 2",
                order.len()
            )));
        }

        let mut rows = impute_row_means(matrix, &order);
        standardize_columns(&mut rows);
        let coords = embed(&rows)?;
        let coords = normalize_axes(&coords);

        let wanted = highlight.map(local_part).filter(|h| !h.is_empty());
        let mut highlighted = false;
        let mut anonymous = 0;
        let points = order
            .iter()
            .zip(coords)
            .map(|(&row, [x, y])| {
                let name = local_part(&matrix.voters[row].identity[column]);
                let is_current_user = !highlighted && wanted.as_deref() == Some(name.as_str());
                let label = if is_current_user {
                    highlighted = true;
                    name
                } else {
                    anonymous += 1;
                    format!("Voter {}", anonymous)
                };
                TastePoint {
                    label,
                    x,
                    y,
                    is_current_user,
                }
            })
            .collect();

        Ok(points)
    }
}

impl Default for TasteProjector {
    fn default() -> Self {
        Self::new(Capabilities::detect(), DEFAULT_IDENTITY_COLUMN)
    }
}

/// Dense rows for the selected voters, missing cells filled with the voter's mean
fn impute_row_means(matrix: &RatingMatrix, order: &[usize]) -> Vec<Vec<f64>> {
    order
        .iter()
        .map(|&i| {
            let voter = &matrix.voters[i];
            // Callers only pass voters with at least one rating
            let fill = voter.mean_rating().unwrap_or(0.0);
            voter.ratings.iter().map(|r| r.unwrap_or(fill)).collect()
        })
        .collect()
}

/// Zero mean, unit population variance per column; constant columns become zero
fn standardize_columns(rows: &mut [Vec<f64>]) {
    let n = rows.len() as f64;
    let width = rows.first().map(Vec::len).unwrap_or(0);

    for col in 0..width {
        let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        let scale = if std > 0.0 { std } else { 1.0 };
        for row in rows.iter_mut() {
            row[col] = (row[col] - mean) / scale;
        }
    }
}

/// Re-center each axis and scale it to unit population variance
fn normalize_axes(coords: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let n = coords.len() as f64;
    let mut out = coords.to_vec();
    for axis in 0..2 {
        let mean = coords.iter().map(|c| c[axis]).sum::<f64>() / n;
        let var = coords.iter().map(|c| (c[axis] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for c in out.iter_mut() {
            c[axis] = (c[axis] - mean) / (std + AXIS_EPSILON);
        }
    }
    out
}

#[cfg(feature = "taste-map")]
fn embed(rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, ProjectionError> {
    mds::classical_mds(rows)
}

#[cfg(not(feature = "taste-map"))]
fn embed(_rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, ProjectionError> {
    Err(ProjectionError::Unavailable)
}

#[cfg(feature = "taste-map")]
mod mds {
    //! Classical (Torgerson) multidimensional scaling

    use ndarray::{Array1, Array2};

    use super::ProjectionError;

    const MAX_ITERATIONS: usize = 1000;
    const TOLERANCE: f64 = 1e-12;
    /// Eigenvalues below this are treated as zero
    const EIGEN_FLOOR: f64 = 1e-10;

    /// Embed rows into two dimensions preserving euclidean distances
    pub(super) fn classical_mds(rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, ProjectionError> {
        let n = rows.len();
        let p = rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((n, p), flat)
            .map_err(|e| ProjectionError::Numerical(e.to_string()))?;

        let b = double_centered_gram(&x);
        if b.iter().any(|v| !v.is_finite()) {
            return Err(ProjectionError::Numerical("non-finite distance matrix".into()));
        }

        let (l1, v1) = dominant_eigenpair(&b, None);
        let mut deflated = b.clone();
        for i in 0..n {
            for j in 0..n {
                deflated[[i, j]] -= l1 * v1[i] * v1[j];
            }
        }
        let (l2, v2) = dominant_eigenpair(&deflated, Some(&v1));

        let s1 = l1.max(0.0).sqrt();
        let s2 = l2.max(0.0).sqrt();
        let coords: Vec<[f64; 2]> = (0..n).map(|i| [v1[i] * s1, v2[i] * s2]).collect();

        if coords.iter().flatten().any(|c| !c.is_finite()) {
            return Err(ProjectionError::Numerical("non-finite coordinates".into()));
        }
        Ok(coords)
    }

    /// B = -1/2 · J · D² · J with J the centering matrix
    fn double_centered_gram(x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let mut d2 = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let diff = &x.row(i) - &x.row(j);
                let dist = diff.dot(&diff);
                d2[[i, j]] = dist;
                d2[[j, i]] = dist;
            }
        }

        let row_means: Vec<f64> = (0..n).map(|i| d2.row(i).sum() / n as f64).collect();
        let grand_mean = row_means.iter().sum::<f64>() / n as f64;

        let mut b = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                b[[i, j]] = -0.5 * (d2[[i, j]] - row_means[i] - row_means[j] + grand_mean);
            }
        }
        b
    }

    /// Largest eigenpair of a symmetric PSD matrix by power iteration
    ///
    /// `orthogonal_to` keeps the iterate orthogonal to an already found eigenvector.
    fn dominant_eigenpair(m: &Array2<f64>, orthogonal_to: Option<&Array1<f64>>) -> (f64, Array1<f64>) {
        let n = m.nrows();
        let mut v: Array1<f64> = (0..n).map(|i| 1.0 + (i as f64 + 1.0).sqrt()).collect();
        project_out(&mut v, orthogonal_to);
        if !normalize(&mut v) {
            return (0.0, Array1::zeros(n));
        }

        let mut eigenvalue = 0.0;
        for _ in 0..MAX_ITERATIONS {
            let mut w = m.dot(&v);
            project_out(&mut w, orthogonal_to);
            eigenvalue = v.dot(&w);
            if !normalize(&mut w) {
                return (0.0, Array1::zeros(n));
            }
            let delta = (&w - &v).mapv(|d| d * d).sum();
            v = w;
            if delta < TOLERANCE {
                break;
            }
        }

        if eigenvalue < EIGEN_FLOOR {
            return (0.0, Array1::zeros(n));
        }
        canonical_sign(&mut v);
        (eigenvalue, v)
    }

    fn project_out(v: &mut Array1<f64>, basis: Option<&Array1<f64>>) {
        if let Some(u) = basis {
            let coef = v.dot(u);
            v.scaled_add(-coef, u);
        }
    }

    fn normalize(v: &mut Array1<f64>) -> bool {
        let norm = v.dot(v).sqrt();
        if !norm.is_finite() || norm < EIGEN_FLOOR {
            return false;
        }
        v.mapv_inplace(|x| x / norm);
        true
    }

    /// Flip so that the largest-magnitude component is positive
    fn canonical_sign(v: &mut Array1<f64>) {
        let pivot = v
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            v.mapv_inplace(|x| -x);
        }
    }
}

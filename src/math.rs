use itertools::Itertools;
use ndarray::{Array, Array2};

use crate::{Error, Result};

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation variable `x` from power `0` to `degree` inclusive.
///
/// # Errors
/// Returns [`Error::InvalidParameter`] if `degree` does not fit in an `i32`.
///
/// # Examples
///
/// ```
/// use speciation::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2).unwrap();
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
pub fn vandermonde(x: &[f64], degree: usize) -> Result<Array2<f64>> {
    let degree_i32 = i32::try_from(degree)
        .map_err(|_| Error::InvalidParameter(format!("degree {degree} doesn't fit in `i32`")))?;
    let vals = x.iter().flat_map(|xi| (0..=degree_i32).map(|i| xi.powi(i)));

    Array::from_iter(vals)
        .into_shape((x.len(), degree + 1))
        .map_err(|e| Error::MalformedInput(e.to_string()))
}

/// Whether every element of `values` is strictly greater than the one before it
pub fn is_strictly_increasing(values: &[f64]) -> bool {
    values.iter().tuple_windows().all(|(a, b)| b > a)
}

/// Number of distinct values in `values`, treating `NaN` as distinct from everything
pub fn count_distinct(values: &[f64]) -> usize {
    values
        .iter()
        .sorted_by(|a, b| a.total_cmp(b))
        .dedup()
        .count()
}

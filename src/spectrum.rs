use std::ops::Range;

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::math::is_strictly_increasing;
use crate::{Error, Result};

/// A wavelength interval used to restrict a fit
///
/// A window selects the samples from the first wavelength strictly above `lower` up to, but not
/// including, the first wavelength strictly above `upper`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Window {
    pub lower: f64,
    pub upper: f64,
}

impl Window {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// # Errors
    /// Returns [`Error::InvalidParameter`] unless `lower < upper` and both are finite.
    pub fn validate(&self) -> Result<()> {
        if self.lower.is_finite() && self.upper.is_finite() && self.lower < self.upper {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "wavelength window must satisfy lower < upper, got {}..{}",
                self.lower, self.upper
            )))
        }
    }

    /// Index range of `wavelengths` covered by the window
    ///
    /// # Errors
    /// Returns [`Error::MalformedInput`] if no sample falls inside the window.
    pub fn indices(&self, wavelengths: &[f64]) -> Result<Range<usize>> {
        let start = wavelengths
            .iter()
            .position(|&wl| wl > self.lower)
            .unwrap_or(wavelengths.len());
        let end = wavelengths
            .iter()
            .position(|&wl| wl > self.upper)
            .unwrap_or(wavelengths.len());

        if start >= end {
            return Err(Error::MalformedInput(format!(
                "no wavelengths fall inside the window {}..{} nm",
                self.lower, self.upper
            )));
        }
        Ok(start..end)
    }
}

/// A collection of absorption spectra sharing one wavelength axis
///
/// The absorbance matrix has one row per wavelength and one column per spectrum.
#[derive(Clone, Debug)]
pub struct SpectralDataset {
    name: String,
    wavelengths: Array1<f64>,
    times: Array1<f64>,
    absorbance: Array2<f64>,
}

impl SpectralDataset {
    /// Build a dataset, checking the wavelength axis and the shape of the absorbance matrix
    ///
    /// # Errors
    /// Returns [`Error::MalformedInput`] if the wavelength axis is empty, non-finite or not
    /// strictly increasing, or if the absorbance matrix is not (wavelengths x times).
    pub fn new(
        name: impl Into<String>,
        wavelengths: Array1<f64>,
        times: Array1<f64>,
        absorbance: Array2<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if wavelengths.is_empty() {
            return Err(Error::MalformedInput(format!(
                "dataset `{name}` has an empty wavelength axis"
            )));
        }
        let axis = wavelengths.to_vec();
        if axis.iter().any(|wl| !wl.is_finite()) || !is_strictly_increasing(&axis) {
            return Err(Error::MalformedInput(format!(
                "dataset `{name}` wavelength axis is not strictly increasing"
            )));
        }
        let (rows, columns) = absorbance.dim();
        if rows != wavelengths.len() {
            return Err(Error::MalformedInput(format!(
                "dataset `{name}` has {rows} absorbance readings per spectrum but {} wavelengths",
                wavelengths.len()
            )));
        }
        if columns != times.len() {
            return Err(Error::MalformedInput(format!(
                "dataset `{name}` has {columns} spectra but {} capture times",
                times.len()
            )));
        }

        Ok(Self {
            name,
            wavelengths,
            times,
            absorbance,
        })
    }

    /// Build a dataset from one absorbance column per capture time
    ///
    /// # Errors
    /// As [`SpectralDataset::new`], and if any column length differs from the wavelength axis.
    pub fn from_columns(
        name: impl Into<String>,
        wavelengths: Vec<f64>,
        times: Vec<f64>,
        columns: &[Vec<f64>],
    ) -> Result<Self> {
        let name = name.into();
        let mut absorbance = Array2::zeros((wavelengths.len(), columns.len()));
        for (ii, column) in columns.iter().enumerate() {
            if column.len() != wavelengths.len() {
                return Err(Error::MalformedInput(format!(
                    "spectrum {ii} of dataset `{name}` has {} readings but the axis has {} wavelengths",
                    column.len(),
                    wavelengths.len()
                )));
            }
            absorbance
                .slice_mut(s![.., ii])
                .assign(&ArrayView1::from(column.as_slice()));
        }
        Self::new(name, Array1::from(wavelengths), Array1::from(times), absorbance)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wavelengths(&self) -> ArrayView1<'_, f64> {
        self.wavelengths.view()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The spectrum captured at position `index`, if present
    pub fn spectrum(&self, index: usize) -> Option<Spectrum<'_>> {
        (index < self.len()).then(|| Spectrum {
            index,
            time: self.times[index],
            wavelengths: self.wavelengths.view(),
            absorbance: self.absorbance.column(index),
        })
    }

    /// Iterate over the spectra in capture order
    pub fn spectra(&self) -> impl ExactSizeIterator<Item = Spectrum<'_>> + '_ {
        (0..self.len()).map(move |ii| Spectrum {
            index: ii,
            time: self.times[ii],
            wavelengths: self.wavelengths.view(),
            absorbance: self.absorbance.column(ii),
        })
    }
}

/// A single absorption spectrum borrowed from a [`SpectralDataset`]
#[derive(Clone, Copy, Debug)]
pub struct Spectrum<'a> {
    pub index: usize,
    pub time: f64,
    pub wavelengths: ArrayView1<'a, f64>,
    pub absorbance: ArrayView1<'a, f64>,
}

impl<'a> Spectrum<'a> {
    /// Restrict the spectrum to `window`, returning `(wavelengths, absorbance)`
    ///
    /// # Errors
    /// Returns [`Error::MalformedInput`] if the window selects no samples.
    pub fn windowed(&self, window: &Window) -> Result<(ArrayView1<'a, f64>, ArrayView1<'a, f64>)> {
        let axis = self.wavelengths.to_vec();
        let range = window.indices(&axis)?;
        Ok((
            self.wavelengths.slice_move(s![range.clone()]),
            self.absorbance.slice_move(s![range]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array2};

    use super::{SpectralDataset, Window};
    use crate::Error;

    #[test]
    fn window_selects_wavelengths_strictly_above_each_bound() {
        let wavelengths = [300.0, 320.0, 321.0, 400.0, 650.0, 651.0, 700.0];
        let range = Window::new(320.0, 650.0).indices(&wavelengths).unwrap();
        assert_eq!(range, 2..5);
    }

    #[test]
    fn window_runs_to_the_end_of_a_short_axis() {
        let wavelengths = [350.0, 400.0, 450.0];
        let range = Window::new(360.0, 650.0).indices(&wavelengths).unwrap();
        assert_eq!(range, 1..3);
    }

    #[test]
    fn empty_window_is_malformed() {
        let wavelengths = [700.0, 710.0];
        assert!(matches!(
            Window::new(320.0, 650.0).indices(&wavelengths),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn inverted_window_is_invalid() {
        assert!(matches!(
            Window::new(650.0, 320.0).validate(),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn non_increasing_wavelength_axis_is_malformed() {
        let result = SpectralDataset::new(
            "bad",
            array![300.0, 310.0, 310.0, 320.0],
            array![0.0],
            Array2::zeros((4, 1)),
        );
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn absorbance_column_length_mismatch_is_malformed() {
        let result = SpectralDataset::from_columns(
            "bad",
            vec![300.0, 310.0, 320.0],
            vec![0.0, 60.0],
            &[vec![0.1, 0.2, 0.3], vec![0.1, 0.2]],
        );
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn time_count_mismatch_is_malformed() {
        let result = SpectralDataset::new(
            "bad",
            array![300.0, 310.0],
            array![0.0, 60.0, 120.0],
            Array2::zeros((2, 2)),
        );
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn spectra_are_columns_of_the_absorbance_matrix() {
        let dataset = SpectralDataset::from_columns(
            "ok",
            vec![300.0, 310.0, 320.0],
            vec![0.0, 60.0],
            &[vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]],
        )
        .unwrap();

        assert_eq!(dataset.len(), 2);
        let second = dataset.spectrum(1).unwrap();
        assert_eq!(second.time, 60.0);
        assert_eq!(second.absorbance.to_vec(), vec![0.4, 0.5, 0.6]);
        assert!(dataset.spectrum(2).is_none());

        let (wavelengths, absorbance) = second.windowed(&Window::new(300.0, 310.0)).unwrap();
        assert_eq!(wavelengths.to_vec(), vec![310.0]);
        assert_eq!(absorbance.to_vec(), vec![0.5]);
    }
}

use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Evaluate a single Gaussian absorption feature at `wavelength`
///
/// $$
///     g(\lambda) = h \exp\left(-\frac{(\lambda - c)^2}{2 w^2}\right)
/// $$
///
/// The caller must guarantee `width > 0`, a zero width divides by zero.
///
/// # Examples
///
/// ```
/// use speciation::gaussian::gaussian;
///
/// assert_eq!(gaussian(400.0, 0.7, 400.0, 20.0), 0.7);
/// ```
pub fn gaussian<T: Float>(wavelength: T, height: T, center: T, width: T) -> T {
    let two = T::one() + T::one();
    height * (-(wavelength - center).powi(2) / (two * width.powi(2))).exp()
}

/// Sum of [`gaussian`] over every peak in `peaks`
pub fn gaussian_sum(wavelength: f64, peaks: &[GaussianPeak]) -> f64 {
    peaks.iter().map(|peak| peak.evaluate(wavelength)).sum()
}

/// A single Gaussian peak
///
/// Peaks built with [`GaussianPeak::new`] always have a finite, strictly positive width. Peaks
/// deserialized from configuration are checked with [`GaussianPeak::validate`] before use.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct GaussianPeak {
    pub height: f64,
    pub center: f64,
    pub width: f64,
}

impl GaussianPeak {
    /// Build a peak, rejecting widths which are not strictly positive
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if `width` is not finite and greater than zero.
    pub fn new(height: f64, center: f64, width: f64) -> Result<Self> {
        let peak = Self {
            height,
            center,
            width,
        };
        peak.validate()?;
        Ok(peak)
    }

    /// Check the width precondition of [`gaussian`]
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the width is not finite and greater than zero.
    pub fn validate(&self) -> Result<()> {
        if self.width.is_finite() && self.width > 0.0 {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "gaussian width must be positive, got {} for the peak centred at {}",
                self.width, self.center
            )))
        }
    }

    pub fn evaluate(&self, wavelength: f64) -> f64 {
        gaussian(wavelength, self.height, self.center, self.width)
    }

    /// Partial derivatives with respect to `[height, center, width]`
    pub(crate) fn gradient(&self, wavelength: f64) -> [f64; 3] {
        let offset = wavelength - self.center;
        let width_squared = self.width.powi(2);
        let shape = (-offset.powi(2) / (2.0 * width_squared)).exp();
        let value = self.height * shape;
        [
            shape,
            value * offset / width_squared,
            value * offset.powi(2) / (width_squared * self.width),
        ]
    }
}

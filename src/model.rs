use crate::gaussian::{gaussian_sum, GaussianPeak};
use crate::reference::{ReferenceModel, ReferenceModels};
use crate::Result;

/// A spectral model linear or nonlinear in a flat parameter vector
///
/// Implementors evaluate the predicted absorbance at a wavelength and its partial derivatives with
/// respect to every parameter, so the least-squares problem can build an analytic Jacobian.
pub trait SpectralModel {
    fn num_params(&self) -> usize;

    fn evaluate(&self, wavelength: f64, params: &[f64]) -> f64;

    /// Write the partial derivatives at `wavelength` into `gradient`, which has length
    /// [`SpectralModel::num_params`]
    fn gradient(&self, wavelength: f64, params: &[f64], gradient: &mut [f64]);

    /// Reject parameter vectors the model cannot be evaluated at
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameter`] when a peak width is not positive.
    fn validate(&self, params: &[f64]) -> Result<()>;
}

/// Read consecutive `(height, center, width)` triples as peaks
fn peaks_from(params: &[f64]) -> impl Iterator<Item = GaussianPeak> + '_ {
    params.chunks_exact(3).map(|chunk| GaussianPeak {
        height: chunk[0],
        center: chunk[1],
        width: chunk[2],
    })
}

fn write_peak_gradients(wavelength: f64, params: &[f64], gradient: &mut [f64]) {
    for (peak, slot) in peaks_from(params).zip(gradient.chunks_exact_mut(3)) {
        slot.copy_from_slice(&peak.gradient(wavelength));
    }
}

/// Three free Gaussians on a constant baseline
///
/// Parameters are `[h1, c1, w1, h2, c2, w2, h3, c3, w3, baseline]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BromineModel;

impl BromineModel {
    pub const NUM_PEAKS: usize = 3;

    pub(crate) fn peaks(params: &[f64]) -> Vec<GaussianPeak> {
        peaks_from(&params[..3 * Self::NUM_PEAKS]).collect()
    }

    pub(crate) fn baseline(params: &[f64]) -> f64 {
        params[3 * Self::NUM_PEAKS]
    }
}

impl SpectralModel for BromineModel {
    fn num_params(&self) -> usize {
        3 * Self::NUM_PEAKS + 1
    }

    fn evaluate(&self, wavelength: f64, params: &[f64]) -> f64 {
        peaks_from(&params[..3 * Self::NUM_PEAKS])
            .map(|peak| peak.evaluate(wavelength))
            .sum::<f64>()
            + Self::baseline(params)
    }

    fn gradient(&self, wavelength: f64, params: &[f64], gradient: &mut [f64]) {
        let split = 3 * Self::NUM_PEAKS;
        write_peak_gradients(wavelength, &params[..split], &mut gradient[..split]);
        gradient[split] = 1.0;
    }

    fn validate(&self, params: &[f64]) -> Result<()> {
        peaks_from(&params[..3 * Self::NUM_PEAKS]).try_for_each(|peak| peak.validate())
    }
}

/// A frozen bromine shape under a free amplitude, plus two free Gaussians for tribromide
///
/// Parameters are `[amplitude, h1, c1, w1, h2, c2, w2]`.
#[derive(Clone, Debug)]
pub struct CompositeModel {
    bromine: ReferenceModel,
}

impl CompositeModel {
    pub const NUM_FREE_PEAKS: usize = 2;

    pub const fn new(bromine: ReferenceModel) -> Self {
        Self { bromine }
    }

    pub(crate) fn free_peaks(params: &[f64]) -> Vec<GaussianPeak> {
        peaks_from(&params[1..]).collect()
    }
}

impl SpectralModel for CompositeModel {
    fn num_params(&self) -> usize {
        1 + 3 * Self::NUM_FREE_PEAKS
    }

    fn evaluate(&self, wavelength: f64, params: &[f64]) -> f64 {
        params[0] * self.bromine.evaluate(wavelength)
            + peaks_from(&params[1..])
                .map(|peak| peak.evaluate(wavelength))
                .sum::<f64>()
    }

    fn gradient(&self, wavelength: f64, params: &[f64], gradient: &mut [f64]) {
        gradient[0] = self.bromine.evaluate(wavelength);
        write_peak_gradients(wavelength, &params[1..], &mut gradient[1..]);
    }

    fn validate(&self, params: &[f64]) -> Result<()> {
        peaks_from(&params[1..]).try_for_each(|peak| peak.validate())
    }
}

/// Both reference shapes under one free amplitude each
///
/// Parameters are `[bromine_amplitude, tribromide_amplitude]`.
#[derive(Clone, Debug)]
pub struct ScalingModel {
    references: ReferenceModels,
}

impl ScalingModel {
    pub const fn new(references: ReferenceModels) -> Self {
        Self { references }
    }

    fn basis(&self, wavelength: f64) -> [f64; 2] {
        [
            gaussian_sum(wavelength, self.references.bromine.peaks()),
            gaussian_sum(wavelength, self.references.tribromide.peaks()),
        ]
    }
}

impl SpectralModel for ScalingModel {
    fn num_params(&self) -> usize {
        2
    }

    fn evaluate(&self, wavelength: f64, params: &[f64]) -> f64 {
        let [bromine, tribromide] = self.basis(wavelength);
        params[0] * bromine + params[1] * tribromide
    }

    fn gradient(&self, wavelength: f64, _params: &[f64], gradient: &mut [f64]) {
        gradient.copy_from_slice(&self.basis(wavelength));
    }

    fn validate(&self, _params: &[f64]) -> Result<()> {
        Ok(())
    }
}

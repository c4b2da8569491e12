use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationLine;
use crate::config::PredictionSettings;
use crate::scaling::{BatchFit, ScalingFitter, SpectrumFailure};
use crate::spectrum::SpectralDataset;

/// How a fitted tribromide amplitude is turned back into a concentration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Inversion {
    /// `(amplitude - intercept) / slope`, the exact inverse of the calibration line
    SubtractIntercept,
    /// `amplitude / slope`, treating the intercept as zero
    ThroughOrigin,
}

/// Concentrations recovered from one spectrum
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConcentrationPoint {
    pub time: f64,
    /// [Br2] in mol/L
    pub bromine: f64,
    /// [NaBr3] in mol/L
    pub tribromide: f64,
}

/// Time-ordered concentrations, one per successfully fitted spectrum
pub type ConcentrationSeries = Vec<ConcentrationPoint>;

#[derive(Debug, Default)]
pub struct Prediction {
    pub series: ConcentrationSeries,
    pub failures: Vec<SpectrumFailure>,
}

/// Turns spectra into concentrations with a fitted scaling model and calibration line
#[derive(Clone, Debug)]
pub struct Predictor {
    fitter: ScalingFitter,
    line: CalibrationLine,
    initial_bromine_concentration: f64,
    settings: PredictionSettings,
}

impl Predictor {
    pub const fn new(
        fitter: ScalingFitter,
        line: CalibrationLine,
        initial_bromine_concentration: f64,
        settings: PredictionSettings,
    ) -> Self {
        Self {
            fitter,
            line,
            initial_bromine_concentration,
            settings,
        }
    }

    /// Concentrations for every spectrum in `dataset`
    ///
    /// Spectra whose amplitude fit fails are left out of the series and reported in
    /// [`Prediction::failures`].
    pub fn predict(&self, dataset: &SpectralDataset) -> Prediction {
        let BatchFit { fits, failures } = self.fitter.fit_dataset(dataset);
        let series = fits
            .iter()
            .map(|fit| ConcentrationPoint {
                time: fit.time / self.settings.time_divisor,
                bromine: self.initial_bromine_concentration * fit.amplitudes.bromine,
                tribromide: self
                    .line
                    .concentration(fit.amplitudes.tribromide, self.settings.inversion),
            })
            .collect();
        Prediction { series, failures }
    }
}

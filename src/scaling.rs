use log::{debug, warn};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ScalingSettings, SolverSettings};
use crate::minimisation::{CurveFit, FitReport};
use crate::model::ScalingModel;
use crate::reference::ReferenceModels;
use crate::spectrum::{SpectralDataset, Spectrum, Window};
use crate::{Error, Result};

/// Where each spectrum's amplitude fit starts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmStart {
    /// Every spectrum starts from the configured amplitudes, spectra are fitted in parallel
    Off,
    /// Each spectrum starts from the last successful solution, spectra are fitted in order
    PreviousSolution,
}

/// Multiplicative factors on the bromine and tribromide reference shapes
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalingFitResult {
    pub bromine: f64,
    pub tribromide: f64,
}

/// A converged amplitude fit for one spectrum
#[derive(Clone, Debug)]
pub struct ScalingFit {
    pub index: usize,
    pub time: f64,
    pub amplitudes: ScalingFitResult,
    pub report: FitReport,
}

/// A spectrum whose fit failed, identified by position and capture time
#[derive(Debug)]
pub struct SpectrumFailure {
    pub index: usize,
    pub time: f64,
    pub error: Error,
}

/// Results of fitting every spectrum in a dataset, both in input order
#[derive(Debug, Default)]
pub struct BatchFit {
    pub fits: Vec<ScalingFit>,
    pub failures: Vec<SpectrumFailure>,
}

/// Fits the two-amplitude scaling model to spectra
#[derive(Clone, Debug)]
pub struct ScalingFitter {
    model: ScalingModel,
    window: Window,
    initial_amplitudes: [f64; 2],
    warm_start: WarmStart,
    solver: SolverSettings,
}

impl ScalingFitter {
    pub fn new(
        references: &ReferenceModels,
        window: Window,
        settings: &ScalingSettings,
        solver: SolverSettings,
    ) -> Self {
        Self {
            model: ScalingModel::new(references.clone()),
            window,
            initial_amplitudes: settings.initial_amplitudes,
            warm_start: settings.warm_start,
            solver,
        }
    }

    /// A fitter over the combined window with the configured guess, warm start and solver
    pub fn from_config(references: &ReferenceModels, config: &Config) -> Self {
        Self::new(
            references,
            config.windows.combined,
            &config.scaling,
            config.solver,
        )
    }

    /// Fit `(bromine, tribromide)` amplitudes to one spectrum starting from `initial`
    ///
    /// # Errors
    /// Returns [`Error::FitNonConvergence`] if the solver fails and [`Error::MalformedInput`]
    /// if the window selects no wavelengths.
    pub fn fit_spectrum(&self, spectrum: &Spectrum<'_>, initial: [f64; 2]) -> Result<ScalingFit> {
        let (wavelengths, absorbance) = spectrum.windowed(&self.window)?;
        let context = format!("amplitudes of spectrum {} (t = {})", spectrum.index, spectrum.time);
        let report = CurveFit::new(self.model.clone(), wavelengths, absorbance).solve(
            Array1::from(initial.to_vec()),
            &self.solver,
            &context,
        )?;

        let amplitudes = ScalingFitResult {
            bromine: report.params[0],
            tribromide: report.params[1],
        };
        debug!(
            "spectrum {} (t = {}): bromine {:.5}, tribromide {:.5}",
            spectrum.index, spectrum.time, amplitudes.bromine, amplitudes.tribromide
        );

        Ok(ScalingFit {
            index: spectrum.index,
            time: spectrum.time,
            amplitudes,
            report,
        })
    }

    /// Fit every spectrum of `dataset` independently
    ///
    /// A failed spectrum does not stop the batch, it is recorded in [`BatchFit::failures`].
    pub fn fit_dataset(&self, dataset: &SpectralDataset) -> BatchFit {
        let outcomes: Vec<(usize, f64, Result<ScalingFit>)> = match self.warm_start {
            WarmStart::Off => dataset
                .spectra()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|spectrum| {
                    (
                        spectrum.index,
                        spectrum.time,
                        self.fit_spectrum(&spectrum, self.initial_amplitudes),
                    )
                })
                .collect(),
            WarmStart::PreviousSolution => {
                let mut initial = self.initial_amplitudes;
                dataset
                    .spectra()
                    .map(|spectrum| {
                        let outcome = self.fit_spectrum(&spectrum, initial);
                        if let Ok(fit) = &outcome {
                            initial = [fit.amplitudes.bromine, fit.amplitudes.tribromide];
                        }
                        (spectrum.index, spectrum.time, outcome)
                    })
                    .collect()
            }
        };

        let mut batch = BatchFit::default();
        for (index, time, outcome) in outcomes {
            match outcome {
                Ok(fit) => batch.fits.push(fit),
                Err(error) => {
                    warn!(
                        "spectrum {index} (t = {time}) of `{}` failed: {error}",
                        dataset.name()
                    );
                    batch.failures.push(SpectrumFailure { index, time, error });
                }
            }
        }
        batch
    }
}

use log::{info, warn};

use crate::calibration::{calibrate, Calibration};
use crate::config::Config;
use crate::predictor::{Prediction, Predictor};
use crate::reference::{train_references, ReferenceFits, ReferenceModels};
use crate::scaling::ScalingFitter;
use crate::spectrum::SpectralDataset;
use crate::{Error, Result};

/// Reference shapes and calibration learnt from the training runs
#[derive(Clone, Debug)]
pub struct TrainedModel {
    pub references: ReferenceFits,
    pub calibration: Calibration,
}

/// Learn the reference shapes from `reference` and the calibration line from `calibration`
///
/// Calibration spectra whose amplitude fit fails are left out of the line with a warning, unless
/// fewer than two remain. Any other failure is fatal.
///
/// # Errors
/// Returns the first error of [`train_references`] or [`calibrate`].
pub fn train(
    reference: &SpectralDataset,
    calibration: &SpectralDataset,
    config: &Config,
) -> Result<TrainedModel> {
    config.validate()?;
    let references = train_references(reference, config)?;

    info!(
        "fitting amplitudes to {} calibration spectra of `{}`",
        calibration.len(),
        calibration.name()
    );
    let batch = ScalingFitter::from_config(&references.models(), config).fit_dataset(calibration);
    if batch.fits.len() < 2 && !batch.failures.is_empty() {
        let indices = batch
            .failures
            .iter()
            .map(|failure| failure.index.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::DegenerateCalibration(format!(
            "{} of {} calibration spectra of `{}` failed to fit (spectra {indices}), {} left",
            batch.failures.len(),
            calibration.len(),
            calibration.name(),
            batch.fits.len()
        )));
    }
    if !batch.failures.is_empty() {
        warn!(
            "{} of {} calibration spectra were left out of the calibration line",
            batch.failures.len(),
            calibration.len()
        );
    }
    let fits = batch
        .fits
        .iter()
        .map(|fit| (fit.time, fit.amplitudes))
        .collect::<Vec<_>>();
    let calibration = calibrate(&fits, config.initial_bromine_concentration)?;

    Ok(TrainedModel {
        references,
        calibration,
    })
}

impl TrainedModel {
    pub fn reference_models(&self) -> ReferenceModels {
        self.references.models()
    }

    pub fn predictor(&self, config: &Config) -> Predictor {
        Predictor::new(
            ScalingFitter::from_config(&self.reference_models(), config),
            self.calibration.line,
            config.initial_bromine_concentration,
            config.prediction,
        )
    }

    /// Concentrations of both species for every spectrum in `dataset`
    pub fn predict(&self, dataset: &SpectralDataset, config: &Config) -> Prediction {
        info!(
            "predicting concentrations for {} spectra of `{}`",
            dataset.len(),
            dataset.name()
        );
        self.predictor(config).predict(dataset)
    }
}

use log::{debug, info};
use ndarray::Array1;

use crate::config::{BromineGuess, Config, SolverSettings, TribromideGuess};
use crate::gaussian::{gaussian_sum, GaussianPeak};
use crate::minimisation::{CurveFit, FitReport};
use crate::model::{BromineModel, CompositeModel};
use crate::spectrum::{SpectralDataset, Spectrum, Window};
use crate::{Error, Result};

/// The absorption profile of one species as a fixed sum of Gaussian peaks
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceModel {
    peaks: Vec<GaussianPeak>,
}

impl ReferenceModel {
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if there are no peaks or any width is not positive.
    pub fn new(peaks: Vec<GaussianPeak>) -> Result<Self> {
        if peaks.is_empty() {
            return Err(Error::InvalidParameter(
                "a reference model needs at least one peak".to_owned(),
            ));
        }
        peaks.iter().try_for_each(GaussianPeak::validate)?;
        Ok(Self { peaks })
    }

    pub fn peaks(&self) -> &[GaussianPeak] {
        &self.peaks
    }

    /// Absorbance of the reference profile at `wavelength`
    pub fn evaluate(&self, wavelength: f64) -> f64 {
        gaussian_sum(wavelength, &self.peaks)
    }
}

/// The frozen shapes of both species
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceModels {
    /// Three peaks
    pub bromine: ReferenceModel,
    /// Two peaks
    pub tribromide: ReferenceModel,
}

/// The first stage: three Gaussians and a baseline fitted to a pure bromine spectrum
#[derive(Clone, Debug)]
pub struct BromineFit {
    pub model: ReferenceModel,
    /// Fitted offset, not carried into the frozen shape
    pub baseline: f64,
    pub report: FitReport,
}

/// The second stage: frozen bromine under a free amplitude plus two tribromide peaks
#[derive(Clone, Debug)]
pub struct TribromideFit {
    pub model: ReferenceModel,
    pub bromine_amplitude: f64,
    pub report: FitReport,
}

#[derive(Clone, Debug)]
pub struct ReferenceFits {
    pub bromine: BromineFit,
    pub tribromide: TribromideFit,
}

impl ReferenceFits {
    pub fn models(&self) -> ReferenceModels {
        ReferenceModels {
            bromine: self.bromine.model.clone(),
            tribromide: self.tribromide.model.clone(),
        }
    }
}

/// Fit three Gaussians on a constant baseline to a spectrum of pure bromine
///
/// # Errors
/// Returns [`Error::FitNonConvergence`] or [`Error::InvalidParameter`] if the fit fails or a
/// width leaves the positive axis, and [`Error::MalformedInput`] if `window` is empty.
pub fn fit_bromine(
    spectrum: &Spectrum<'_>,
    window: &Window,
    guess: &BromineGuess,
    solver: &SolverSettings,
) -> Result<BromineFit> {
    let (wavelengths, absorbance) = spectrum.windowed(window)?;
    let initial = guess
        .peaks
        .iter()
        .flat_map(|peak| [peak.height, peak.center, peak.width])
        .chain(std::iter::once(guess.baseline))
        .collect::<Array1<f64>>();

    let context = format!("bromine reference (spectrum {})", spectrum.index);
    let report =
        CurveFit::new(BromineModel, wavelengths, absorbance).solve(initial, solver, &context)?;
    let params = report.params.to_vec();

    let fit = BromineFit {
        model: ReferenceModel::new(BromineModel::peaks(&params))?,
        baseline: BromineModel::baseline(&params),
        report,
    };
    debug!(
        "bromine peaks {:?}, baseline {:.4e}, residual sum of squares {:.4e} after {} iterations",
        fit.model.peaks(),
        fit.baseline,
        fit.report.residual_sum_of_squares,
        fit.report.iterations
    );
    Ok(fit)
}

/// Fit the composite model, with `bromine` frozen, to a spectrum containing both species
///
/// # Errors
/// As [`fit_bromine`].
pub fn fit_tribromide(
    spectrum: &Spectrum<'_>,
    bromine: &ReferenceModel,
    window: &Window,
    guess: &TribromideGuess,
    solver: &SolverSettings,
) -> Result<TribromideFit> {
    let (wavelengths, absorbance) = spectrum.windowed(window)?;
    let initial = std::iter::once(guess.bromine_amplitude)
        .chain(
            guess
                .peaks
                .iter()
                .flat_map(|peak| [peak.height, peak.center, peak.width]),
        )
        .collect::<Array1<f64>>();

    let context = format!("tribromide reference (spectrum {})", spectrum.index);
    let report = CurveFit::new(CompositeModel::new(bromine.clone()), wavelengths, absorbance)
        .solve(initial, solver, &context)?;
    let params = report.params.to_vec();

    let fit = TribromideFit {
        model: ReferenceModel::new(CompositeModel::free_peaks(&params))?,
        bromine_amplitude: params[0],
        report,
    };
    debug!(
        "tribromide peaks {:?}, bromine amplitude {:.4}, residual sum of squares {:.4e} after {} iterations",
        fit.model.peaks(),
        fit.bromine_amplitude,
        fit.report.residual_sum_of_squares,
        fit.report.iterations
    );
    Ok(fit)
}

/// Learn both reference shapes from the training spectra selected in `config`
///
/// # Errors
/// Returns [`Error::MalformedInput`] if a selected spectrum is missing, otherwise any error of
/// [`fit_bromine`] or [`fit_tribromide`]. Every error is fatal: nothing downstream can run
/// without both shapes.
pub fn train_references(dataset: &SpectralDataset, config: &Config) -> Result<ReferenceFits> {
    let settings = &config.reference;
    let select = |index: usize| {
        dataset.spectrum(index).ok_or_else(|| {
            Error::MalformedInput(format!(
                "dataset `{}` has {} spectra, no spectrum at index {index}",
                dataset.name(),
                dataset.len()
            ))
        })
    };

    let bromine_spectrum = select(settings.bromine_spectrum)?;
    let tribromide_spectrum = select(
        settings
            .tribromide_spectrum
            .unwrap_or_else(|| dataset.len().saturating_sub(1)),
    )?;

    info!(
        "fitting bromine reference to spectrum {} of `{}`",
        bromine_spectrum.index,
        dataset.name()
    );
    let bromine = fit_bromine(
        &bromine_spectrum,
        &config.windows.bromine,
        &settings.bromine_guess,
        &config.solver,
    )?;

    info!(
        "fitting tribromide reference to spectrum {} of `{}`",
        tribromide_spectrum.index,
        dataset.name()
    );
    let tribromide = fit_tribromide(
        &tribromide_spectrum,
        &bromine.model,
        &config.windows.combined,
        &settings.tribromide_guess,
        &config.solver,
    )?;

    Ok(ReferenceFits {
        bromine,
        tribromide,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;

    use super::{fit_bromine, fit_tribromide, train_references, ReferenceFits, ReferenceModel};
    use crate::config::{BromineGuess, Config, SolverSettings, TribromideGuess};
    use crate::model::tests::{bromine_reference, tribromide_reference};
    use crate::spectrum::{SpectralDataset, Window};
    use crate::{Error, Result};

    const BASELINE: f64 = 0.015;
    const BROMINE_AMPLITUDE: f64 = 0.3;

    fn wavelengths() -> Vec<f64> {
        (200..=800).map(f64::from).collect()
    }

    /// A pure bromine spectrum followed by a bromine / tribromide mixture
    fn training_dataset() -> SpectralDataset {
        let axis = wavelengths();
        let bromine = bromine_reference();
        let tribromide = tribromide_reference();

        let pure = axis
            .iter()
            .map(|&wl| bromine.evaluate(wl) + BASELINE)
            .collect::<Vec<_>>();
        let mixed = axis
            .iter()
            .map(|&wl| BROMINE_AMPLITUDE * bromine.evaluate(wl) + tribromide.evaluate(wl))
            .collect::<Vec<_>>();

        SpectralDataset::from_columns("training", axis, vec![0.0, 1800.0], &[pure, mixed]).unwrap()
    }

    fn assert_peaks_match(fitted: &ReferenceModel, expected: &ReferenceModel) {
        for (fitted, expected) in fitted.peaks().iter().zip(expected.peaks()) {
            approx::assert_relative_eq!(fitted.height, expected.height, max_relative = 1e-3);
            approx::assert_relative_eq!(fitted.center, expected.center, max_relative = 1e-3);
            approx::assert_relative_eq!(fitted.width, expected.width, max_relative = 1e-3);
        }
    }

    #[test]
    fn bromine_shape_is_recovered_from_noise_free_spectrum() -> Result<()> {
        let dataset = training_dataset();
        let spectrum = dataset.spectrum(0).unwrap();

        let fit = fit_bromine(
            &spectrum,
            &Window::new(320.0, 650.0),
            &BromineGuess::default(),
            &SolverSettings::default(),
        )?;

        assert_eq!(fit.model.peaks().len(), 3);
        assert_peaks_match(&fit.model, &bromine_reference());
        approx::assert_relative_eq!(fit.baseline, BASELINE, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn tribromide_shape_is_recovered_from_noise_free_spectrum() -> Result<()> {
        let dataset = training_dataset();
        let spectrum = dataset.spectrum(1).unwrap();

        let fit = fit_tribromide(
            &spectrum,
            &bromine_reference(),
            &Window::new(360.0, 650.0),
            &TribromideGuess::default(),
            &SolverSettings::default(),
        )?;

        assert_eq!(fit.model.peaks().len(), 2);
        assert_peaks_match(&fit.model, &tribromide_reference());
        approx::assert_relative_eq!(fit.bromine_amplitude, BROMINE_AMPLITUDE, max_relative = 1e-3);
        Ok(())
    }

    #[test]
    fn reference_fits_are_deterministic() -> Result<()> {
        let dataset = training_dataset();
        let config = Config::default();

        let first = train_references(&dataset, &config)?;
        let second = train_references(&dataset, &config)?;

        let flatten = |fits: &ReferenceFits| -> Array1<f64> {
            let models = fits.models();
            models
                .bromine
                .peaks()
                .iter()
                .chain(models.tribromide.peaks())
                .flat_map(|p| [p.height, p.center, p.width])
                .collect()
        };
        for (a, b) in flatten(&first).iter().zip(flatten(&second).iter()) {
            approx::assert_relative_eq!(a, b, max_relative = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn training_uses_the_last_spectrum_for_tribromide_by_default() -> Result<()> {
        let fits = train_references(&training_dataset(), &Config::default())?;

        assert_eq!(fits.tribromide.report.wavelengths[0], 361.0);
        assert_eq!(fits.bromine.report.wavelengths[0], 321.0);
        approx::assert_relative_eq!(
            fits.tribromide.bromine_amplitude,
            BROMINE_AMPLITUDE,
            max_relative = 1e-3
        );
        Ok(())
    }

    #[test]
    fn missing_training_spectrum_is_malformed_input() {
        let mut config = Config::default();
        config.reference.tribromide_spectrum = Some(7);

        assert!(matches!(
            train_references(&training_dataset(), &config),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn bromine_fit_that_exhausts_its_budget_is_fatal() {
        let mut config = Config::default();
        config.solver.max_iters = 2;

        assert!(matches!(
            train_references(&training_dataset(), &config),
            Err(Error::FitNonConvergence { .. })
        ));
    }

    #[test]
    fn reference_models_need_peaks() {
        assert!(matches!(
            ReferenceModel::new(vec![]),
            Err(Error::InvalidParameter(_))
        ));
    }
}

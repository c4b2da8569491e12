use log::info;
use ndarray::Array1;
use ndarray_linalg::LeastSquaresSvd;

use crate::math::{count_distinct, vandermonde};
use crate::predictor::Inversion;
use crate::scaling::ScalingFitResult;
use crate::{Error, Result};

/// Linear map from tribromide molar concentration to fitted tribromide amplitude
///
/// $$
///     b = m [\mathrm{NaBr_3}] + c
/// $$
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationLine {
    /// Amplitude per mol/L
    pub slope: f64,
    pub intercept: f64,
}

impl CalibrationLine {
    /// Ordinary least-squares line through `(concentration, amplitude)` points
    ///
    /// # Errors
    /// Returns [`Error::DegenerateCalibration`] if the inputs differ in length, or there are fewer
    /// than two distinct finite concentrations, so no slope can be determined, or if the fitted
    /// slope is not finite or too small to invert.
    pub fn fit(concentrations: &[f64], amplitudes: &[f64]) -> Result<Self> {
        if concentrations.len() != amplitudes.len() {
            return Err(Error::DegenerateCalibration(format!(
                "{} concentrations but {} amplitudes",
                concentrations.len(),
                amplitudes.len()
            )));
        }
        if concentrations
            .iter()
            .chain(amplitudes)
            .any(|value| !value.is_finite())
        {
            return Err(Error::DegenerateCalibration(
                "calibration points must be finite".to_owned(),
            ));
        }
        let distinct = count_distinct(concentrations);
        if distinct < 2 {
            return Err(Error::DegenerateCalibration(format!(
                "a line needs at least two distinct concentrations, got {distinct} from {} points",
                concentrations.len()
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = concentrations.iter().sum::<f64>() / concentrations.len() as f64;
        let variance = concentrations
            .iter()
            .map(|c| (c - mean).powi(2))
            .sum::<f64>();
        if variance <= 0.0 {
            return Err(Error::DegenerateCalibration(
                "concentrations have zero variance".to_owned(),
            ));
        }

        let design = vandermonde(concentrations, 1)?;
        let solution = design
            .least_squares(&Array1::from(amplitudes.to_vec()))
            .map_err(|e| Error::DegenerateCalibration(e.to_string()))?
            .solution;
        let (intercept, slope) = (solution[0], solution[1]);

        let (min, max) = concentrations
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| {
                (lo.min(c), hi.max(c))
            });
        let largest_amplitude = amplitudes.iter().fold(0.0_f64, |acc, b| acc.max(b.abs()));
        // The line must move the amplitude by more than rounding over the calibrated range
        if !slope.is_finite()
            || slope.abs() * (max - min) <= f64::EPSILON * largest_amplitude.max(f64::MIN_POSITIVE)
        {
            return Err(Error::DegenerateCalibration(format!(
                "amplitudes do not change with concentration (slope {slope:e})"
            )));
        }

        Ok(Self { slope, intercept })
    }

    /// Amplitude predicted for `concentration`
    pub fn amplitude(&self, concentration: f64) -> f64 {
        self.slope.mul_add(concentration, self.intercept)
    }

    /// Concentration implied by a fitted tribromide `amplitude`
    pub fn concentration(&self, amplitude: f64, inversion: Inversion) -> f64 {
        match inversion {
            Inversion::SubtractIntercept => (amplitude - self.intercept) / self.slope,
            Inversion::ThroughOrigin => amplitude / self.slope,
        }
    }
}

/// One calibration spectrum: tribromide formed from consumed bromine, and its fitted amplitude
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationPoint {
    pub time: f64,
    /// mol/L
    pub concentration: f64,
    pub amplitude: f64,
}

/// The fitted line with the points it was fitted to
#[derive(Clone, Debug)]
pub struct Calibration {
    pub line: CalibrationLine,
    pub points: Vec<CalibrationPoint>,
}

/// Tribromide concentration formed when the bromine amplitude has fallen to `bromine_amplitude`
///
/// Each mole of bromine consumed forms one mole of tribromide.
pub fn tribromide_formed(initial_bromine_concentration: f64, bromine_amplitude: f64) -> f64 {
    initial_bromine_concentration * (1.0 - bromine_amplitude)
}

/// Calibrate fitted tribromide amplitude against the tribromide formed in a run that started with
/// `initial_bromine_concentration` of bromine
///
/// `fits` pairs each spectrum's capture time with its amplitudes.
///
/// # Errors
/// Returns [`Error::InvalidParameter`] for a non-positive initial concentration and
/// [`Error::DegenerateCalibration`] as [`CalibrationLine::fit`].
pub fn calibrate(
    fits: &[(f64, ScalingFitResult)],
    initial_bromine_concentration: f64,
) -> Result<Calibration> {
    if !(initial_bromine_concentration.is_finite() && initial_bromine_concentration > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "initial bromine concentration must be positive, got {initial_bromine_concentration}"
        )));
    }

    let points = fits
        .iter()
        .map(|(time, amplitudes)| CalibrationPoint {
            time: *time,
            concentration: tribromide_formed(initial_bromine_concentration, amplitudes.bromine),
            amplitude: amplitudes.tribromide,
        })
        .collect::<Vec<_>>();

    let concentrations = points.iter().map(|p| p.concentration).collect::<Vec<_>>();
    let amplitudes = points.iter().map(|p| p.amplitude).collect::<Vec<_>>();
    let line = CalibrationLine::fit(&concentrations, &amplitudes)?;
    info!(
        "calibration over {} spectra: slope {:.4} L/mol, intercept {:.4e}",
        points.len(),
        line.slope,
        line.intercept
    );

    Ok(Calibration { line, points })
}

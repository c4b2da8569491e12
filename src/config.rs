use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::gaussian::GaussianPeak;
use crate::predictor::Inversion;
use crate::scaling::WarmStart;
use crate::spectrum::Window;
use crate::{Error, Result};

/// Initial concentration of bromine in the calibration run, in mol/L
pub const DEFAULT_INITIAL_BROMINE_CONCENTRATION: f64 = 0.00342;

/// Run configuration
///
/// Every field has a default matching the Br2 / NaBr3 in acetonitrile system, so an empty TOML
/// document is a valid configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bromine concentration at the start of the calibration run (mol/L)
    pub initial_bromine_concentration: f64,
    pub windows: Windows,
    pub reference: ReferenceSettings,
    pub scaling: ScalingSettings,
    pub prediction: PredictionSettings,
    pub solver: SolverSettings,
    pub data: DataSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_bromine_concentration: DEFAULT_INITIAL_BROMINE_CONCENTRATION,
            windows: Windows::default(),
            reference: ReferenceSettings::default(),
            scaling: ScalingSettings::default(),
            prediction: PredictionSettings::default(),
            solver: SolverSettings::default(),
            data: DataSettings::default(),
        }
    }
}

impl Config {
    /// Read and validate a configuration file
    ///
    /// Relative data paths are resolved against the directory holding the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML for this structure, or
    /// fails [`Config::validate`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;
        if let Some(base) = path.parent() {
            config.data.resolve_relative_to(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the physical constants, windows and initial guesses
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_bromine_concentration.is_finite()
            && self.initial_bromine_concentration > 0.0)
        {
            return Err(Error::InvalidParameter(format!(
                "initial bromine concentration must be positive, got {}",
                self.initial_bromine_concentration
            )));
        }
        self.windows.bromine.validate()?;
        self.windows.combined.validate()?;
        self.reference.validate()?;
        if !(self.prediction.time_divisor.is_finite() && self.prediction.time_divisor > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "time divisor must be positive, got {}",
                self.prediction.time_divisor
            )));
        }
        self.solver.validate()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Windows {
    /// Region containing only the bromine absorption, used for the first reference fit
    pub bromine: Window,
    /// Region used for the composite reference fit and every scaling fit
    pub combined: Window,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            bromine: Window::new(320.0, 650.0),
            combined: Window::new(360.0, 650.0),
        }
    }
}

/// Which training spectra the reference shapes are learnt from, and where the fits start
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceSettings {
    /// Index of the pure bromine spectrum in the reference dataset
    pub bromine_spectrum: usize,
    /// Index of the mixed bromine / tribromide spectrum. The last spectrum when unset.
    pub tribromide_spectrum: Option<usize>,
    pub bromine_guess: BromineGuess,
    pub tribromide_guess: TribromideGuess,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            bromine_spectrum: 0,
            tribromide_spectrum: None,
            bromine_guess: BromineGuess::default(),
            tribromide_guess: TribromideGuess::default(),
        }
    }
}

impl ReferenceSettings {
    fn validate(&self) -> Result<()> {
        self.bromine_guess
            .peaks
            .iter()
            .chain(self.tribromide_guess.peaks.iter())
            .try_for_each(GaussianPeak::validate)
    }
}

/// Starting point for the three-peak bromine fit
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BromineGuess {
    pub peaks: [GaussianPeak; 3],
    pub baseline: f64,
}

impl Default for BromineGuess {
    fn default() -> Self {
        Self {
            peaks: [
                GaussianPeak {
                    height: 3.0,
                    center: 280.0,
                    width: 30.0,
                },
                GaussianPeak {
                    height: 0.7,
                    center: 390.0,
                    width: 20.0,
                },
                GaussianPeak {
                    height: 0.2,
                    center: 460.0,
                    width: 20.0,
                },
            ],
            baseline: 0.02,
        }
    }
}

/// Starting point for the composite fit: bromine amplitude and the two tribromide peaks
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TribromideGuess {
    pub bromine_amplitude: f64,
    pub peaks: [GaussianPeak; 2],
}

impl Default for TribromideGuess {
    fn default() -> Self {
        Self {
            bromine_amplitude: 0.3,
            peaks: [
                GaussianPeak {
                    height: 1.0,
                    center: 400.0,
                    width: 20.0,
                },
                GaussianPeak {
                    height: 2.5,
                    center: 340.0,
                    width: 20.0,
                },
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalingSettings {
    /// Starting `(bromine, tribromide)` amplitudes
    pub initial_amplitudes: [f64; 2],
    pub warm_start: WarmStart,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            initial_amplitudes: [1.0, 1.0],
            warm_start: WarmStart::Off,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictionSettings {
    pub inversion: Inversion,
    /// Capture times are divided by this value, 60 converts seconds to minutes
    pub time_divisor: f64,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            inversion: Inversion::SubtractIntercept,
            time_divisor: 60.0,
        }
    }
}

/// Levenberg-Marquardt termination and damping parameters
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    pub max_iters: u64,
    /// Relative reduction in the sum of squares below which the fit has converged
    pub ftol: f64,
    /// Relative step length below which the fit has converged
    pub xtol: f64,
    pub initial_damping: f64,
    /// Attach the terminal logger to every solve
    pub observe: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1.49e-8,
            xtol: 1.49e-8,
            initial_damping: 1e-3,
            observe: false,
        }
    }
}

impl SolverSettings {
    fn validate(&self) -> Result<()> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if self.max_iters == 0
            || !positive(self.ftol)
            || !positive(self.xtol)
            || !positive(self.initial_damping)
        {
            return Err(Error::InvalidParameter(format!(
                "solver settings must be positive, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Input files for the command line driver
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSettings {
    /// Training spectra for the reference shapes
    pub reference: PathBuf,
    /// Calibration run of known initial bromine concentration
    pub calibration: PathBuf,
    /// Preamble lines before the header row of an instrument export
    pub skip_rows: usize,
    pub runs: Vec<Run>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            reference: PathBuf::from("TRAIN1.TXT"),
            calibration: PathBuf::from("TRAIN2.TXT"),
            skip_rows: 5,
            runs: vec![],
        }
    }
}

impl DataSettings {
    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.reference);
        resolve(&mut self.calibration);
        for run in &mut self.runs {
            resolve(&mut run.input);
            resolve(&mut run.output);
        }
    }
}

/// A dataset to predict concentrations for, and where to write them
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Run {
    pub input: PathBuf,
    pub output: PathBuf,
}

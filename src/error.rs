use thiserror::Error;

/// Failures raised while loading spectra, fitting models or calibrating.
#[derive(Error, Debug)]
pub enum Error {
    /// The solver did not reach a minimum for the named fit.
    #[error("fit of {context} did not converge: {reason}")]
    FitNonConvergence { context: String, reason: String },

    #[error("calibration is degenerate: {0}")]
    DegenerateCalibration(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse delimited data: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn non_convergence(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::FitNonConvergence {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

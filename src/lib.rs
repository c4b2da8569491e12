#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

extern crate blas_src;

pub mod calibration;
pub mod config;
mod error;
pub mod gaussian;
pub mod io;
pub mod math;
pub mod minimisation;
pub mod model;
pub mod pipeline;
pub mod predictor;
pub mod reference;
pub mod scaling;
pub mod spectrum;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

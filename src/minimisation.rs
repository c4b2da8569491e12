use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{
    ArgminError, Executor, IterState, Jacobian, Operator, Problem, Solver, State,
    TerminationReason, TerminationStatus, KV,
};
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::Solve;
use serde::{Deserialize, Serialize};

use crate::config::SolverSettings;
use crate::model::SpectralModel;
use crate::{Error, Result};

/// Smallest and largest damping factors the solver will use
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

type LmState = IterState<Array1<f64>, (), Array2<f64>, (), f64>;

/// Least-squares fit of a [`SpectralModel`] to one windowed spectrum
///
/// The residual vector is the model prediction minus the observed absorbance at each wavelength,
/// and the Jacobian is the (num_wavelengths x num_params) matrix of model partial derivatives.
#[derive(Clone, Debug)]
pub struct CurveFit<M> {
    model: M,
    wavelengths: Array1<f64>,
    absorbance: Array1<f64>,
}

/// Outcome of a converged fit
#[derive(Clone, Debug)]
pub struct FitReport {
    pub params: Array1<f64>,
    pub wavelengths: Array1<f64>,
    pub observed: Array1<f64>,
    /// Model prediction at `params` on `wavelengths`
    pub fitted: Array1<f64>,
    pub residual_sum_of_squares: f64,
    pub iterations: u64,
}

impl<M: SpectralModel> CurveFit<M> {
    pub fn new(
        model: M,
        wavelengths: ArrayView1<'_, f64>,
        absorbance: ArrayView1<'_, f64>,
    ) -> Self {
        Self {
            model,
            wavelengths: wavelengths.to_owned(),
            absorbance: absorbance.to_owned(),
        }
    }

    fn compute(&self, params: &[f64]) -> Array1<f64> {
        self.wavelengths
            .mapv(|wavelength| self.model.evaluate(wavelength, params))
    }

    fn jacobian_matrix(&self, params: &[f64]) -> Array2<f64> {
        let mut jacobian = Array2::zeros((self.wavelengths.len(), self.model.num_params()));
        let mut gradient = vec![0.0; self.model.num_params()];
        for (mut row, &wavelength) in jacobian.rows_mut().into_iter().zip(&self.wavelengths) {
            self.model.gradient(wavelength, params, &mut gradient);
            row.assign(&ArrayView1::from(gradient.as_slice()));
        }
        jacobian
    }
}

impl<M: SpectralModel + Clone> CurveFit<M> {
    /// Run Levenberg-Marquardt from `initial_parameters`
    ///
    /// `context` names the fit in any error raised.
    ///
    /// # Errors
    /// - [`Error::InvalidParameter`] if the initial or fitted parameters cannot be evaluated
    /// (a peak width at or below zero), or the parameter vector has the wrong length.
    /// - [`Error::FitNonConvergence`] if the solver fails, stops on anything but convergence, or
    /// the cost is not finite.
    pub fn solve(
        &self,
        initial_parameters: Array1<f64>,
        settings: &SolverSettings,
        context: &str,
    ) -> Result<FitReport> {
        if initial_parameters.len() != self.model.num_params() {
            return Err(Error::InvalidParameter(format!(
                "{context} takes {} parameters, got {}",
                self.model.num_params(),
                initial_parameters.len()
            )));
        }
        self.model.validate(&initial_parameters.to_vec())?;

        let solver = LevenbergMarquardt::new(settings);
        let mut executor = Executor::new(self.clone(), solver)
            .configure(|state| state.param(initial_parameters).max_iters(settings.max_iters));
        if settings.observe {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }

        let res = executor
            .run()
            .map_err(|e| Error::non_convergence(context, e))?;
        let state = res.state();

        match state.get_termination_reason() {
            Some(TerminationReason::SolverConverged | TerminationReason::TargetCostReached) => {}
            reason => {
                return Err(Error::non_convergence(
                    context,
                    format!("solver stopped with {reason:?} after {} iterations", state.get_iter()),
                ))
            }
        }

        let params = state
            .get_param()
            .cloned()
            .ok_or_else(|| Error::non_convergence(context, "solver returned no parameters"))?;
        let residual_sum_of_squares = state.get_cost();
        if !residual_sum_of_squares.is_finite() {
            return Err(Error::non_convergence(context, "sum of squares is not finite"));
        }
        let param_slice = params.to_vec();
        self.model.validate(&param_slice)?;

        Ok(FitReport {
            fitted: self.compute(&param_slice),
            params,
            wavelengths: self.wavelengths.clone(),
            observed: self.absorbance.clone(),
            residual_sum_of_squares,
            iterations: state.get_iter(),
        })
    }
}

impl<M: SpectralModel> Operator for CurveFit<M> {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.compute(&p.to_vec()) - &self.absorbance)
    }
}

impl<M: SpectralModel> Jacobian for CurveFit<M> {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        Ok(self.jacobian_matrix(&p.to_vec()))
    }
}

fn sum_of_squares(residuals: &Array1<f64>) -> f64 {
    residuals.dot(residuals)
}

/// Levenberg-Marquardt with Marquardt's diagonal scaling
///
/// Each iteration solves `(JᵀJ + λ diag(JᵀJ)) δ = -Jᵀr` and accepts the step only if it lowers the
/// sum of squares, shrinking λ on success and growing it otherwise. The fit has converged when an
/// accepted step changes the cost or the parameters by less than the configured tolerances, or when
/// no damped step lowers the cost at all.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LevenbergMarquardt {
    damping: f64,
    ftol: f64,
    xtol: f64,
    converged: bool,
}

impl LevenbergMarquardt {
    pub const fn new(settings: &SolverSettings) -> Self {
        Self {
            damping: settings.initial_damping,
            ftol: settings.ftol,
            xtol: settings.xtol,
            converged: false,
        }
    }
}

impl<O> Solver<O, LmState> for LevenbergMarquardt
where
    O: Operator<Param = Array1<f64>, Output = Array1<f64>>
        + Jacobian<Param = Array1<f64>, Jacobian = Array2<f64>>,
{
    const NAME: &'static str = "Levenberg-Marquardt";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), argmin::core::Error> {
        let param = state.get_param().ok_or_else(|| ArgminError::NotInitialized {
            text: "Levenberg-Marquardt requires an initial parameter vector".to_owned(),
        })?;
        let cost = sum_of_squares(&problem.apply(param)?);
        if !cost.is_finite() {
            return Err(ArgminError::InvalidParameter {
                text: "sum of squares at the initial parameters is not finite".to_owned(),
            }
            .into());
        }
        Ok((state.cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), argmin::core::Error> {
        let param = state
            .get_param()
            .ok_or_else(|| ArgminError::NotInitialized {
                text: "Levenberg-Marquardt lost its parameter vector".to_owned(),
            })?
            .clone();
        let cost = state.get_cost();

        let residuals = problem.apply(&param)?;
        let jacobian = problem.jacobian(&param)?;
        let normal = jacobian.t().dot(&jacobian);
        let descent = -jacobian.t().dot(&residuals);
        let scale = normal.diag().mapv(|d| d.max(MIN_DAMPING));

        loop {
            let mut damped = normal.clone();
            for (ii, s) in scale.iter().enumerate() {
                damped[[ii, ii]] += self.damping * s;
            }
            let step = damped.solve(&descent)?;
            let candidate = &param + &step;
            let candidate_cost = sum_of_squares(&problem.apply(&candidate)?);

            if candidate_cost.is_finite() && candidate_cost < cost {
                self.damping = (self.damping / 10.0).max(MIN_DAMPING);

                let actual = cost - candidate_cost;
                let predicted = cost - sum_of_squares(&(&residuals + &jacobian.dot(&step)));
                let step_norm = step.dot(&step).sqrt();
                let param_norm = candidate.dot(&candidate).sqrt();
                if (actual <= self.ftol * cost && predicted.abs() <= self.ftol * cost)
                    || step_norm <= self.xtol * (param_norm + self.xtol)
                {
                    self.converged = true;
                }
                return Ok((state.param(candidate).cost(candidate_cost), None));
            }

            self.damping *= 10.0;
            if self.damping > MAX_DAMPING {
                // Even a vanishing step along the gradient raises the cost
                self.converged = true;
                return Ok((state.param(param).cost(cost), None));
            }
        }
    }

    fn terminate(&mut self, _state: &LmState) -> TerminationStatus {
        if self.converged {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}

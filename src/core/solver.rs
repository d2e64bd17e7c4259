use log::info;
use serde::Serialize;
use thiserror::Error;

use super::engine::run_projection;
use super::types::{ParameterError, SimulationParameters, SimulationResult};

/// Search failure, kept distinct from a legitimate small answer: callers can
/// tell "nothing in range sustains the rules" from "the search ran out of
/// iterations".
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SolveError {
    #[error(transparent)]
    InvalidParameter(#[from] ParameterError),
    #[error("no solution bracketed by [{low}, {high}]")]
    NotBracketed { low: f64, high: f64 },
    #[error("no convergence after {iterations} iterations (bracket width {bracket_width})")]
    MaxIterations { iterations: u32, bracket_width: f64 },
}

/// Bounds and stopping rules for a bisection search.
#[derive(Debug, Clone, Copy)]
pub struct SolveConfig {
    pub search_min: f64,
    pub search_max: f64,
    /// Bracket-width convergence threshold, in the currency unit.
    pub tolerance: f64,
    /// Relative half-width of the self-consistency band: a probe converges
    /// when its terminal balance lands within `probe * (1 ± band)`.
    pub relative_band: f64,
    pub max_iterations: u32,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            search_min: 0.0,
            search_max: 1e10,
            tolerance: 1e-6,
            relative_band: 1e-5,
            max_iterations: 1000,
        }
    }
}

/// One probe of the search, recorded for display.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub iteration: u32,
    pub low: f64,
    pub high: f64,
    pub probe: f64,
    pub output: f64,
}

/// Solved capital plus the trajectory re-run at the solution.
#[derive(Debug, Clone)]
pub struct CapitalSolution {
    pub required_capital: f64,
    pub terminal_balance: f64,
    pub withdrawal_ratio: f64,
    pub iterations: Vec<SolveIteration>,
    pub trajectory: SimulationResult,
}

/// One oracle evaluation: the scalar the search compares, plus whether the
/// underlying run died before the horizon.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeOutcome {
    pub output: f64,
    pub depleted: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Probe {
    Below,
    Within,
    Above,
}

pub(crate) struct BisectRun {
    pub value: f64,
    pub iterations: Vec<SolveIteration>,
}

/// Find the smallest initial capital whose projection sustains the
/// withdrawal rules through the whole horizon. The oracle is monotonic
/// non-decreasing in capital for sensible rule sets (a precondition the
/// caller owns); the search converges on the self-consistent capital, the
/// point where the terminal balance reproduces the starting corpus.
pub fn solve_required_capital(
    params: &SimulationParameters,
    config: &SolveConfig,
) -> Result<CapitalSolution, SolveError> {
    params.validate()?;
    validate_config(config)?;

    let oracle = |capital: f64| {
        let result = run_projection(&SimulationParameters {
            initial_capital: capital,
            ..params.clone()
        });
        ProbeOutcome {
            output: result.terminal_balance(),
            depleted: result.terminated_early,
        }
    };

    let run = bisect(oracle, self_consistent(config.relative_band), config)?;

    let trajectory = run_projection(&SimulationParameters {
        initial_capital: run.value,
        ..params.clone()
    });
    info!(
        "required capital {:.6} after {} probes (terminal balance {:.6})",
        run.value,
        run.iterations.len(),
        trajectory.terminal_balance()
    );

    Ok(CapitalSolution {
        required_capital: run.value,
        terminal_balance: trajectory.terminal_balance(),
        withdrawal_ratio: withdrawal_ratio(params, run.value),
        iterations: run.iterations,
        trajectory,
    })
}

/// Initial outflow rate at the solved capital: recurring plus the per-period
/// share of the large withdrawal, over the corpus.
fn withdrawal_ratio(params: &SimulationParameters, capital: f64) -> f64 {
    if capital <= f64::EPSILON {
        return 0.0;
    }
    let w = &params.withdrawals;
    (w.recurring + w.big_amount / w.big_interval as f64) / capital
}

/// Self-consistency classification: a depleted run is always short of the
/// target; otherwise the terminal balance is compared against the probe's
/// relative band.
pub(crate) fn self_consistent(band: f64) -> impl Fn(f64, ProbeOutcome) -> Probe {
    move |probe, outcome| {
        if outcome.depleted {
            return Probe::Below;
        }
        if outcome.output > probe * (1.0 + band) {
            Probe::Above
        } else if outcome.output < probe * (1.0 - band) {
            Probe::Below
        } else {
            Probe::Within
        }
    }
}

/// Classification against an explicit target value with an absolute band.
/// Exercised by the contribution-sizing cross-checks; the production sizing
/// path uses the exact closed form instead.
#[cfg(test)]
pub(crate) fn against_target(target: f64, tol: f64) -> impl Fn(f64, ProbeOutcome) -> Probe {
    move |_, outcome| {
        if outcome.depleted || outcome.output < target - tol {
            Probe::Below
        } else if outcome.output > target + tol {
            Probe::Above
        } else {
            Probe::Within
        }
    }
}

/// Bounded bisection over a monotonic oracle. Both bounds are evaluated
/// first: a search whose bounds do not straddle the target is reported as
/// not bracketed rather than silently extrapolated, and a bound that is
/// already within the band is returned as-is.
pub(crate) fn bisect<F, C>(
    mut eval: F,
    classify: C,
    config: &SolveConfig,
) -> Result<BisectRun, SolveError>
where
    F: FnMut(f64) -> ProbeOutcome,
    C: Fn(f64, ProbeOutcome) -> Probe,
{
    let mut iterations = Vec::new();

    let low_outcome = eval(config.search_min);
    match classify(config.search_min, low_outcome) {
        Probe::Within => {
            return Ok(BisectRun {
                value: config.search_min,
                iterations,
            });
        }
        Probe::Above => {
            return Err(SolveError::NotBracketed {
                low: config.search_min,
                high: config.search_max,
            });
        }
        Probe::Below => {}
    }

    let high_outcome = eval(config.search_max);
    match classify(config.search_max, high_outcome) {
        Probe::Within => {
            return Ok(BisectRun {
                value: config.search_max,
                iterations,
            });
        }
        Probe::Below => {
            return Err(SolveError::NotBracketed {
                low: config.search_min,
                high: config.search_max,
            });
        }
        Probe::Above => {}
    }

    let mut low = config.search_min;
    let mut high = config.search_max;

    for iteration in 1..=config.max_iterations {
        let probe = (low + high) / 2.0;
        let outcome = eval(probe);
        iterations.push(SolveIteration {
            iteration,
            low,
            high,
            probe,
            output: outcome.output,
        });

        match classify(probe, outcome) {
            Probe::Within => {
                return Ok(BisectRun {
                    value: probe,
                    iterations,
                });
            }
            Probe::Above => high = probe,
            Probe::Below => low = probe,
        }

        // On bracket collapse, return the known-feasible side: `high` always
        // holds the last probe that met or exceeded the target.
        if high - low <= config.tolerance {
            return Ok(BisectRun {
                value: high,
                iterations,
            });
        }
    }

    Err(SolveError::MaxIterations {
        iterations: config.max_iterations,
        bracket_width: high - low,
    })
}

fn validate_config(config: &SolveConfig) -> Result<(), ParameterError> {
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(ParameterError::new("search_bounds", "must be finite"));
    }
    if config.search_max <= config.search_min {
        return Err(ParameterError::new(
            "search_max",
            "must be greater than search_min",
        ));
    }
    if config.search_min < 0.0 {
        return Err(ParameterError::new("search_min", "must be >= 0"));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(ParameterError::new("tolerance", "must be > 0"));
    }
    if !config.relative_band.is_finite() || config.relative_band <= 0.0 {
        return Err(ParameterError::new("relative_band", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(ParameterError::new("max_iterations", "must be > 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::project;
    use crate::core::types::{
        GenerationalDivision, RateRegime, RegimeSchedule, WithdrawalRules,
    };

    fn regime(annual_return: f64, inflation: f64, fees: f64) -> RateRegime {
        RateRegime {
            annual_return,
            inflation,
            fees,
        }
    }

    fn perpetual_params() -> SimulationParameters {
        SimulationParameters {
            initial_capital: 0.0,
            regimes: RegimeSchedule {
                current: regime(0.15, 0.07, 0.01),
                mature: regime(0.10, 0.05, 0.01),
                switch_period: Some(50),
            },
            withdrawals: WithdrawalRules {
                recurring: 0.3,
                start_period: 0,
                big_amount: 6.0,
                big_interval: 10,
                big_start_period: 0,
                growth_rate: 0.0,
                tax_rate: 0.15,
            },
            division: Some(GenerationalDivision {
                interval: 27,
                kids: 2.0,
                inheritance_tax_rate: 0.0,
            }),
            horizon: 1000,
        }
    }

    fn simple_params(recurring: f64) -> SimulationParameters {
        SimulationParameters {
            initial_capital: 0.0,
            regimes: RegimeSchedule::single(regime(0.10, 0.05, 0.005)),
            withdrawals: WithdrawalRules {
                recurring,
                big_interval: 10,
                tax_rate: 0.10,
                ..WithdrawalRules::none()
            },
            division: None,
            horizon: 1000,
        }
    }

    /// The solved capital must sustain the rules through the whole horizon:
    /// re-projecting at the solution never depletes and ends non-negative.
    fn assert_sustains(params: &SimulationParameters, solution: &CapitalSolution) {
        let check = project(&SimulationParameters {
            initial_capital: solution.required_capital,
            ..params.clone()
        })
        .expect("must project");

        assert!(!check.terminated_early, "solved capital must survive");
        assert!(check.terminal_balance() >= 0.0);
    }

    #[test]
    fn solves_the_reference_perpetual_scenario() {
        let params = perpetual_params();
        let solution =
            solve_required_capital(&params, &SolveConfig::default()).expect("must solve");

        assert!(solution.required_capital > 1.0);
        assert!(solution.required_capital < 10_000.0);
        assert!(!solution.iterations.is_empty());
        assert!(solution.withdrawal_ratio > 0.0);
        assert_sustains(&params, &solution);
    }

    #[test]
    fn solved_capital_sustains_across_rule_sets() {
        let cases = [
            simple_params(0.25),
            simple_params(1.0),
            {
                let mut p = perpetual_params();
                p.withdrawals.growth_rate = 0.005;
                p.division = None;
                p
            },
        ];

        for params in cases {
            let solution =
                solve_required_capital(&params, &SolveConfig::default()).expect("must solve");
            assert_sustains(&params, &solution);
        }
    }

    #[test]
    fn short_horizons_converge_inside_the_self_consistency_band() {
        // Over a few decades the terminal balance is a tame function of the
        // starting capital, so the relative band is reachable and the solved
        // value reproduces itself to within the configured tolerances.
        let config = SolveConfig::default();
        let cases = [
            SimulationParameters {
                horizon: 30,
                regimes: RegimeSchedule::single(regime(0.06, 0.02, 0.0)),
                ..simple_params(1.0)
            },
            SimulationParameters {
                horizon: 40,
                regimes: RegimeSchedule::single(regime(0.05, 0.03, 0.005)),
                ..simple_params(0.4)
            },
            SimulationParameters {
                horizon: 25,
                regimes: RegimeSchedule {
                    current: regime(0.07, 0.03, 0.0),
                    mature: regime(0.05, 0.02, 0.0),
                    switch_period: Some(10),
                },
                ..simple_params(0.8)
            },
        ];

        for params in cases {
            let solution = solve_required_capital(&params, &config).expect("must solve");
            assert_sustains(&params, &solution);
            let slack =
                solution.required_capital * config.relative_band + config.tolerance * 10.0;
            assert!(
                (solution.terminal_balance - solution.required_capital).abs() <= slack,
                "terminal {} drifted from capital {}",
                solution.terminal_balance,
                solution.required_capital
            );
        }
    }

    #[test]
    fn heavier_withdrawals_need_more_capital() {
        let light = solve_required_capital(&simple_params(0.25), &SolveConfig::default())
            .expect("must solve");
        let heavy = solve_required_capital(&simple_params(1.0), &SolveConfig::default())
            .expect("must solve");
        assert!(heavy.required_capital > light.required_capital);
    }

    #[test]
    fn narrow_bounds_report_not_bracketed() {
        let config = SolveConfig {
            search_max: 1.0,
            ..SolveConfig::default()
        };
        let err = solve_required_capital(&perpetual_params(), &config).expect_err("must fail");
        assert_eq!(
            err,
            SolveError::NotBracketed {
                low: 0.0,
                high: 1.0
            }
        );
    }

    #[test]
    fn exhausted_iterations_report_failure_not_a_guess() {
        let config = SolveConfig {
            max_iterations: 2,
            tolerance: 1e-12,
            ..SolveConfig::default()
        };
        let err = solve_required_capital(&perpetual_params(), &config).expect_err("must fail");
        assert!(matches!(err, SolveError::MaxIterations { iterations: 2, .. }));
    }

    #[test]
    fn zero_withdrawals_need_almost_nothing() {
        let mut params = simple_params(0.0);
        params.withdrawals = WithdrawalRules::none();
        params.horizon = 100;
        let solution =
            solve_required_capital(&params, &SolveConfig::default()).expect("must solve");
        assert!(solution.required_capital < 1e-3);
    }

    #[test]
    fn solution_carries_the_trajectory_for_display() {
        let params = simple_params(0.5);
        let solution =
            solve_required_capital(&params, &SolveConfig::default()).expect("must solve");
        assert_eq!(
            solution.trajectory.periods.len(),
            params.horizon as usize + 1
        );
        assert_eq!(
            solution.trajectory.periods[0].closing_balance,
            solution.required_capital
        );
    }

    #[test]
    fn rejects_malformed_search_configs() {
        let params = simple_params(0.5);
        for config in [
            SolveConfig {
                search_max: -1.0,
                ..SolveConfig::default()
            },
            SolveConfig {
                tolerance: 0.0,
                ..SolveConfig::default()
            },
            SolveConfig {
                max_iterations: 0,
                ..SolveConfig::default()
            },
            SolveConfig {
                search_min: f64::NAN,
                ..SolveConfig::default()
            },
        ] {
            assert!(matches!(
                solve_required_capital(&params, &config),
                Err(SolveError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn invalid_simulation_parameters_surface_through_the_solver() {
        let mut params = simple_params(0.5);
        params.withdrawals.big_interval = 0;
        assert!(matches!(
            solve_required_capital(&params, &SolveConfig::default()),
            Err(SolveError::InvalidParameter(_))
        ));
    }

    #[test]
    fn generic_bisection_hits_an_explicit_target() {
        // f(x) = 3x, target 150 -> x = 50.
        let config = SolveConfig {
            search_max: 1_000.0,
            ..SolveConfig::default()
        };
        let run = bisect(
            |x| ProbeOutcome {
                output: 3.0 * x,
                depleted: false,
            },
            against_target(150.0, 1e-9),
            &config,
        )
        .expect("must solve");
        assert!((run.value - 50.0).abs() <= 1e-6);
    }
}

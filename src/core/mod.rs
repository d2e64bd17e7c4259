mod engine;
mod sip;
mod solver;
mod types;

pub use engine::project;
pub use sip::{SipPlan, SipProjection, SipSolution, accumulate, required_contribution};
pub use solver::{CapitalSolution, SolveConfig, SolveError, SolveIteration, solve_required_capital};
pub use types::{
    GenerationalDivision, ParameterError, PeriodEvent, PeriodSnapshot, RateRegime, RegimeSchedule,
    SimulationParameters, SimulationResult, WithdrawalRules,
};

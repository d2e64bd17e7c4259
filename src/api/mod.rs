use axum::{
    Router,
    extract::{Json, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    CapitalSolution, GenerationalDivision, PeriodSnapshot, RateRegime, RegimeSchedule,
    SimulationParameters, SimulationResult, SipPlan, SolveConfig, SolveError, SolveIteration,
    WithdrawalRules, project, required_contribution, solve_required_capital,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliMode {
    /// Solve for the smallest sustainable starting corpus.
    Solve,
    /// Project a fixed starting corpus through the horizon.
    Project,
    /// Size the accumulation-phase contribution for a target corpus.
    Sip,
}

/// All rates are taken in percent and divided by 100 exactly once, in
/// `build_params`; monetary amounts are in crores throughout.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "corpus",
    about = "Deterministic corpus projection and sizing (perpetual withdrawals, regime switch, generational division)"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = CliMode::Solve)]
    mode: CliMode,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Starting corpus in crores (project mode)"
    )]
    initial_capital: f64,
    #[arg(long, default_value_t = 14.0, help = "Nominal annual return in percent")]
    annual_return: f64,
    #[arg(long, default_value_t = 7.0, help = "Annual inflation in percent")]
    inflation: f64,
    #[arg(long, default_value_t = 1.0, help = "Annual fee drag in percent")]
    fees: f64,
    #[arg(
        long,
        help = "Period (1-based) at which the mature regime takes effect; omit to never switch"
    )]
    regime_switch_period: Option<u32>,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Mature-regime nominal annual return in percent"
    )]
    mature_return: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Mature-regime annual inflation in percent"
    )]
    mature_inflation: f64,
    #[arg(long, help = "Mature-regime fee drag in percent; defaults to --fees")]
    mature_fees: Option<f64>,
    #[arg(
        long,
        default_value_t = 0.3,
        help = "Recurring withdrawal per period in crores"
    )]
    annual_withdrawal: f64,
    #[arg(
        long,
        default_value_t = 0,
        help = "First period (1-based) of recurring withdrawals; 0 = immediate"
    )]
    withdrawal_start_period: u32,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Large periodic withdrawal amount in crores"
    )]
    big_withdrawal: f64,
    #[arg(long, default_value_t = 10, help = "Periods between large withdrawals")]
    big_withdrawal_interval: u32,
    #[arg(
        long,
        default_value_t = 0,
        help = "First period of large withdrawals; 0 = immediate"
    )]
    big_withdrawal_start_period: u32,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Real growth of both withdrawal amounts in percent per period"
    )]
    withdrawal_growth: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Flat tax on withdrawals in percent"
    )]
    withdrawal_tax: f64,
    #[arg(
        long,
        help = "Periods between generational divisions of the corpus; omit to disable"
    )]
    generation_interval: Option<u32>,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Division factor applied to the corpus each generation"
    )]
    kids: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Inheritance tax on the post-division corpus in percent"
    )]
    inheritance_tax: f64,
    #[arg(long, default_value_t = 1000, help = "Projection horizon in periods")]
    horizon: u32,
    #[arg(long, default_value_t = 0.0, help = "Lower search bound in crores")]
    search_min: f64,
    #[arg(long, default_value_t = 1e10, help = "Upper search bound in crores")]
    search_max: f64,
    #[arg(
        long,
        default_value_t = 1e-6,
        help = "Bracket-width convergence tolerance in crores"
    )]
    tolerance: f64,
    #[arg(long, default_value_t = 1000)]
    max_iterations: u32,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Annual step-up of the SIP contribution in percent"
    )]
    sip_step_up: f64,
    #[arg(long, default_value_t = 31, help = "Accumulation years for SIP sizing")]
    sip_years: u32,
    #[arg(
        long,
        help = "Target real corpus for SIP sizing in crores; defaults to the solved required capital"
    )]
    sip_target: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum SensitivityVariable {
    #[serde(alias = "return", alias = "annualReturn")]
    AnnualReturn,
    Inflation,
}

/// One scenario over the wire. Every field is optional; omitted fields fall
/// back to the CLI defaults. Rates are percent, amounts crores, matching the
/// CLI flags field for field.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    initial_capital: Option<f64>,
    annual_return: Option<f64>,
    inflation: Option<f64>,
    fees: Option<f64>,
    regime_switch_period: Option<u32>,
    mature_return: Option<f64>,
    mature_inflation: Option<f64>,
    mature_fees: Option<f64>,
    annual_withdrawal: Option<f64>,
    withdrawal_start_period: Option<u32>,
    big_withdrawal: Option<f64>,
    big_withdrawal_interval: Option<u32>,
    big_withdrawal_start_period: Option<u32>,
    withdrawal_growth: Option<f64>,
    withdrawal_tax: Option<f64>,
    generation_interval: Option<u32>,
    kids: Option<f64>,
    inheritance_tax: Option<f64>,
    horizon: Option<u32>,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
    sip_step_up: Option<f64>,
    sip_years: Option<u32>,
    sip_target: Option<f64>,
    vary: Option<SensitivityVariable>,
    vary_min: Option<f64>,
    vary_max: Option<f64>,
    vary_steps: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    terminal_balance: f64,
    terminated_early: bool,
    depletion_period: Option<u32>,
    total_withdrawn: f64,
    total_withdrawal_tax: f64,
    total_inheritance_tax: f64,
    periods: Vec<PeriodSnapshot>,
}

impl From<SimulationResult> for ProjectResponse {
    fn from(result: SimulationResult) -> Self {
        Self {
            terminal_balance: result.terminal_balance(),
            terminated_early: result.terminated_early,
            depletion_period: result.depletion_period(),
            total_withdrawn: result.total_withdrawn(),
            total_withdrawal_tax: result.total_withdrawal_tax(),
            total_inheritance_tax: result.total_inheritance_tax(),
            periods: result.periods,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveResponse {
    required_capital: f64,
    terminal_balance: f64,
    withdrawal_ratio: f64,
    probes: usize,
    iterations: Vec<SolveIteration>,
    trajectory: ProjectResponse,
}

impl From<CapitalSolution> for SolveResponse {
    fn from(solution: CapitalSolution) -> Self {
        Self {
            required_capital: solution.required_capital,
            terminal_balance: solution.terminal_balance,
            withdrawal_ratio: solution.withdrawal_ratio,
            probes: solution.iterations.len(),
            iterations: solution.iterations,
            trajectory: solution.trajectory.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SipResponse {
    target_corpus: f64,
    required_contribution: f64,
    real_corpus: f64,
    nominal_corpus: Vec<f64>,
    contributions: Vec<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensitivityPoint {
    rate: f64,
    required_capital: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensitivityResponse {
    vary: SensitivityVariable,
    points: Vec<SensitivityPoint>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn default_cli() -> Cli {
    Cli::parse_from(["corpus"])
}

fn build_params(cli: &Cli) -> Result<SimulationParameters, String> {
    if !cli.initial_capital.is_finite() || cli.initial_capital < 0.0 {
        return Err("--initial-capital must be >= 0".to_string());
    }

    for (name, rate) in [
        ("--annual-return", cli.annual_return),
        ("--mature-return", cli.mature_return),
    ] {
        if !rate.is_finite() || rate <= -100.0 {
            return Err(format!("{name} must be > -100"));
        }
    }

    for (name, rate) in [
        ("--inflation", cli.inflation),
        ("--mature-inflation", cli.mature_inflation),
    ] {
        if !rate.is_finite() || rate <= -100.0 {
            return Err(format!("{name} must be > -100"));
        }
    }

    let mature_fees = cli.mature_fees.unwrap_or(cli.fees);
    for (name, rate) in [("--fees", cli.fees), ("--mature-fees", mature_fees)] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    if cli.regime_switch_period == Some(0) {
        return Err("--regime-switch-period must be >= 1".to_string());
    }

    if !cli.annual_withdrawal.is_finite() || cli.annual_withdrawal < 0.0 {
        return Err("--annual-withdrawal must be >= 0".to_string());
    }

    if !cli.big_withdrawal.is_finite() || cli.big_withdrawal < 0.0 {
        return Err("--big-withdrawal must be >= 0".to_string());
    }

    if cli.big_withdrawal_interval == 0 {
        return Err("--big-withdrawal-interval must be >= 1".to_string());
    }

    if !cli.withdrawal_growth.is_finite() || cli.withdrawal_growth <= -100.0 {
        return Err("--withdrawal-growth must be > -100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.withdrawal_tax) {
        return Err("--withdrawal-tax must be between 0 and 100".to_string());
    }

    let division = match cli.generation_interval {
        Some(0) => return Err("--generation-interval must be >= 1".to_string()),
        Some(interval) => {
            if !cli.kids.is_finite() || cli.kids < 1.0 {
                return Err("--kids must be >= 1".to_string());
            }
            if !(0.0..=100.0).contains(&cli.inheritance_tax) {
                return Err("--inheritance-tax must be between 0 and 100".to_string());
            }
            Some(GenerationalDivision {
                interval,
                kids: cli.kids,
                inheritance_tax_rate: cli.inheritance_tax / 100.0,
            })
        }
        None => None,
    };

    Ok(SimulationParameters {
        initial_capital: cli.initial_capital,
        regimes: RegimeSchedule {
            current: RateRegime {
                annual_return: cli.annual_return / 100.0,
                inflation: cli.inflation / 100.0,
                fees: cli.fees / 100.0,
            },
            mature: RateRegime {
                annual_return: cli.mature_return / 100.0,
                inflation: cli.mature_inflation / 100.0,
                fees: mature_fees / 100.0,
            },
            switch_period: cli.regime_switch_period,
        },
        withdrawals: WithdrawalRules {
            recurring: cli.annual_withdrawal,
            start_period: cli.withdrawal_start_period,
            big_amount: cli.big_withdrawal,
            big_interval: cli.big_withdrawal_interval,
            big_start_period: cli.big_withdrawal_start_period,
            growth_rate: cli.withdrawal_growth / 100.0,
            tax_rate: cli.withdrawal_tax / 100.0,
        },
        division,
        horizon: cli.horizon,
    })
}

fn build_solve_config(cli: &Cli) -> Result<SolveConfig, String> {
    if !cli.search_min.is_finite() || !cli.search_max.is_finite() {
        return Err("--search-min and --search-max must be finite".to_string());
    }
    if cli.search_max <= cli.search_min {
        return Err("--search-max must be greater than --search-min".to_string());
    }
    if !cli.tolerance.is_finite() || cli.tolerance <= 0.0 {
        return Err("--tolerance must be > 0".to_string());
    }
    if cli.max_iterations == 0 {
        return Err("--max-iterations must be > 0".to_string());
    }

    Ok(SolveConfig {
        search_min: cli.search_min,
        search_max: cli.search_max,
        tolerance: cli.tolerance,
        max_iterations: cli.max_iterations,
        ..SolveConfig::default()
    })
}

fn build_sip_plan(cli: &Cli) -> Result<SipPlan, String> {
    if !cli.sip_step_up.is_finite() || cli.sip_step_up <= -100.0 {
        return Err("--sip-step-up must be > -100".to_string());
    }

    Ok(SipPlan {
        contribution: 0.0,
        step_up_rate: cli.sip_step_up / 100.0,
        annual_return: cli.annual_return / 100.0,
        inflation: cli.inflation / 100.0,
        years: cli.sip_years,
    })
}

fn run_project(cli: &Cli) -> Result<ProjectResponse, String> {
    let params = build_params(cli)?;
    let result = project(&params).map_err(|e| e.to_string())?;
    Ok(result.into())
}

fn run_solve(cli: &Cli) -> Result<SolveResponse, String> {
    let params = build_params(cli)?;
    let config = build_solve_config(cli)?;
    let solution = solve_required_capital(&params, &config).map_err(|e| e.to_string())?;
    Ok(solution.into())
}

fn run_sip(cli: &Cli) -> Result<SipResponse, String> {
    let plan = build_sip_plan(cli)?;
    let target = match cli.sip_target {
        Some(target) => target,
        None => {
            let params = build_params(cli)?;
            let config = build_solve_config(cli)?;
            solve_required_capital(&params, &config)
                .map_err(|e| e.to_string())?
                .required_capital
        }
    };

    let solution = required_contribution(target, &plan).map_err(|e| e.to_string())?;
    Ok(SipResponse {
        target_corpus: target,
        required_contribution: solution.contribution,
        real_corpus: solution.projection.real_corpus,
        nominal_corpus: solution.projection.nominal_corpus,
        contributions: solution.projection.contributions,
    })
}

/// Re-solve across a range of one rate, holding everything else fixed. A
/// point where the search fails is reported as null rather than dropped, so
/// callers can tell "unsolvable here" from "skipped".
fn run_sensitivity(
    cli: &Cli,
    vary: SensitivityVariable,
    vary_min: f64,
    vary_max: f64,
    steps: u32,
) -> Result<SensitivityResponse, String> {
    if !vary_min.is_finite() || !vary_max.is_finite() || vary_max < vary_min {
        return Err("varyMax must be >= varyMin and both finite".to_string());
    }
    if steps < 2 {
        return Err("varySteps must be >= 2".to_string());
    }

    let mut points = Vec::with_capacity(steps as usize);
    for step in 0..steps {
        let rate = vary_min + (vary_max - vary_min) * step as f64 / (steps - 1) as f64;
        let mut varied = cli.clone();
        match vary {
            SensitivityVariable::AnnualReturn => varied.annual_return = rate,
            SensitivityVariable::Inflation => varied.inflation = rate,
        }

        let params = build_params(&varied)?;
        let config = build_solve_config(&varied)?;
        let required_capital = match solve_required_capital(&params, &config) {
            Ok(solution) => Some(solution.required_capital),
            Err(SolveError::NotBracketed { .. } | SolveError::MaxIterations { .. }) => None,
            Err(SolveError::InvalidParameter(e)) => return Err(e.to_string()),
        };
        points.push(SensitivityPoint {
            rate,
            required_capital,
        });
    }

    Ok(SensitivityResponse { vary, points })
}

/// One-shot CLI entry: evaluate the selected mode and render JSON.
pub fn run_cli(cli: Cli) -> Result<String, String> {
    let rendered = match cli.mode {
        CliMode::Project => to_pretty(&run_project(&cli)?),
        CliMode::Solve => to_pretty(&run_solve(&cli)?),
        CliMode::Sip => to_pretty(&run_sip(&cli)?),
    }?;
    Ok(rendered)
}

fn to_pretty<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn cli_from_payload(payload: ScenarioPayload) -> Cli {
    let mut cli = default_cli();

    if let Some(v) = payload.initial_capital {
        cli.initial_capital = v;
    }
    if let Some(v) = payload.annual_return {
        cli.annual_return = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation = v;
    }
    if let Some(v) = payload.fees {
        cli.fees = v;
    }
    if let Some(v) = payload.regime_switch_period {
        cli.regime_switch_period = Some(v);
    }
    if let Some(v) = payload.mature_return {
        cli.mature_return = v;
    }
    if let Some(v) = payload.mature_inflation {
        cli.mature_inflation = v;
    }
    if let Some(v) = payload.mature_fees {
        cli.mature_fees = Some(v);
    }
    if let Some(v) = payload.annual_withdrawal {
        cli.annual_withdrawal = v;
    }
    if let Some(v) = payload.withdrawal_start_period {
        cli.withdrawal_start_period = v;
    }
    if let Some(v) = payload.big_withdrawal {
        cli.big_withdrawal = v;
    }
    if let Some(v) = payload.big_withdrawal_interval {
        cli.big_withdrawal_interval = v;
    }
    if let Some(v) = payload.big_withdrawal_start_period {
        cli.big_withdrawal_start_period = v;
    }
    if let Some(v) = payload.withdrawal_growth {
        cli.withdrawal_growth = v;
    }
    if let Some(v) = payload.withdrawal_tax {
        cli.withdrawal_tax = v;
    }
    if let Some(v) = payload.generation_interval {
        cli.generation_interval = Some(v);
    }
    if let Some(v) = payload.kids {
        cli.kids = v;
    }
    if let Some(v) = payload.inheritance_tax {
        cli.inheritance_tax = v;
    }
    if let Some(v) = payload.horizon {
        cli.horizon = v;
    }
    if let Some(v) = payload.search_min {
        cli.search_min = v;
    }
    if let Some(v) = payload.search_max {
        cli.search_max = v;
    }
    if let Some(v) = payload.tolerance {
        cli.tolerance = v;
    }
    if let Some(v) = payload.max_iterations {
        cli.max_iterations = v;
    }
    if let Some(v) = payload.sip_step_up {
        cli.sip_step_up = v;
    }
    if let Some(v) = payload.sip_years {
        cli.sip_years = v;
    }
    if let Some(v) = payload.sip_target {
        cli.sip_target = Some(v);
    }

    cli
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route(
            "/api/solve",
            get(solve_get_handler).post(solve_post_handler),
        )
        .route("/api/sip", get(sip_get_handler).post(sip_post_handler))
        .route(
            "/api/sensitivity",
            get(sensitivity_get_handler).post(sensitivity_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("corpus HTTP API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    project_handler_impl(payload)
}

async fn project_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    project_handler_impl(payload)
}

fn project_handler_impl(payload: ScenarioPayload) -> Response {
    let cli = cli_from_payload(payload);
    match run_project(&cli) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn solve_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    solve_handler_impl(payload)
}

async fn solve_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    solve_handler_impl(payload)
}

fn solve_handler_impl(payload: ScenarioPayload) -> Response {
    let cli = cli_from_payload(payload);
    let params = match build_params(&cli) {
        Ok(params) => params,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let config = match build_solve_config(&cli) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match solve_required_capital(&params, &config) {
        Ok(solution) => json_response(StatusCode::OK, SolveResponse::from(solution)),
        Err(SolveError::InvalidParameter(e)) => {
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        // A failed search is a meaningful outcome, not a malformed request.
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    }
}

async fn sip_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    sip_handler_impl(payload)
}

async fn sip_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    sip_handler_impl(payload)
}

fn sip_handler_impl(payload: ScenarioPayload) -> Response {
    let cli = cli_from_payload(payload);
    match run_sip(&cli) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn sensitivity_get_handler(Query(payload): Query<ScenarioPayload>) -> Response {
    sensitivity_handler_impl(payload)
}

async fn sensitivity_post_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    sensitivity_handler_impl(payload)
}

fn sensitivity_handler_impl(payload: ScenarioPayload) -> Response {
    let Some(vary) = payload.vary else {
        return error_response(StatusCode::BAD_REQUEST, "vary is required");
    };
    let (vary_min, vary_max) = match (payload.vary_min, payload.vary_max) {
        (Some(min), Some(max)) => (min, max),
        _ => return error_response(StatusCode::BAD_REQUEST, "varyMin and varyMax are required"),
    };
    let steps = payload.vary_steps.unwrap_or(11);

    let cli = cli_from_payload(payload);
    match run_sensitivity(&cli, vary, vary_min, vary_max, steps) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn scenario_from_json(json: &str) -> Result<Cli, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(cli_from_payload(payload))
}

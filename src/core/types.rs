use serde::Serialize;
use thiserror::Error;

/// Rejected input, raised before any simulation work starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid parameter: {field} {reason}")]
pub struct ParameterError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ParameterError {
    pub(crate) fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// A (return, inflation, fees) triple active for a contiguous range of
/// periods. All rates are fractions: 0.12 means 12% per period.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RateRegime {
    pub annual_return: f64,
    pub inflation: f64,
    pub fees: f64,
}

/// Two-regime schedule: the current regime applies until `switch_period`
/// takes effect (inclusive), after which the mature regime applies for good.
/// `None` means the switch never happens.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegimeSchedule {
    pub current: RateRegime,
    pub mature: RateRegime,
    pub switch_period: Option<u32>,
}

impl RegimeSchedule {
    pub fn single(regime: RateRegime) -> Self {
        Self {
            current: regime,
            mature: regime,
            switch_period: None,
        }
    }

    /// Active regime for a 1-based period index. Pure lookup; the schedule
    /// itself never changes during a run.
    pub fn active(&self, period: u32) -> RateRegime {
        match self.switch_period {
            Some(switch) if period >= switch => self.mature,
            _ => self.current,
        }
    }
}

/// Recurring and periodic-large withdrawal rules. Amounts are in the run's
/// currency unit; `growth_rate` compounds both amounts once per period after
/// they have been applied, and `tax_rate` is a flat fraction charged on top
/// of every withdrawal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WithdrawalRules {
    pub recurring: f64,
    pub start_period: u32,
    pub big_amount: f64,
    pub big_interval: u32,
    pub big_start_period: u32,
    pub growth_rate: f64,
    pub tax_rate: f64,
}

impl WithdrawalRules {
    pub fn none() -> Self {
        Self {
            recurring: 0.0,
            start_period: 0,
            big_amount: 0.0,
            big_interval: 1,
            big_start_period: 0,
            growth_rate: 0.0,
            tax_rate: 0.0,
        }
    }
}

/// Division of the corpus among heirs every `interval` periods, optionally
/// taxed on the post-division balance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GenerationalDivision {
    pub interval: u32,
    pub kids: f64,
    pub inheritance_tax_rate: f64,
}

/// Immutable description of one projection scenario. Monetary values share
/// one caller-chosen unit (the reference configuration uses crores); rates
/// are fractions, converted from percentages once at the api boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationParameters {
    pub initial_capital: f64,
    pub regimes: RegimeSchedule,
    pub withdrawals: WithdrawalRules,
    pub division: Option<GenerationalDivision>,
    pub horizon: u32,
}

impl SimulationParameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        require_amount("initial_capital", self.initial_capital)?;

        validate_regime("current", &self.regimes.current)?;
        validate_regime("mature", &self.regimes.mature)?;
        if self.regimes.switch_period == Some(0) {
            return Err(ParameterError::new(
                "regime_switch_period",
                "must be >= 1 (period indices are 1-based)",
            ));
        }

        let w = &self.withdrawals;
        require_amount("recurring_withdrawal", w.recurring)?;
        require_amount("big_withdrawal", w.big_amount)?;
        if w.big_interval == 0 {
            return Err(ParameterError::new(
                "big_withdrawal_interval",
                "must be >= 1",
            ));
        }
        if !w.growth_rate.is_finite() || w.growth_rate <= -1.0 {
            return Err(ParameterError::new(
                "withdrawal_growth_rate",
                "must be a finite fraction > -1",
            ));
        }
        require_rate("withdrawal_tax_rate", w.tax_rate)?;

        if let Some(division) = &self.division {
            if division.interval == 0 {
                return Err(ParameterError::new("generation_interval", "must be >= 1"));
            }
            if !division.kids.is_finite() || division.kids < 1.0 {
                return Err(ParameterError::new("kids", "must be a finite factor >= 1"));
            }
            require_rate("inheritance_tax_rate", division.inheritance_tax_rate)?;
        }

        Ok(())
    }
}

fn validate_regime(which: &'static str, regime: &RateRegime) -> Result<(), ParameterError> {
    let mature = which == "mature";
    if !regime.annual_return.is_finite() || regime.annual_return <= -1.0 {
        let field = if mature { "mature_annual_return" } else { "annual_return" };
        return Err(ParameterError::new(field, "must be a finite fraction > -1"));
    }
    if !regime.inflation.is_finite() || regime.inflation <= -1.0 {
        let field = if mature { "mature_inflation" } else { "inflation" };
        return Err(ParameterError::new(field, "must be a finite fraction > -1"));
    }
    if !regime.fees.is_finite() || !(0.0..=1.0).contains(&regime.fees) {
        let field = if mature { "mature_fees" } else { "fees" };
        return Err(ParameterError::new(field, "must be a fraction in [0, 1]"));
    }
    Ok(())
}

fn require_amount(field: &'static str, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ParameterError::new(field, "must be finite and >= 0"));
    }
    Ok(())
}

fn require_rate(field: &'static str, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ParameterError::new(field, "must be a fraction in [0, 1]"));
    }
    Ok(())
}

/// Rule that fired during a period.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodEvent {
    Withdrawal,
    BigWithdrawal,
    RegimeSwitch,
    GenerationalDivision,
}

/// One period of the trajectory. Balances are real (inflation-adjusted);
/// withdrawal components are pre-tax, with the taxes broken out separately.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSnapshot {
    pub period: u32,
    pub opening_balance: f64,
    pub closing_balance: f64,
    pub recurring_withdrawal: f64,
    pub big_withdrawal: f64,
    pub withdrawal_tax: f64,
    pub inheritance_tax: f64,
    pub events: Vec<PeriodEvent>,
}

impl PeriodSnapshot {
    pub(crate) fn initial(balance: f64) -> Self {
        Self {
            period: 0,
            opening_balance: balance,
            closing_balance: balance,
            recurring_withdrawal: 0.0,
            big_withdrawal: 0.0,
            withdrawal_tax: 0.0,
            inheritance_tax: 0.0,
            events: Vec::new(),
        }
    }
}

/// Full trajectory of a projection run. `periods[0]` is the unsimulated
/// starting snapshot; period indices are contiguous from there. A run that
/// depletes before the horizon is truncated at the depleting period with
/// `terminated_early` set.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub periods: Vec<PeriodSnapshot>,
    pub terminated_early: bool,
}

impl SimulationResult {
    pub fn terminal_balance(&self) -> f64 {
        self.periods.last().map(|p| p.closing_balance).unwrap_or(0.0)
    }

    /// Period at which the corpus hit zero, if it did.
    pub fn depletion_period(&self) -> Option<u32> {
        if self.terminated_early {
            self.periods.last().map(|p| p.period)
        } else {
            None
        }
    }

    pub fn total_withdrawn(&self) -> f64 {
        self.periods
            .iter()
            .map(|p| p.recurring_withdrawal + p.big_withdrawal)
            .sum()
    }

    pub fn total_withdrawal_tax(&self) -> f64 {
        self.periods.iter().map(|p| p.withdrawal_tax).sum()
    }

    pub fn total_inheritance_tax(&self) -> f64 {
        self.periods.iter().map(|p| p.inheritance_tax).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> SimulationParameters {
        SimulationParameters {
            initial_capital: 10.0,
            regimes: RegimeSchedule::single(RateRegime {
                annual_return: 0.12,
                inflation: 0.07,
                fees: 0.01,
            }),
            withdrawals: WithdrawalRules::none(),
            division: None,
            horizon: 100,
        }
    }

    #[test]
    fn valid_parameters_pass() {
        base_params().validate().expect("must validate");
    }

    #[test]
    fn rejects_zero_big_interval() {
        let mut params = base_params();
        params.withdrawals.big_interval = 0;
        let err = params.validate().expect_err("must reject");
        assert_eq!(err.field, "big_withdrawal_interval");
    }

    #[test]
    fn rejects_zero_generation_interval() {
        let mut params = base_params();
        params.division = Some(GenerationalDivision {
            interval: 0,
            kids: 2.0,
            inheritance_tax_rate: 0.0,
        });
        let err = params.validate().expect_err("must reject");
        assert_eq!(err.field, "generation_interval");
    }

    #[test]
    fn rejects_fractional_kids_below_one() {
        let mut params = base_params();
        params.division = Some(GenerationalDivision {
            interval: 25,
            kids: 0.5,
            inheritance_tax_rate: 0.0,
        });
        let err = params.validate().expect_err("must reject");
        assert_eq!(err.field, "kids");
    }

    #[test]
    fn rejects_switch_at_period_zero() {
        let mut params = base_params();
        params.regimes.switch_period = Some(0);
        let err = params.validate().expect_err("must reject");
        assert_eq!(err.field, "regime_switch_period");
    }

    #[test]
    fn rejects_negative_capital_and_withdrawals() {
        let mut params = base_params();
        params.initial_capital = -1.0;
        assert_eq!(
            params.validate().expect_err("must reject").field,
            "initial_capital"
        );

        let mut params = base_params();
        params.withdrawals.recurring = f64::NAN;
        assert_eq!(
            params.validate().expect_err("must reject").field,
            "recurring_withdrawal"
        );
    }

    #[test]
    fn rejects_deflation_past_negative_one() {
        let mut params = base_params();
        params.regimes.current.inflation = -1.5;
        assert_eq!(
            params.validate().expect_err("must reject").field,
            "inflation"
        );
    }

    #[test]
    fn active_regime_switches_at_threshold_inclusive() {
        let current = RateRegime {
            annual_return: 0.15,
            inflation: 0.07,
            fees: 0.01,
        };
        let mature = RateRegime {
            annual_return: 0.10,
            inflation: 0.05,
            fees: 0.01,
        };
        let schedule = RegimeSchedule {
            current,
            mature,
            switch_period: Some(50),
        };

        assert_eq!(schedule.active(49), current);
        assert_eq!(schedule.active(50), mature);
        assert_eq!(schedule.active(51), mature);
        assert_eq!(schedule.active(1000), mature);

        let never = RegimeSchedule {
            switch_period: None,
            ..schedule
        };
        assert_eq!(never.active(1000), current);
    }

    #[test]
    fn terminal_balance_reads_last_snapshot() {
        let result = SimulationResult {
            periods: vec![PeriodSnapshot::initial(5.0)],
            terminated_early: false,
        };
        assert_eq!(result.terminal_balance(), 5.0);
        assert_eq!(result.depletion_period(), None);
    }
}

use super::types::{
    ParameterError, PeriodEvent, PeriodSnapshot, SimulationParameters, SimulationResult,
};

/// Withdrawal amounts as grown through the periods simulated so far. The
/// first period uses the configured amounts verbatim; growth is applied
/// after each period's withdrawals so it only shows up from the next period.
#[derive(Debug, Clone, Copy)]
struct WithdrawalState {
    recurring: f64,
    big: f64,
}

/// Advance the corpus one period at a time until the horizon or depletion.
///
/// Each period applies, in order: regime lookup, growth, fee drag, deflation
/// to real terms, the recurring withdrawal (if its start gate passed), the
/// periodic large withdrawal (interval multiple, own start gate, and the
/// recurring gate), withdrawal-amount growth, and generational division with
/// inheritance tax. Reordering these steps changes results; the order mirrors
/// the real-world sequence of returns accruing before cash leaves.
pub fn project(params: &SimulationParameters) -> Result<SimulationResult, ParameterError> {
    params.validate()?;
    Ok(run_projection(params))
}

/// Projection body without re-validation, for callers (the solver) that
/// evaluate one validated parameter set many times.
pub(crate) fn run_projection(params: &SimulationParameters) -> SimulationResult {
    let mut periods = Vec::with_capacity(params.horizon as usize + 1);
    periods.push(PeriodSnapshot::initial(params.initial_capital));

    let mut balance = params.initial_capital;
    let mut pending = WithdrawalState {
        recurring: params.withdrawals.recurring,
        big: params.withdrawals.big_amount,
    };

    for period in 1..=params.horizon {
        let opening = balance;
        let mut events = Vec::new();

        let regime = params.regimes.active(period);
        if params.regimes.switch_period == Some(period) {
            events.push(PeriodEvent::RegimeSwitch);
        }

        balance *= 1.0 + regime.annual_return;
        balance *= 1.0 - regime.fees;
        // From here on the balance is in real (inflation-adjusted) terms.
        balance /= 1.0 + regime.inflation;

        let rules = &params.withdrawals;
        let mut recurring_taken = 0.0;
        let mut big_taken = 0.0;
        let mut withdrawal_tax = 0.0;
        if period >= rules.start_period {
            recurring_taken = pending.recurring;
            withdrawal_tax += recurring_taken * rules.tax_rate;
            events.push(PeriodEvent::Withdrawal);

            if period % rules.big_interval == 0 && period >= rules.big_start_period {
                big_taken = pending.big;
                withdrawal_tax += big_taken * rules.tax_rate;
                events.push(PeriodEvent::BigWithdrawal);
            }
        }
        balance -= recurring_taken + big_taken + withdrawal_tax;

        // This period consumed the amounts grown through period - 1.
        pending.recurring *= 1.0 + rules.growth_rate;
        pending.big *= 1.0 + rules.growth_rate;

        let mut inheritance_tax = 0.0;
        if let Some(division) = &params.division {
            if period % division.interval == 0 {
                balance /= division.kids;
                inheritance_tax = balance.max(0.0) * division.inheritance_tax_rate;
                balance -= inheritance_tax;
                events.push(PeriodEvent::GenerationalDivision);
            }
        }

        let depleted = balance <= 0.0;
        periods.push(PeriodSnapshot {
            period,
            opening_balance: opening,
            closing_balance: balance.max(0.0),
            recurring_withdrawal: recurring_taken,
            big_withdrawal: big_taken,
            withdrawal_tax,
            inheritance_tax,
            events,
        });

        // A dead corpus stays at zero; there is nothing left to simulate.
        if depleted {
            return SimulationResult {
                periods,
                terminated_early: true,
            };
        }
    }

    SimulationResult {
        periods,
        terminated_early: false,
    }
}

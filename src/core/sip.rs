use serde::Serialize;

use super::types::ParameterError;

/// Accumulation-phase plan: a periodic contribution stepped up every year,
/// compounding at a single nominal return. No withdrawals and no regime
/// switch; the corpus is deflated to real terms once, at the end.
#[derive(Clone, Debug, PartialEq)]
pub struct SipPlan {
    pub contribution: f64,
    pub step_up_rate: f64,
    pub annual_return: f64,
    pub inflation: f64,
    pub years: u32,
}

impl SipPlan {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.contribution.is_finite() || self.contribution < 0.0 {
            return Err(ParameterError::new("contribution", "must be finite and >= 0"));
        }
        if !self.step_up_rate.is_finite() || self.step_up_rate <= -1.0 {
            return Err(ParameterError::new(
                "step_up_rate",
                "must be a finite fraction > -1",
            ));
        }
        if !self.annual_return.is_finite() || self.annual_return <= -1.0 {
            return Err(ParameterError::new(
                "annual_return",
                "must be a finite fraction > -1",
            ));
        }
        if !self.inflation.is_finite() || self.inflation <= -1.0 {
            return Err(ParameterError::new(
                "inflation",
                "must be a finite fraction > -1",
            ));
        }
        Ok(())
    }
}

/// Accumulation trajectory. `nominal_corpus[0]` is the empty starting pot;
/// `contributions[i]` is the amount invested in year `i + 1`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SipProjection {
    pub real_corpus: f64,
    pub nominal_corpus: Vec<f64>,
    pub contributions: Vec<f64>,
}

/// Sized contribution plus the trajectory it produces.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SipSolution {
    pub contribution: f64,
    pub projection: SipProjection,
}

/// Accumulate the plan year by year: contribute first, then grow, then step
/// the contribution up for the next year.
pub fn accumulate(plan: &SipPlan) -> Result<SipProjection, ParameterError> {
    plan.validate()?;
    Ok(run_accumulation(plan))
}

fn run_accumulation(plan: &SipPlan) -> SipProjection {
    let mut corpus = 0.0;
    let mut contribution = plan.contribution;
    let mut nominal_corpus = Vec::with_capacity(plan.years as usize + 1);
    let mut contributions = Vec::with_capacity(plan.years as usize);
    nominal_corpus.push(0.0);

    for _ in 0..plan.years {
        corpus += contribution;
        contributions.push(contribution);
        corpus *= 1.0 + plan.annual_return;
        nominal_corpus.push(corpus);
        contribution *= 1.0 + plan.step_up_rate;
    }

    let real_corpus = corpus / (1.0 + plan.inflation).powi(plan.years as i32);

    SipProjection {
        real_corpus,
        nominal_corpus,
        contributions,
    }
}

/// Size the first-year contribution that accumulates to `target_corpus` in
/// real terms. Accumulation is linear in the contribution, so a unit-sized
/// run scales exactly; this closed form is preferred over a search.
pub fn required_contribution(
    target_corpus: f64,
    plan: &SipPlan,
) -> Result<SipSolution, ParameterError> {
    plan.validate()?;
    if !target_corpus.is_finite() || target_corpus < 0.0 {
        return Err(ParameterError::new(
            "target_corpus",
            "must be finite and >= 0",
        ));
    }
    if plan.years == 0 {
        return Err(ParameterError::new(
            "years",
            "must be >= 1 to size a contribution",
        ));
    }

    let unit = run_accumulation(&SipPlan {
        contribution: 1.0,
        ..plan.clone()
    });
    let contribution = target_corpus / unit.real_corpus;

    let projection = run_accumulation(&SipPlan {
        contribution,
        ..plan.clone()
    });

    Ok(SipSolution {
        contribution,
        projection,
    })
}

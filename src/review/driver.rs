use k8s_openapi::api::authorization::v1::SubjectAccessReviewStatus;
use tracing::{error, info, instrument};

use super::err::ReviewError;
use super::plan::{AccessProbe, Expectation, ProbePlan};

/// The authorizer's answer to one probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<String>,
    pub evaluation_error: Option<String>,
}

impl Verdict {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<SubjectAccessReviewStatus> for Verdict {
    fn from(status: SubjectAccessReviewStatus) -> Self {
        Self {
            allowed: status.allowed,
            reason: non_empty(status.reason),
            evaluation_error: non_empty(status.evaluation_error),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait AccessReviewer {
    /// Asks whether the caller may perform the probed request.
    /// An error means the question could not be asked, not that access was denied.
    async fn review(&self, probe: &AccessProbe) -> Result<Verdict, ReviewError>;
}

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub probe: AccessProbe,
    pub expectation: Expectation,
    pub verdict: Verdict,
}

impl ProbeOutcome {
    pub fn passed(&self) -> bool {
        self.verdict.allowed == self.expectation.allowed()
    }
}

#[derive(Debug)]
pub struct Report {
    pub namespace: String,
    pub outcomes: Vec<ProbeOutcome>,
}

impl Report {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs every probe of the plan, allowed ones first, one at a time.
///
/// A verdict that differs from the expectation is recorded as a failed outcome and the run
/// goes on; a review that cannot be performed at all aborts the run.
pub async fn verify<R: AccessReviewer>(reviewer: &R, plan: &ProbePlan) -> Result<Report, ReviewError> {
    let mut outcomes = Vec::with_capacity(plan.len());
    for (expectation, probe) in plan.iter() {
        outcomes.push(review_probe(reviewer, probe, expectation).await?);
    }

    let report = Report {
        namespace: plan.namespace.clone(),
        outcomes,
    };
    info!(
        namespace = %report.namespace,
        passed = report.passed(),
        failed = report.failed(),
        "Finished access reviews"
    );
    Ok(report)
}

#[instrument(skip_all, fields(probe = %probe, expected = %expectation))]
async fn review_probe<R: AccessReviewer>(
    reviewer: &R,
    probe: &AccessProbe,
    expectation: Expectation,
) -> Result<ProbeOutcome, ReviewError> {
    let verdict = reviewer.review(probe).await.inspect_err(|e| {
        error!(error = %e, "Access review failed");
    })?;

    let outcome = ProbeOutcome {
        probe: probe.clone(),
        expectation,
        verdict,
    };
    if outcome.passed() {
        info!(allowed = outcome.verdict.allowed, "Review passed");
    } else {
        error!(
            allowed = outcome.verdict.allowed,
            reason = outcome.verdict.reason.as_deref().unwrap_or_default(),
            evaluation_error = outcome.verdict.evaluation_error.as_deref().unwrap_or_default(),
            "Review failed"
        );
    }
    Ok(outcome)
}

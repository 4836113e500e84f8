#[cfg(test)]
use super::{AccessProbe, AccessReviewer, ReviewError, Verdict};
#[cfg(test)]
use std::collections::HashSet;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

/// Allows exactly the probes it was built with and denies everything else.
#[cfg(test)]
pub struct TestAccessReviewer {
    allowed: HashSet<AccessProbe>,
    failing: Option<AccessProbe>,
    calls: AtomicUsize,
}

#[cfg(test)]
impl TestAccessReviewer {
    pub fn new(allowed: impl IntoIterator<Item = AccessProbe>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            failing: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Reviewing `probe` fails as if the API server answered without a status.
    pub fn failing_on(mut self, probe: AccessProbe) -> Self {
        self.failing = Some(probe);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl AccessReviewer for TestAccessReviewer {
    async fn review(&self, probe: &AccessProbe) -> Result<Verdict, ReviewError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.as_ref() == Some(probe) {
            return Err(ReviewError::MissingStatus(probe.to_string()));
        }
        Ok(match self.allowed.contains(probe) {
            true => Verdict::allowed(),
            false => Verdict {
                reason: Some(format!("{probe} is not allowed")),
                ..Verdict::denied()
            },
        })
    }
}

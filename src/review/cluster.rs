use k8s_openapi::api::authorization::v1::SelfSubjectAccessReview;
use kube::api::{Api, PostParams};
use kube::Client;

use super::driver::{AccessReviewer, Verdict};
use super::err::ReviewError;
use super::plan::AccessProbe;

/// Asks the API server, as the identity of the client, through SelfSubjectAccessReviews.
pub struct ClusterAccessReviewer {
    api: Api<SelfSubjectAccessReview>,
}

impl ClusterAccessReviewer {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

impl AccessReviewer for ClusterAccessReviewer {
    async fn review(&self, probe: &AccessProbe) -> Result<Verdict, ReviewError> {
        let review = self
            .api
            .create(&PostParams::default(), &SelfSubjectAccessReview::from(probe))
            .await?;
        review
            .status
            .map(Verdict::from)
            .ok_or_else(|| ReviewError::MissingStatus(probe.to_string()))
    }
}

use std::fmt::Display;

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};

use crate::rules::{split_resource_name, ResourceEntry, RuleSet, RuleVerification, Verb};

/// One question for the authorizer: may the caller perform `verb` on this resource?
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessProbe {
    pub group: String,
    // "pods" for the catalog key "pods/exec"
    pub resource: String,
    pub subresource: String,
    pub verb: Verb,
    // Only set for namespaced resources.
    pub namespace: Option<String>,
}

impl AccessProbe {
    pub fn new(group: &str, name: &str, entry: &ResourceEntry, verb: &Verb, namespace: &str) -> Self {
        let (resource, _) = split_resource_name(name);
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
            subresource: entry.subresource.clone(),
            verb: verb.clone(),
            namespace: entry.namespaced.then(|| namespace.to_string()),
        }
    }
}

impl Display for AccessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let group = match self.group.as_str() {
            "" => "core",
            group => group,
        };
        write!(f, "{group}/{}", self.resource)?;
        if !self.subresource.is_empty() {
            write!(f, "/{}", self.subresource)?;
        }
        write!(f, " {}", self.verb)?;
        if let Some(namespace) = &self.namespace {
            write!(f, " in {namespace}")?;
        }
        Ok(())
    }
}

impl From<&AccessProbe> for SelfSubjectAccessReview {
    fn from(probe: &AccessProbe) -> Self {
        SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(probe.group.clone()),
                    resource: Some(probe.resource.clone()),
                    subresource: (!probe.subresource.is_empty())
                        .then(|| probe.subresource.clone()),
                    verb: Some(probe.verb.to_string()),
                    namespace: probe.namespace.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Allowed,
    Forbidden,
}

impl Expectation {
    pub fn allowed(&self) -> bool {
        matches!(self, Expectation::Allowed)
    }
}

impl Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Expectation::Allowed => "allowed",
            Expectation::Forbidden => "forbidden",
        })
    }
}

/// The probes of one verification run in one namespace, one per (group, resource, verb),
/// ordered by group, resource and verb.
#[derive(Debug)]
pub struct ProbePlan {
    pub namespace: String,
    pub allowed: Vec<AccessProbe>,
    pub forbidden: Vec<AccessProbe>,
}

fn probes(rules: &RuleSet, namespace: &str) -> Vec<AccessProbe> {
    rules
        .resources()
        .flat_map(|(group, name, entry)| {
            entry
                .verbs
                .iter()
                .map(move |verb| AccessProbe::new(group, name, entry, verb, namespace))
        })
        .collect()
}

impl ProbePlan {
    pub fn new(verification: &RuleVerification, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            allowed: probes(verification.allowed(), namespace),
            forbidden: probes(verification.forbidden(), namespace),
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len() + self.forbidden.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allowed probes first, then forbidden ones.
    pub fn iter(&self) -> impl Iterator<Item = (Expectation, &AccessProbe)> {
        self.allowed
            .iter()
            .map(|probe| (Expectation::Allowed, probe))
            .chain(
                self.forbidden
                    .iter()
                    .map(|probe| (Expectation::Forbidden, probe)),
            )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn verification() -> RuleVerification {
        RuleVerification::from_files(
            "src/rules/testfiles/api_resources.txt",
            "src/rules/testfiles/clusterrole.yaml",
        )
        .expect("fixtures to load")
    }

    #[test]
    fn test_plan_covers_catalog() {
        let verification = verification();
        let plan = ProbePlan::new(&verification, "smoke-test");
        assert_eq!(plan.allowed.len(), 16);
        assert_eq!(plan.len(), verification.catalog().verb_count());
        assert_eq!(
            plan.iter()
                .filter(|(expectation, _)| expectation.allowed())
                .count(),
            16
        );
    }

    #[test]
    fn test_plan_order() {
        let plan = ProbePlan::new(&verification(), "smoke-test");
        let allowed: Vec<String> = plan.allowed.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            allowed[..6],
            [
                "core/configmaps delete in smoke-test",
                "core/configmaps get in smoke-test",
                "core/configmaps list in smoke-test",
                "core/configmaps watch in smoke-test",
                "core/pods/exec get in smoke-test",
                "crd.projectcalico.org/ippools create",
            ]
        );
    }

    #[test]
    fn test_namespace_only_for_namespaced_resources() {
        let plan = ProbePlan::new(&verification(), "smoke-test");
        for (_, probe) in plan.iter() {
            match (probe.group.as_str(), probe.resource.as_str()) {
                ("crd.projectcalico.org", "ippools") | ("authentication.k8s.io", "tokenreviews") => {
                    assert_eq!(probe.namespace, None, "{probe}")
                }
                _ => assert_eq!(probe.namespace.as_deref(), Some("smoke-test"), "{probe}"),
            }
        }
    }

    #[test]
    fn test_subresource_review() {
        let plan = ProbePlan::new(&verification(), "smoke-test");
        let exec = plan
            .forbidden
            .iter()
            .find(|p| p.subresource == "exec")
            .expect("pods/exec create is forbidden");
        assert_eq!(exec.resource, "pods");
        assert_eq!(exec.verb, Verb::Create);

        let review = SelfSubjectAccessReview::from(exec);
        let attributes = review.spec.resource_attributes.expect("resource attributes");
        assert_eq!(attributes.group.as_deref(), Some(""));
        assert_eq!(attributes.resource.as_deref(), Some("pods"));
        assert_eq!(attributes.subresource.as_deref(), Some("exec"));
        assert_eq!(attributes.verb.as_deref(), Some("create"));
        assert_eq!(attributes.namespace.as_deref(), Some("smoke-test"));
        assert_eq!(attributes.name, None);
        assert!(review.status.is_none());
    }

    #[test]
    fn test_cluster_scoped_review() {
        let plan = ProbePlan::new(&verification(), "smoke-test");
        let tokenreview = plan
            .forbidden
            .iter()
            .find(|p| p.resource == "tokenreviews")
            .expect("tokenreviews are forbidden");
        let attributes = SelfSubjectAccessReview::from(tokenreview)
            .spec
            .resource_attributes
            .expect("resource attributes");
        assert_eq!(attributes.group.as_deref(), Some("authentication.k8s.io"));
        assert_eq!(attributes.subresource, None);
        assert_eq!(attributes.namespace, None);
    }
}

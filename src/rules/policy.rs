use std::collections::BTreeSet;

use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::catalog::CatalogIndex;
use super::err::PolicyError;
use super::types::{ApiGroupRules, Merge, ResourceEntry, RuleSet};
use super::verb::{StarWildcardSelector, Verb};

// Anything carrying RBAC rules (Role, ClusterRole), or a List of such objects.
#[derive(Debug, Deserialize)]
struct RbacDocument {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMeta>,
    #[serde(default)]
    rules: Option<Vec<Value>>,
    #[serde(default)]
    items: Option<Vec<Value>>,
}

/// What the expansion skipped or dropped. None of it is fatal.
#[derive(Debug, Default)]
pub struct ExpansionReport {
    pub documents: usize,
    pub rules: usize,
    /// Rules restricted to resourceNames, or covering only nonResourceURLs.
    pub skipped_rules: usize,
    pub unknown_groups: BTreeSet<String>,
    /// (group, resource)
    pub unknown_resources: BTreeSet<(String, String)>,
    /// (group, resource, verb)
    pub dropped_verbs: BTreeSet<(String, String, String)>,
    pub errors: Vec<PolicyError>,
}

// Rule expansion runs in three stages, each narrowing the previous one against the catalog:
// api groups => resources within those groups => verbs of those resources.

struct GroupTargets<'c> {
    groups: Vec<(&'c str, &'c ApiGroupRules)>,
    // Set when the groups came from "*": a resource missing from one of them is expected.
    wildcard: bool,
}

struct ResourceTarget<'c> {
    group: &'c str,
    name: &'c str,
    entry: &'c ResourceEntry,
}

struct ResourceTargets<'c> {
    resources: Vec<ResourceTarget<'c>>,
}

struct Grant<'c> {
    target: ResourceTarget<'c>,
    verbs: BTreeSet<Verb>,
}

impl<'c> GroupTargets<'c> {
    fn resolve(
        catalog: &'c CatalogIndex,
        api_groups: &[String],
        report: &mut ExpansionReport,
    ) -> Self {
        let catalog = catalog.rules();
        let selector = StarWildcardSelector::from(api_groups);
        let groups = match selector {
            StarWildcardSelector::Any => catalog
                .groups()
                .map(|(group, rules)| (group.as_str(), rules))
                .collect(),
            StarWildcardSelector::Exact(api_groups) => {
                let mut groups = Vec::with_capacity(api_groups.len());
                for group in api_groups {
                    match catalog.group_key_value(group) {
                        Some((group, rules)) => groups.push((group.as_str(), rules)),
                        None => {
                            warn!(group = %group, "Found nonexisting api group, skipping");
                            report.unknown_groups.insert(group.clone());
                        }
                    }
                }
                groups
            }
        };
        Self {
            groups,
            wildcard: selector == StarWildcardSelector::Any,
        }
    }

    fn resources(self, resources: &[String], report: &mut ExpansionReport) -> ResourceTargets<'c> {
        let selector = StarWildcardSelector::from(resources);
        let mut targets = Vec::new();
        let wildcard = self.wildcard;
        for (group, rules) in self.groups {
            match selector {
                StarWildcardSelector::Any => {
                    targets.extend(rules.resources.iter().map(|(name, entry)| ResourceTarget {
                        group,
                        name: name.as_str(),
                        entry,
                    }))
                }
                StarWildcardSelector::Exact(resources) => {
                    for resource in resources {
                        match rules.resources.get_key_value(resource.as_str()) {
                            Some((name, entry)) => targets.push(ResourceTarget {
                                group,
                                name: name.as_str(),
                                entry,
                            }),
                            None if wildcard => {
                                debug!(group, resource = %resource, "Resource not served by api group, skipping");
                            }
                            None => {
                                warn!(group, resource = %resource, "Found nonexisting resource in api group, skipping");
                                report
                                    .unknown_resources
                                    .insert((group.to_string(), resource.clone()));
                            }
                        }
                    }
                }
            }
        }
        ResourceTargets { resources: targets }
    }
}

impl<'c> ResourceTargets<'c> {
    // Kubernetes answers "no" rather than failing when asked about a verb a resource does
    // not support, so such verbs are dropped here instead of being reported as errors.
    fn grants(self, verbs: &[String], report: &mut ExpansionReport) -> Vec<Grant<'c>> {
        let selector = StarWildcardSelector::from(verbs);
        let mut grants = Vec::with_capacity(self.resources.len());
        for target in self.resources {
            let verbs = match selector {
                StarWildcardSelector::Any => target.entry.verbs.clone(),
                StarWildcardSelector::Exact(verbs) => {
                    let mut granted = BTreeSet::new();
                    for verb in verbs {
                        match verb.parse::<Verb>() {
                            Ok(parsed) if target.entry.verbs.contains(&parsed) => {
                                granted.insert(parsed);
                            }
                            _ => {
                                warn!(
                                    group = target.group,
                                    resource = target.name,
                                    verb = %verb,
                                    "Found non-available verb for resource, ignoring"
                                );
                                report.dropped_verbs.insert((
                                    target.group.to_string(),
                                    target.name.to_string(),
                                    verb.clone(),
                                ));
                            }
                        }
                    }
                    granted
                }
            };
            grants.push(Grant { target, verbs });
        }
        grants
    }
}

/// Expands RBAC rules against a catalog into the set of (group, resource, verb) the rules
/// actually grant. Everything is checked against the catalog: nothing the catalog does not
/// list ever ends up in the policy.
pub struct PolicyExpander<'c> {
    catalog: &'c CatalogIndex,
    policy: RuleSet,
    report: ExpansionReport,
}

impl<'c> PolicyExpander<'c> {
    pub fn new(catalog: &'c CatalogIndex) -> Self {
        Self {
            catalog,
            policy: RuleSet::new(),
            report: ExpansionReport::default(),
        }
    }

    /// Expands a stream of policy documents: multi-document YAML, or concatenated JSON values
    /// when the input starts with `{` or `[`. A document that cannot be decoded ends the
    /// stream; whatever was merged before it is kept.
    pub fn expand_str(&mut self, text: &str) {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let stream = serde_json::Deserializer::from_str(trimmed).into_iter::<Value>();
            for (index, document) in stream.enumerate() {
                match document {
                    Ok(document) => self.expand_document(index, document),
                    Err(error) => {
                        self.document_failed(index, error.to_string());
                        break;
                    }
                }
            }
        } else {
            for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
                match Value::deserialize(document) {
                    Ok(document) => self.expand_document(index, document),
                    Err(error) => {
                        self.document_failed(index, error.to_string());
                        break;
                    }
                }
            }
        }
    }

    fn document_failed(&mut self, document: usize, message: String) {
        warn!(document, error = %message, "Failed to decode policy document");
        self.report
            .errors
            .push(PolicyError::Document { document, message });
    }

    fn expand_document(&mut self, index: usize, document: Value) {
        match document {
            // Empty documents, e.g. a leading "---".
            Value::Null => return,
            Value::Array(documents) => {
                for document in documents {
                    self.expand_document(index, document);
                }
                return;
            }
            _ => (),
        }

        let document: RbacDocument = match serde_json::from_value(document) {
            Ok(document) => document,
            Err(error) => {
                self.document_failed(index, error.to_string());
                return;
            }
        };
        self.report.documents += 1;

        let kind = document.kind.as_deref().unwrap_or_default();
        let name = document
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.name.as_deref())
            .unwrap_or_default();
        info!(document = index, kind, name, "Processing policy document");

        if let Some(items) = document.items {
            for item in items {
                self.expand_document(index, item);
            }
        }

        let Some(rules) = document.rules else {
            debug!(document = index, kind, name, "Policy document has no rules");
            return;
        };
        for (position, rule) in rules.into_iter().enumerate() {
            let rule: PolicyRule = match serde_json::from_value(rule) {
                Ok(rule) => rule,
                Err(error) => {
                    warn!(document = index, rule = position, error = %error, "Failed to decode rule, skipping the rest of the document");
                    self.report.errors.push(PolicyError::Rule {
                        document: index,
                        rule: position,
                        message: error.to_string(),
                    });
                    break;
                }
            };
            self.report.rules += 1;
            self.expand_rule(&rule);
        }
    }

    pub fn expand_rule(&mut self, rule: &PolicyRule) {
        // A probe without an object name is denied by a rule limited to named objects.
        if rule
            .resource_names
            .as_ref()
            .is_some_and(|names| !names.is_empty())
        {
            warn!(resources = ?rule.resources, resource_names = ?rule.resource_names, "Skipping rule restricted to resource names");
            self.report.skipped_rules += 1;
            return;
        }
        let (Some(api_groups), Some(resources)) = (&rule.api_groups, &rule.resources) else {
            debug!(non_resource_urls = ?rule.non_resource_urls, "Skipping rule without api groups or resources");
            self.report.skipped_rules += 1;
            return;
        };

        let grants = GroupTargets::resolve(self.catalog, api_groups, &mut self.report)
            .resources(resources, &mut self.report)
            .grants(&rule.verbs, &mut self.report);

        for Grant { target, verbs } in grants {
            if verbs.is_empty() {
                debug!(group = target.group, resource = target.name, "No verbs left to grant");
                continue;
            }
            self.policy.merge(Merge::Resource {
                group: target.group,
                name: target.name,
                entry: target.entry,
                verbs: Some(verbs),
            });
        }
    }

    pub fn finish(self) -> (RuleSet, ExpansionReport) {
        (self.policy, self.report)
    }
}

pub fn expand_policy(catalog: &CatalogIndex, text: &str) -> (RuleSet, ExpansionReport) {
    let mut expander = PolicyExpander::new(catalog);
    expander.expand_str(text);
    expander.finish()
}

#[cfg(test)]
mod test {
    use super::*;

    fn catalog() -> CatalogIndex {
        let text = std::fs::read_to_string("src/rules/testfiles/api_resources.txt")
            .expect("missing catalog fixture");
        CatalogIndex::parse(&text).expect("catalog fixture to parse")
    }

    fn policy_file(name: &str) -> String {
        std::fs::read_to_string(format!("src/rules/testfiles/{name}"))
            .expect("missing policy fixture")
    }

    fn verbs(verbs: &[&str]) -> BTreeSet<Verb> {
        verbs.iter().map(|v| v.parse().unwrap()).collect()
    }

    #[test]
    fn test_expand_clusterrole() {
        let catalog = catalog();
        let (policy, report) = expand_policy(&catalog, &policy_file("clusterrole.yaml"));

        let granted: Vec<(&str, &str)> = policy
            .resources()
            .map(|(group, name, _)| (group, name))
            .collect();
        assert_eq!(
            granted,
            vec![
                ("", "configmaps"),
                ("", "pods/exec"),
                ("crd.projectcalico.org", "ippools"),
                ("crd.projectcalico.org", "networksets"),
            ]
        );

        let configmaps = policy.resource("", "configmaps").unwrap();
        assert_eq!(configmaps.verbs, verbs(&["get", "list", "watch", "delete"]));
        assert_eq!(configmaps.short_names, BTreeSet::from(["cm".to_string()]));
        assert_eq!(configmaps.kind, "ConfigMap");

        // list and watch are not served by pods/exec
        let exec = policy.resource("", "pods/exec").unwrap();
        assert_eq!(exec.verbs, verbs(&["get"]));
        assert_eq!(exec.subresource, "exec");
        assert_eq!(
            report.dropped_verbs,
            BTreeSet::from([
                ("".to_string(), "pods/exec".to_string(), "list".to_string()),
                ("".to_string(), "pods/exec".to_string(), "watch".to_string()),
            ])
        );

        let ippools = policy.resource("crd.projectcalico.org", "ippools").unwrap();
        assert_eq!(
            &ippools.verbs,
            &catalog
                .resource("crd.projectcalico.org", "ippools")
                .unwrap()
                .verbs
        );
        assert!(!ippools.namespaced);

        let networksets = policy
            .resource("crd.projectcalico.org", "networksets")
            .unwrap();
        assert_eq!(networksets.verbs, verbs(&["get", "watch", "list"]));

        assert_eq!(report.documents, 1);
        assert_eq!(report.rules, 4);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_expand_all_star() {
        let catalog = catalog();
        let (policy, report) = expand_policy(&catalog, &policy_file("all_star_clusterrole.yaml"));
        assert_eq!(&policy, catalog.rules());
        assert!(report.dropped_verbs.is_empty());
    }

    #[test]
    fn test_expand_accumulates_documents_and_tolerates_unknowns() {
        let catalog = catalog();
        let (policy, report) = expand_policy(&catalog, &policy_file("split_roles.yaml"));

        assert_eq!(
            policy.resource("", "configmaps").unwrap().verbs,
            verbs(&["create", "get", "list"])
        );
        assert_eq!(
            policy.resource("apps", "statefulsets").unwrap().verbs,
            verbs(&["get", "list"])
        );
        assert_eq!(policy.verb_count(), 5);
        assert!(policy.group("monitoring.coreos.com").is_none());
        assert!(policy.resource("", "pods").is_none());

        assert_eq!(report.documents, 2);
        assert_eq!(report.rules, 5);
        assert_eq!(report.skipped_rules, 2);
        assert_eq!(
            report.unknown_groups,
            BTreeSet::from(["monitoring.coreos.com".to_string()])
        );
        assert_eq!(
            report.unknown_resources,
            BTreeSet::from([
                ("".to_string(), "secrets".to_string()),
                ("".to_string(), "statefulsets".to_string()),
                ("apps".to_string(), "configmaps".to_string()),
                ("apps".to_string(), "secrets".to_string()),
            ])
        );
        assert_eq!(
            report.dropped_verbs,
            BTreeSet::from([(
                "".to_string(),
                "configmaps".to_string(),
                "escalate".to_string()
            )])
        );
    }

    #[test]
    fn test_wildcard_group_does_not_report_missing_resources() {
        let catalog = catalog();
        let text = r#"
rules:
- apiGroups: ["*"]
  resources: ["pods", "endpointslices"]
  verbs: ["get"]
"#;
        let (policy, report) = expand_policy(&catalog, text);
        assert_eq!(policy.resource("", "pods").unwrap().verbs, verbs(&["get"]));
        assert_eq!(
            policy
                .resource("discovery.k8s.io", "endpointslices")
                .unwrap()
                .verbs,
            verbs(&["get"])
        );
        assert!(report.unknown_resources.is_empty());
        assert!(report.unknown_groups.is_empty());

        // Named groups still report what they lack.
        let text = r#"
rules:
- apiGroups: ["", "apps"]
  resources: ["pods"]
  verbs: ["get"]
"#;
        let (_, report) = expand_policy(&catalog, text);
        assert_eq!(
            report.unknown_resources,
            BTreeSet::from([("apps".to_string(), "pods".to_string())])
        );
    }

    #[test]
    fn test_yaml_document_decode_failure_keeps_merged_entries() {
        let catalog = catalog();
        let text = r#"
rules:
- apiGroups: [""]
  resources: ["pods"]
  verbs: ["get"]
---
rules:
- apiGroups: [""]
  resources: ["configmaps"
  verbs: ["get"]
"#;
        let (policy, report) = expand_policy(&catalog, text);
        assert_eq!(policy.resource("", "pods").unwrap().verbs, verbs(&["get"]));
        assert!(policy.resource("", "configmaps").is_none());
        assert_eq!(report.documents, 1);
        assert!(matches!(
            report.errors.as_slice(),
            [PolicyError::Document { document: 1, .. }]
        ));
    }

    #[test]
    fn test_expand_only_a_lone_star_is_a_wildcard() {
        let catalog = catalog();
        let text = r#"
rules:
- apiGroups: ["*", "apps"]
  resources: ["statefulsets"]
  verbs: ["get"]
- apiGroups: [""]
  resources: ["*"]
  verbs: ["get", "*"]
"#;
        let (policy, report) = expand_policy(&catalog, text);
        assert_eq!(
            policy.resource("apps", "statefulsets").unwrap().verbs,
            verbs(&["get"])
        );
        assert!(report.unknown_groups.contains("*"));
        // Every core resource serves get; "*" next to it is an unknown verb.
        for (group, name, entry) in policy.resources().filter(|(group, _, _)| group.is_empty()) {
            assert_eq!(entry.verbs, verbs(&["get"]), "{group}/{name}");
        }
        assert_eq!(policy.group("").unwrap().resources.len(), 3);
    }

    #[test]
    fn test_expand_json_stream() {
        let catalog = catalog();
        let text = r#"
{"kind": "ClusterRole", "metadata": {"name": "a"}, "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]}
{"kind": "List", "items": [{"kind": "Role", "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["list"]}]}]}
"#;
        let (policy, report) = expand_policy(&catalog, text);
        assert_eq!(
            policy.resource("", "pods").unwrap().verbs,
            verbs(&["get", "list"])
        );
        assert_eq!(report.documents, 3);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_rule_decode_failure_stops_document() {
        let catalog = catalog();
        let text = r#"
rules:
- apiGroups: [""]
  resources: ["configmaps"]
  verbs: ["get"]
- apiGroups: [""]
  resources: ["pods"]
  verbs: get
- apiGroups: [""]
  resources: ["pods"]
  verbs: ["list"]
---
rules:
- apiGroups: ["apps"]
  resources: ["statefulsets"]
  verbs: ["watch"]
"#;
        let (policy, report) = expand_policy(&catalog, text);
        assert_eq!(
            policy.resource("", "configmaps").unwrap().verbs,
            verbs(&["get"])
        );
        assert!(policy.resource("", "pods").is_none());
        assert_eq!(
            policy.resource("apps", "statefulsets").unwrap().verbs,
            verbs(&["watch"])
        );
        assert!(matches!(
            report.errors.as_slice(),
            [PolicyError::Rule {
                document: 0,
                rule: 1,
                ..
            }]
        ));
    }

    #[test]
    fn test_document_decode_failure_keeps_merged_entries() {
        let catalog = catalog();
        let text = r#"{"rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]}
{"rules": [{"apiGroups": [""], "resources": ["configmaps"]"#;
        let (policy, report) = expand_policy(&catalog, text);
        assert_eq!(policy.resource("", "pods").unwrap().verbs, verbs(&["get"]));
        assert!(policy.resource("", "configmaps").is_none());
        assert!(matches!(
            report.errors.as_slice(),
            [PolicyError::Document { document: 1, .. }]
        ));
    }

    #[test]
    fn test_expand_is_idempotent() {
        let catalog = catalog();
        let text = policy_file("clusterrole.yaml");
        let mut expander = PolicyExpander::new(&catalog);
        expander.expand_str(&text);
        expander.expand_str(&text);
        let (twice, _) = expander.finish();
        let (once, _) = expand_policy(&catalog, &text);
        assert_eq!(twice, once);
    }
}

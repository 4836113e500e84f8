use std::collections::BTreeSet;

use super::catalog::CatalogIndex;
use super::types::{Merge, RuleSet};
use super::verb::Verb;

/// Subtracts the allowed rules from the catalog; what is left is forbidden.
///
/// * an api group the policy does not mention is forbidden as a whole,
/// * a resource the policy does not mention within a mentioned group is forbidden as a whole,
/// * a resource the policy mentions keeps only the verbs the policy does not grant, if any.
///
/// Every (group, resource, verb) of the catalog ends up in exactly one of `policy` and the result.
pub fn forbidden_rules(catalog: &CatalogIndex, policy: &RuleSet) -> RuleSet {
    let mut forbidden = RuleSet::new();

    for (group, catalog_group) in catalog.groups() {
        let Some(policy_group) = policy.group(group) else {
            forbidden.merge(Merge::Group {
                group,
                rules: catalog_group,
            });
            continue;
        };

        for (name, entry) in &catalog_group.resources {
            match policy_group.resources.get(name) {
                None => forbidden.merge(Merge::Resource {
                    group,
                    name,
                    entry,
                    verbs: None,
                }),
                Some(granted) => {
                    let missing: BTreeSet<Verb> =
                        entry.verbs.difference(&granted.verbs).cloned().collect();
                    if !missing.is_empty() {
                        forbidden.merge(Merge::Resource {
                            group,
                            name,
                            entry,
                            verbs: Some(missing),
                        });
                    }
                }
            }
        }
    }

    forbidden
}

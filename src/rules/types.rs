use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::verb::Verb;

/// Metadata of one catalog resource, keyed by its (possibly compound) name, e.g. "pods" or "pods/exec".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    // "exec" for "pods/exec", empty for top-level resources
    pub subresource: String,
    // In catalog scan order.
    #[serde(rename = "version")]
    pub versions: Vec<String>,
    pub short_names: BTreeSet<String>,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: BTreeSet<Verb>,
}

impl ResourceEntry {
    pub fn with_verbs(&self, verbs: BTreeSet<Verb>) -> Self {
        Self {
            verbs,
            ..self.clone()
        }
    }
}

/// Splits a resource key into the resource and subresource parts: "pods/exec" => ("pods", "exec").
pub fn split_resource_name(name: &str) -> (&str, &str) {
    name.split_once('/').unwrap_or((name, ""))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiGroupRules {
    pub resources: BTreeMap<String, ResourceEntry>,
}

/// api-group => resource name => entry. The empty group is the core group.
///
/// The same shape holds the resource catalog, the expanded policy and the forbidden complement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet(BTreeMap<String, ApiGroupRules>);

/// The two ways entries get into a [`RuleSet`].
pub enum Merge<'a> {
    /// Every resource of an api group, with all of its verbs.
    Group {
        group: &'a str,
        rules: &'a ApiGroupRules,
    },
    /// One resource. `verbs` replaces the entry's own verbs when given.
    Resource {
        group: &'a str,
        name: &'a str,
        entry: &'a ResourceEntry,
        verbs: Option<BTreeSet<Verb>>,
    },
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn group(&self, group: &str) -> Option<&ApiGroupRules> {
        self.0.get(group)
    }

    pub(crate) fn group_key_value(&self, group: &str) -> Option<(&String, &ApiGroupRules)> {
        self.0.get_key_value(group)
    }

    pub(crate) fn group_mut(&mut self, group: &str) -> &mut ApiGroupRules {
        self.0.entry(group.to_string()).or_default()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &ApiGroupRules)> {
        self.0.iter()
    }

    pub fn resource(&self, group: &str, name: &str) -> Option<&ResourceEntry> {
        self.group(group)?.resources.get(name)
    }

    /// All (group, resource name, entry) triples in lexicographic order.
    pub fn resources(&self) -> impl Iterator<Item = (&str, &str, &ResourceEntry)> {
        self.0.iter().flat_map(|(group, rules)| {
            rules
                .resources
                .iter()
                .map(move |(name, entry)| (group.as_str(), name.as_str(), entry))
        })
    }

    pub fn contains(&self, group: &str, name: &str, verb: &Verb) -> bool {
        self.resource(group, name)
            .is_some_and(|entry| entry.verbs.contains(verb))
    }

    /// Number of (group, resource, verb) triples.
    pub fn verb_count(&self) -> usize {
        self.resources().map(|(_, _, entry)| entry.verbs.len()).sum()
    }

    /// Merges entries in. Merging never removes access: verbs of a resource that is
    /// already present are unioned with the incoming ones.
    pub fn merge(&mut self, merge: Merge<'_>) {
        match merge {
            Merge::Group { group, rules } => {
                self.group_mut(group);
                for (name, entry) in &rules.resources {
                    self.merge(Merge::Resource {
                        group,
                        name,
                        entry,
                        verbs: None,
                    });
                }
            }
            Merge::Resource {
                group,
                name,
                entry,
                verbs,
            } => {
                let verbs = verbs.unwrap_or_else(|| entry.verbs.clone());
                match self.group_mut(group).resources.entry(name.to_string()) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(entry.with_verbs(verbs));
                    }
                    Entry::Occupied(mut occupied) => {
                        occupied.get_mut().verbs.extend(verbs);
                    }
                }
            }
        }
    }
}

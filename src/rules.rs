use std::path::Path;

use tracing::info;

mod catalog;
mod diff;
mod err;
mod policy;
mod types;
mod verb;

pub use catalog::CatalogIndex;
pub use diff::forbidden_rules;
pub use err::{CatalogError, ParseError, PolicyError, RuleError};
pub use policy::{expand_policy, ExpansionReport, PolicyExpander};
pub use types::{split_resource_name, ApiGroupRules, Merge, ResourceEntry, RuleSet};
pub use verb::{StarWildcardSelector, Verb};

// Pipeline:
// 1. Parse the resource catalog (kubectl api-resources style) into a CatalogIndex
// 2. Expand the RBAC rules against the catalog, wildcards included => allowed rules
// 3. Subtract the allowed rules from the catalog => forbidden rules

/// Everything one verification run knows about a catalog and a policy.
///
/// Built from scratch for every run; nothing is shared between runs.
#[derive(Debug)]
pub struct RuleVerification {
    catalog: CatalogIndex,
    allowed: RuleSet,
    forbidden: RuleSet,
    report: ExpansionReport,
}

impl RuleVerification {
    pub fn new(catalog: CatalogIndex, policy: &str) -> Self {
        let (allowed, report) = expand_policy(&catalog, policy);
        let forbidden = forbidden_rules(&catalog, &allowed);
        info!(
            allowed = allowed.verb_count(),
            forbidden = forbidden.verb_count(),
            unknown_groups = report.unknown_groups.len(),
            unknown_resources = report.unknown_resources.len(),
            dropped_verbs = report.dropped_verbs.len(),
            errors = report.errors.len(),
            "Processed RBAC rules"
        );
        Self {
            catalog,
            allowed,
            forbidden,
            report,
        }
    }

    pub fn from_files(
        catalog_path: impl AsRef<Path>,
        policy_path: impl AsRef<Path>,
    ) -> Result<Self, RuleError> {
        let catalog_path = catalog_path.as_ref();
        let catalog_text = read_file(catalog_path)?;
        let catalog = CatalogIndex::parse(&catalog_text).map_err(|source| RuleError::Catalog {
            path: catalog_path.to_owned(),
            source,
        })?;
        let policy = read_file(policy_path.as_ref())?;
        Ok(Self::new(catalog, &policy))
    }

    pub fn catalog(&self) -> &CatalogIndex {
        &self.catalog
    }

    pub fn allowed(&self) -> &RuleSet {
        &self.allowed
    }

    pub fn forbidden(&self) -> &RuleSet {
        &self.forbidden
    }

    pub fn report(&self) -> &ExpansionReport {
        &self.report
    }
}

fn read_file(path: &Path) -> Result<String, RuleError> {
    std::fs::read_to_string(path).map_err(|source| RuleError::Io {
        path: path.to_owned(),
        source,
    })
}

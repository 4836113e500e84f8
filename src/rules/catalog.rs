use std::collections::btree_map::Entry;
use std::collections::BTreeSet;
use std::ops::Deref;

use super::err::{CatalogError, Result};
use super::types::{split_resource_name, ResourceEntry, RuleSet};
use super::verb::Verb;

// Columns following NAME, in the order `kubectl api-resources -o wide` prints them.
const COLUMN_MARKERS: [&str; 5] = ["SHORTNAMES", "APIVERSION", "NAMESPACED", "KIND", "VERBS"];

// Newer kubectl versions print a trailing CATEGORIES column.
const TRAILING_MARKER: &str = "CATEGORIES";

/// Every resource the cluster exposes, indexed by api-group and resource name.
///
/// Names are assumed unique within an api-group across versions, so a resource served in
/// several versions (e.g. endpointslices in v1 and v1beta1) is a single entry listing all of
/// them. RBAC rules do not distinguish versions either.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogIndex(RuleSet);

impl Deref for CatalogIndex {
    type Target = RuleSet;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

struct ColumnRuler {
    offsets: [usize; 5],
    end: Option<usize>,
}

struct CatalogRow<'l> {
    name: &'l str,
    short_names: &'l str,
    api_version: &'l str,
    namespaced: &'l str,
    kind: &'l str,
    verbs: &'l str,
}

fn is_header(line: &str) -> bool {
    line.starts_with("NAME") && line.contains("VERBS")
}

impl ColumnRuler {
    fn from_header(header: &str) -> Result<Self> {
        let mut offsets = [0; 5];
        let mut previous = 0;
        for (offset, marker) in offsets.iter_mut().zip(COLUMN_MARKERS) {
            let found = header
                .find(marker)
                .ok_or(CatalogError::MissingColumn(marker))?;
            if found <= previous {
                return Err(CatalogError::ColumnOutOfOrder(marker));
            }
            *offset = found;
            previous = found;
        }
        let end = header.find(TRAILING_MARKER).filter(|end| *end > previous);
        Ok(Self { offsets, end })
    }

    fn slice<'l>(&self, line: &'l str, line_no: usize) -> Result<CatalogRow<'l>> {
        let [shortnames, apiversion, namespaced, kind, verbs] = self.offsets;
        // The VERBS column is never empty ("[]" at least), so a line must reach into it.
        if line.len() <= verbs {
            return Err(CatalogError::MalformedLine {
                line: line_no,
                content: line.to_string(),
            });
        }
        let cell = |from: usize, to: Option<usize>| {
            let cell = match to {
                Some(to) => line.get(from..to.min(line.len())),
                None => line.get(from..),
            };
            cell.map(str::trim).ok_or_else(|| CatalogError::MalformedLine {
                line: line_no,
                content: line.to_string(),
            })
        };
        Ok(CatalogRow {
            name: cell(0, Some(shortnames))?,
            short_names: cell(shortnames, Some(apiversion))?,
            api_version: cell(apiversion, Some(namespaced))?,
            namespaced: cell(namespaced, Some(kind))?,
            kind: cell(kind, Some(verbs))?,
            verbs: cell(verbs, self.end)?,
        })
    }
}

impl CatalogRow<'_> {
    /// Returns (api group, version, resource name, entry).
    fn into_entry(self, line_no: usize) -> Result<(String, String, String, ResourceEntry)> {
        if self.name.is_empty() {
            return Err(CatalogError::EmptyColumn {
                line: line_no,
                column: "NAME",
            });
        }
        if self.api_version.is_empty() {
            return Err(CatalogError::EmptyColumn {
                line: line_no,
                column: "APIVERSION",
            });
        }

        // "v1" and "/v1" are the core group; "apps/v1" is group "apps", version "v1".
        let (group, version) = self.api_version.rsplit_once('/').unwrap_or(("", self.api_version));

        let namespaced = match self.namespaced {
            "true" => true,
            "false" => false,
            value => {
                return Err(CatalogError::InvalidNamespaced {
                    line: line_no,
                    value: value.to_string(),
                })
            }
        };

        let verbs = self
            .verbs
            .trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace())
            .split_whitespace()
            .map(|verb| {
                verb.parse::<Verb>()
                    .map_err(|source| CatalogError::InvalidVerb {
                        line: line_no,
                        source,
                    })
            })
            .collect::<Result<BTreeSet<Verb>>>()?;

        let short_names = self
            .short_names
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let (_, subresource) = split_resource_name(self.name);

        Ok((
            group.to_string(),
            version.to_string(),
            self.name.to_string(),
            ResourceEntry {
                subresource: subresource.to_string(),
                versions: vec![version.to_string()],
                short_names,
                kind: self.kind.to_string(),
                namespaced,
                verbs,
            },
        ))
    }
}

impl CatalogIndex {
    /// Parses `kubectl api-resources -o wide` style output: a header naming the columns,
    /// optional `#` comment lines, and one resource (or "resource/subresource") per line.
    /// Column boundaries are taken from the header; any line that does not fit them is an error.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = RuleSet::new();
        let mut ruler: Option<ColumnRuler> = None;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            // Concatenated listings repeat the header; columns may move between them.
            if is_header(line) {
                ruler = Some(ColumnRuler::from_header(line)?);
                continue;
            }
            let Some(columns) = &ruler else {
                return Err(CatalogError::MissingHeader);
            };

            let (group, version, name, entry) = columns.slice(line, line_no)?.into_entry(line_no)?;
            match rules.group_mut(&group).resources.entry(name) {
                Entry::Vacant(vacant) => {
                    vacant.insert(entry);
                }
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut();
                    if !existing.versions.contains(&version) {
                        existing.versions.push(version);
                    }
                    existing.verbs.extend(entry.verbs);
                    existing.short_names.extend(entry.short_names);
                }
            }
        }

        match ruler {
            Some(_) => Ok(Self(rules)),
            None => Err(CatalogError::MissingHeader),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.0
    }
}

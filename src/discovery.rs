use anyhow::{anyhow, Result};
use itertools::Itertools;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use kube::client::Client;
use kube::config::Config;
use tracing::debug;

const HEADER: [&str; 6] = ["NAME", "SHORTNAMES", "APIVERSION", "NAMESPACED", "KIND", "VERBS"];

// Spaces between the widest cell of a column and the next column.
const COLUMN_GAP: usize = 3;

/// Fetches the resource lists the API server advertises through discovery.
pub struct ApiResourceGetter {
    client: Client,
}

impl ApiResourceGetter {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::try_from(config)?;
        Ok(ApiResourceGetter { client })
    }

    /// Returns one list per served group version, core versions first, subresources included.
    pub async fn api_resource_lists(&self) -> Result<Vec<APIResourceList>> {
        let mut lists = Vec::new();

        let core = self
            .client
            .list_core_api_versions()
            .await
            .map_err(|e| anyhow!("Failed to list core API versions: {}", e))?;
        for version in &core.versions {
            debug!(group_version = %version, "Fetching API resource list");
            let list = self
                .client
                .list_core_api_resources(version)
                .await
                .map_err(|e| anyhow!("Failed to get API resource list for {version}: {}", e))?;
            lists.push(list);
        }

        let groups = self
            .client
            .list_api_groups()
            .await
            .map_err(|e| anyhow!("Failed to list API groups: {}", e))?;
        for group in &groups.groups {
            for version in &group.versions {
                debug!(group_version = %version.group_version, "Fetching API resource list");
                let list = self
                    .client
                    .list_api_group_resources(&version.group_version)
                    .await
                    .map_err(|e| {
                        anyhow!(
                            "Failed to get API resource list for {}: {}",
                            version.group_version,
                            e
                        )
                    })?;
                lists.push(list);
            }
        }

        Ok(lists)
    }
}

fn catalog_row(group_version: &str, resource: &APIResource) -> [String; 6] {
    [
        resource.name.clone(),
        resource.short_names.iter().flatten().join(","),
        group_version.to_string(),
        resource.namespaced.to_string(),
        resource.kind.clone(),
        format!("[{}]", resource.verbs.iter().join(" ")),
    ]
}

fn push_row<'a>(out: &mut String, widths: &[usize; 6], cells: impl IntoIterator<Item = &'a str>) {
    let line = cells
        .into_iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}", width = width + COLUMN_GAP))
        .join("");
    out.push_str(line.trim_end());
    out.push('\n');
}

/// Formats resource lists the way `kubectl api-resources -o wide` prints them, one row per
/// resource and subresource, so the result can be read back as a catalog.
pub fn render_catalog(lists: &[APIResourceList]) -> String {
    let rows: Vec<[String; 6]> = lists
        .iter()
        .flat_map(|list| {
            list.resources
                .iter()
                .map(|resource| catalog_row(&list.group_version, resource))
        })
        .collect();

    let mut widths = HEADER.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::from("# Generated by catalog-gen from the discovery API\n");
    push_row(&mut out, &widths, HEADER);
    for row in &rows {
        push_row(&mut out, &widths, row.iter().map(String::as_str));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rules::{CatalogIndex, Verb};

    const CORE_V1: &str = r#"{
        "kind": "APIResourceList",
        "groupVersion": "v1",
        "resources": [
            {"name": "pods", "singularName": "pod", "namespaced": true, "kind": "Pod",
             "verbs": ["create", "delete", "deletecollection", "get", "list", "patch", "update", "watch"],
             "shortNames": ["po"], "categories": ["all"]},
            {"name": "pods/exec", "singularName": "", "namespaced": true, "kind": "PodExecOptions",
             "verbs": ["create", "get"]},
            {"name": "nodes", "singularName": "node", "namespaced": false, "kind": "Node",
             "verbs": ["create", "delete", "deletecollection", "get", "list", "patch", "update", "watch"],
             "shortNames": ["no"]}
        ]
    }"#;

    const APPS_V1: &str = r#"{
        "kind": "APIResourceList",
        "groupVersion": "apps/v1",
        "resources": [
            {"name": "deployments", "singularName": "deployment", "namespaced": true, "kind": "Deployment",
             "verbs": ["create", "delete", "deletecollection", "get", "list", "patch", "update", "watch"],
             "shortNames": ["deploy"]},
            {"name": "deployments/scale", "singularName": "", "namespaced": true, "group": "autoscaling",
             "version": "v1", "kind": "Scale", "verbs": ["get", "patch", "update"]}
        ]
    }"#;

    fn lists() -> Vec<APIResourceList> {
        [CORE_V1, APPS_V1]
            .iter()
            .map(|json| serde_json::from_str(json).expect("failed to deserialize APIResourceList"))
            .collect()
    }

    #[test]
    fn test_render_catalog_parses_back() {
        let text = render_catalog(&lists());
        let catalog = CatalogIndex::parse(&text).expect("rendered catalog to parse");

        assert_eq!(catalog.groups().count(), 2);
        assert_eq!(catalog.resources().count(), 5);

        let exec = catalog.resource("", "pods/exec").unwrap();
        assert_eq!(exec.subresource, "exec");
        assert_eq!(exec.kind, "PodExecOptions");
        assert!(exec.namespaced);

        let nodes = catalog.resource("", "nodes").unwrap();
        assert!(!nodes.namespaced);
        assert!(nodes.short_names.contains("no"));

        // The RBAC group of a subresource is the group of the list, not of its kind.
        let scale = catalog.resource("apps", "deployments/scale").unwrap();
        assert_eq!(scale.versions, vec!["v1"]);
        assert_eq!(scale.verbs.len(), 3);
        assert!(scale.verbs.contains(&Verb::Patch));
        assert!(catalog.group("autoscaling").is_none());
    }

    #[test]
    fn test_render_catalog_layout() {
        let text = render_catalog(&lists());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with('#'));
        assert!(lines[1].starts_with("NAME"));
        assert_eq!(lines.len(), 7);

        // Every column starts at the same offset on every line.
        let verbs_at = lines[1].find("VERBS").unwrap();
        for line in &lines[2..] {
            assert_eq!(line.find('['), Some(verbs_at), "{line}");
            assert_eq!(line.trim_end(), *line);
        }
        assert!(lines[2].starts_with("pods "));
        assert!(lines[2].ends_with("[create delete deletecollection get list patch update watch]"));
    }

    #[test]
    fn test_render_empty() {
        let text = render_catalog(&[]);
        let catalog = CatalogIndex::parse(&text).expect("header only catalog to parse");
        assert!(catalog.is_empty());
    }
}

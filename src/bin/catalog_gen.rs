use anyhow::Result;
use kube::config::Config;

use kubernetes_rbac_verifier::discovery::{render_catalog, ApiResourceGetter};
use kubernetes_rbac_verifier::rules::CatalogIndex;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::infer().await?;
    eprintln!("Discovering API resources of {}", config.cluster_url);

    let getter = ApiResourceGetter::new(config)?;
    let lists = getter.api_resource_lists().await?;
    for list in &lists {
        eprintln!(
            "Fetched API resource list: {} ({} resources)",
            list.group_version,
            list.resources.len()
        );
    }

    let catalog = render_catalog(&lists);
    // Refuse to print something the verifier could not read back.
    CatalogIndex::parse(&catalog)?;

    print!("{catalog}");
    Ok(())
}

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::Parser;
use itertools::Itertools;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kubernetes_rbac_verifier::review::{verify, ClusterAccessReviewer, ProbePlan, ReviewError};
use kubernetes_rbac_verifier::rules::{RuleError, RuleVerification};

/// Verify that the current Kubernetes identity can do exactly what an RBAC policy grants:
/// everything the policy allows is allowed, everything else in the catalog is denied.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the kubeconfig file; inferred from the environment when unset
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Resource catalog, as printed by `kubectl api-resources -o wide` or `catalog-gen`
    #[arg(long, env = "RBAC_VERIFY_API_RESOURCES")]
    api_resources: PathBuf,

    /// Role/ClusterRole YAML (or JSON) granting the access to verify
    #[arg(long, env = "RBAC_VERIFY_RBAC_YAML")]
    rbac_yaml: PathBuf,

    /// Namespaces to verify, separated by ","
    #[arg(
        long,
        env = "RBAC_VERIFY_NAMESPACE",
        default_value = "smoke-test",
        value_delimiter = ','
    )]
    namespace: Vec<String>,

    #[arg(long, env = "RBAC_VERIFY_LOG_FILE", default_value = "./rbac_verify.log")]
    log_file: PathBuf,

    /// Print the allowed and forbidden rules as JSON instead of asking the cluster
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => (),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Verification failed: {e}");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_logging(log_file: &Path) -> Result<(), SetupError> {
    let file = File::create(log_file).map_err(|error| SetupError::LogFile {
        path: log_file.to_owned(),
        error,
    })?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

async fn client_config(kubeconfig: Option<&Path>) -> Result<Config, SetupError> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Ok(Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?)
        }
        None => Ok(Config::infer().await?),
    }
}

/// Returns whether every probe in every namespace got the expected answer.
async fn run(cli: Cli) -> Result<bool, SetupError> {
    init_logging(&cli.log_file)?;

    let namespaces: Vec<&str> = cli
        .namespace
        .iter()
        .map(|ns| ns.trim())
        .filter(|ns| !ns.is_empty())
        .unique()
        .collect();
    if namespaces.is_empty() {
        return Err(SetupError::NoNamespaces);
    }

    if cli.dry_run {
        let verification = RuleVerification::from_files(&cli.api_resources, &cli.rbac_yaml)?;
        report_expansion(&verification);
        let rules = serde_json::json!({
            "allowed": verification.allowed(),
            "forbidden": verification.forbidden(),
        });
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(true);
    }

    let config = client_config(cli.kubeconfig.as_deref()).await?;
    info!(cluster = %config.cluster_url, "Connecting to cluster");
    let reviewer = ClusterAccessReviewer::new(kube::Client::try_from(config)?);

    let mut success = true;
    for namespace in namespaces {
        // Every namespace starts over from the files.
        let verification = RuleVerification::from_files(&cli.api_resources, &cli.rbac_yaml)?;
        report_expansion(&verification);

        let plan = ProbePlan::new(&verification, namespace);
        info!(namespace, probes = plan.len(), "Verifying access");
        let report = verify(&reviewer, &plan).await?;

        for outcome in report.failures() {
            println!(
                "FAILED {}: expected {}, got {}",
                outcome.probe,
                outcome.expectation,
                if outcome.verdict.allowed { "allowed" } else { "denied" },
            );
        }
        println!(
            "{namespace}: {} passed, {} failed",
            report.passed(),
            report.failed()
        );
        success &= report.is_success();
    }
    Ok(success)
}

fn report_expansion(verification: &RuleVerification) {
    let report = verification.report();
    if !report.unknown_groups.is_empty() {
        let groups = report.unknown_groups.iter().join(", ");
        warn!(%groups, "Policy mentions api groups missing from the catalog");
    }
    if !report.unknown_resources.is_empty() {
        let resources = report
            .unknown_resources
            .iter()
            .map(|(group, resource)| format!("{group}/{resource}"))
            .join(", ");
        warn!(%resources, "Policy mentions resources missing from the catalog");
    }
    for e in &report.errors {
        warn!(error = %e, "Policy was only partially read");
    }
}

#[derive(thiserror::Error, Debug)]
enum SetupError {
    #[error("Failed to create log file {path:?}: {error}")]
    LogFile {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("No namespace to verify")]
    NoNamespaces,
    #[error("Failed to read kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),
    #[error("Failed to infer kubeconfig: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),
    #[error("Failed to create Kubernetes client: {0}")]
    KubernetesClientFailed(#[from] kube::Error),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error("Failed to print rules: {0}")]
    Json(#[from] serde_json::Error),
}

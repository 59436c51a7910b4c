//! Slipway submit - send a job to a Kubernetes cluster

use clap::Parser;
use kube::Client;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slipway::config::{keys, SubmissionConfig};
use slipway::locator::Locator;
use slipway::submit::creator::KubeClusterApi;
use slipway::submit::staged::HttpStagingClient;
use slipway::submit::{SubmissionPipeline, SubmissionRequest};

/// Submit a distributed-compute job to a Kubernetes cluster
#[derive(Parser, Debug)]
#[command(name = "slipway-submit", version, about, long_about = None)]
struct Cli {
    /// Kubernetes namespace for the driver and its supporting resources
    #[arg(long)]
    namespace: Option<String>,

    /// Driver container image
    #[arg(long)]
    image: Option<String>,

    /// Staging endpoint URI for locally-resident dependencies
    #[arg(long)]
    staging_uri: Option<String>,

    /// Extra configuration entries, repeatable
    #[arg(long = "conf", value_name = "KEY=VALUE")]
    conf: Vec<String>,

    /// Comma-separated jar dependency locators
    #[arg(long)]
    jars: Option<String>,

    /// Comma-separated file dependency locators
    #[arg(long)]
    files: Option<String>,

    /// Primary application artifact
    primary_artifact: String,

    /// Job entry class
    main_class: String,

    /// Arguments passed to the job
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn parse_locator_csv(raw: Option<&str>) -> Vec<Locator> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Locator::parse)
            .collect()
    })
    .unwrap_or_default()
}

fn build_config(cli: &Cli) -> anyhow::Result<SubmissionConfig> {
    let mut config = SubmissionConfig::default();
    for entry in &cli.conf {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--conf entry '{}' is not of the form key=value", entry))?;
        config = config.with_entry(key.trim(), value.trim());
    }
    if let Some(namespace) = &cli.namespace {
        config = config.with_entry(keys::NAMESPACE, namespace);
    }
    if let Some(image) = &cli.image {
        config = config.with_entry(keys::CONTAINER_IMAGE, image);
    }
    if let Some(uri) = &cli.staging_uri {
        config = config.with_entry(keys::STAGING_URI, uri);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let request = SubmissionRequest {
        main_class: cli.main_class.clone(),
        args: cli.args.clone(),
        primary_artifact: Locator::parse(&cli.primary_artifact),
        jars: parse_locator_csv(cli.jars.as_deref()),
        files: parse_locator_csv(cli.files.as_deref()),
        config,
    };

    // The client handle lives for exactly this invocation and is dropped on
    // every exit path.
    let client = Client::try_default().await?;
    let namespace = request.config.namespace();
    let cluster = KubeClusterApi::new(client, &namespace);
    let staging = HttpStagingClient::new(request.config.staging_uri().unwrap_or_default());

    let pipeline = SubmissionPipeline::new(&cluster, &staging);
    let identity = pipeline.submit(&request).await?;
    info!(driver = %identity.name, uid = %identity.uid, namespace = %namespace, "Job submitted");
    println!("{}", identity.name);
    Ok(())
}

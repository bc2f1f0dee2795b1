//! wimount controller - GCP workload identity federation for Deployments

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use wimount::config::{FederationConfig, DEFAULT_FIELD_MANAGER};
use wimount::controller::{
    error_policy, identities_for_deployment, identities_for_provider, reconcile, Context,
};
use wimount::crd::{Provider, WorkloadIdentity};
use wimount::error::kube_error_is_retryable;
use wimount::retry::{retry_while, RetryConfig};
use wimount::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use wimount::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};

/// wimount - mounts GCP workload identity credentials into Deployments
#[derive(Parser, Debug)]
#[command(name = "wimount", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Controller settings when no subcommand is given
    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// Controller settings from the subcommand, or the top-level flags
    fn into_controller_args(self) -> ControllerArgs {
        match self.command {
            Some(Commands::Controller(args)) => args,
            None => self.controller,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    ///
    /// Watches WorkloadIdentity resources and, for each, generates the
    /// credential ConfigMap and patches the target Deployment.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(clap::Args, Debug)]
struct ControllerArgs {
    /// Field manager used for server-side apply
    #[arg(long, env = "WIMOUNT_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    field_manager: String,

    /// Seconds before retrying when the Provider or Deployment is missing
    #[arg(long, env = "WIMOUNT_RETRY_INTERVAL_SECS", default_value_t = 600)]
    retry_interval_secs: u64,

    /// Apply the CRDs before starting the controller
    #[arg(long, env = "WIMOUNT_INSTALL_CRDS")]
    install_crds: bool,

    /// Listen address for the admission webhook server
    #[arg(long, env = "WIMOUNT_WEBHOOK_ADDR", default_value = wimount::DEFAULT_WEBHOOK_ADDR)]
    webhook_addr: SocketAddr,

    /// PEM certificate for the webhook server
    #[arg(long, env = "WIMOUNT_WEBHOOK_CERT", requires = "webhook_key")]
    webhook_cert: Option<PathBuf>,

    /// PEM private key for the webhook server
    #[arg(long, env = "WIMOUNT_WEBHOOK_KEY", requires = "webhook_cert")]
    webhook_key: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "WIMOUNT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl ControllerArgs {
    fn federation_config(&self) -> FederationConfig {
        FederationConfig::default()
            .with_field_manager(self.field_manager.clone())
            .with_retry_interval(Duration::from_secs(self.retry_interval_secs))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install the aws-lc-rs crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    let args = cli.into_controller_args();

    init_telemetry(TelemetryConfig {
        format: args.log_format,
        ..Default::default()
    })?;

    run_controller(args).await
}

/// Both CRDs as a multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let docs = [WorkloadIdentity::crd(), Provider::crd()]
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
    Ok(docs.join("---\n"))
}

/// Server-side apply the CRDs so their schema matches this binary
async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    for crd in [WorkloadIdentity::crd(), Provider::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let patch = Patch::Apply(&crd);
        tracing::info!(crd = %name, "installing CRD");
        retry_while(
            &RetryConfig::with_max_attempts(10),
            "install_crd",
            || crds.patch(&name, &params, &patch),
            kube_error_is_retryable,
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to install CRD {name}: {e}"))?;
    }

    tracing::info!("CRDs installed");
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("wimount controller starting");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    if args.install_crds {
        ensure_crds_installed(&client, &args.field_manager).await?;
    }

    let webhook = match (args.webhook_cert.clone(), args.webhook_key.clone()) {
        (Some(cert), Some(key)) => {
            let addr = args.webhook_addr;
            Some(tokio::spawn(async move {
                if let Err(e) = wimount::webhook::serve(addr, &cert, &key).await {
                    tracing::error!(error = %e, "webhook server stopped");
                }
            }))
        }
        _ => {
            tracing::info!("no webhook certificate configured, admission webhooks disabled");
            None
        }
    };

    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(args.federation_config())
            .build(),
    );

    let managed = WatcherConfig::default()
        .labels(&format!("{LABEL_MANAGED_BY}={LABEL_MANAGED_BY_VALUE}"));

    let controller = Controller::new(
        Api::<WorkloadIdentity>::all(client.clone()),
        WatcherConfig::default(),
    );
    let by_provider = controller.store();
    let by_deployment = controller.store();

    controller
        .owns(Api::<ConfigMap>::all(client.clone()), managed)
        .watches(
            Api::<Provider>::all(client.clone()),
            WatcherConfig::default(),
            move |provider| {
                let cached = by_provider.state();
                identities_for_provider(&provider, cached.iter().map(Arc::as_ref))
            },
        )
        .watches(
            Api::<Deployment>::all(client.clone()),
            WatcherConfig::default(),
            move |deployment| {
                let cached = by_deployment.state();
                identities_for_deployment(&deployment, cached.iter().map(Arc::as_ref))
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((identity, action)) => {
                    tracing::debug!(identity = %identity.name, ?action, "reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "reconciliation error");
                }
            }
        })
        .await;

    if let Some(handle) = webhook {
        handle.abort();
    }

    tracing::info!("wimount controller shutting down");
    Ok(())
}

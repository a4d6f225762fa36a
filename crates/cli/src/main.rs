mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use jobrelay_core::{JobId, OutputFamily, RelayConfig};
use jobrelay_getter::{
    AudioConverter, Converter, Fetch, Getter, GetterFailure, ImageConverter,
    ProcessedResultCache, TextConverter, VideoConverter,
};
use jobrelay_jobs::{JobService, ServiceConfig};
use jobrelay_livepeer::{LivepeerClient, Requester, RequesterConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "jobrelay=info,jobrelay_livepeer=info,jobrelay_jobs=info,jobrelay_getter=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Arguments ---
    let args = match args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    // --- Configuration ---
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        gateway = %config.gateway_url,
        mode = %config.request.mode,
        max_retries = config.request.max_retries,
        timeout_secs = config.request.timeout.as_secs_f64(),
        "Loaded relay configuration",
    );

    // --- Job service + sweeper ---
    let cancel = CancellationToken::new();
    let service = JobService::new(ServiceConfig::from(&config));
    let sweeper_handle = service.spawn_sweeper(cancel.child_token());

    // --- Requester ---
    let api = match LivepeerClient::from_config(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build gateway client");
            cancel.cancel();
            return ExitCode::FAILURE;
        }
    };
    let requester = Requester::new(Arc::clone(&service), api, RequesterConfig::from(&config));

    let job_id = requester
        .submit(args.kind, args.payload(), &config.request)
        .await;

    // --- Wait for the result ---
    let poll_interval = config.request.poll_interval;
    let outcome = tokio::select! {
        outcome = watch_family(&service, job_id, args.kind.output_family(), poll_interval, &cancel) => Some(outcome),
        () = shutdown_signal() => None,
    };

    // --- Shutdown ---
    requester.shutdown();
    cancel.cancel();
    match tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await {
        Ok(Err(e)) => tracing::error!(error = %e, "Job sweeper task failed"),
        Err(_) => tracing::warn!("Job sweeper did not stop within 5s"),
        Ok(Ok(())) => {}
    }

    match outcome {
        Some(Ok(output)) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Some(Err(failure)) => {
            tracing::error!(job_id = %job_id, failure = %failure, "Job produced no output");
            ExitCode::FAILURE
        }
        None => ExitCode::from(130),
    }
}

async fn watch_family(
    service: &Arc<JobService>,
    job_id: JobId,
    family: OutputFamily,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<String, GetterFailure> {
    match family {
        OutputFamily::Image => watch(service, job_id, ImageConverter, poll_interval, cancel).await,
        OutputFamily::Video => watch(service, job_id, VideoConverter, poll_interval, cancel).await,
        OutputFamily::Text => watch(service, job_id, TextConverter, poll_interval, cancel).await,
        OutputFamily::Audio => watch(service, job_id, AudioConverter, poll_interval, cancel).await,
    }
}

/// Bind a getter to `job_id` and wait until its change token settles,
/// then fetch the output as pretty JSON.
async fn watch<C>(
    service: &Arc<JobService>,
    job_id: JobId,
    converter: C,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<String, GetterFailure>
where
    C: Converter,
    C::Output: Serialize + 'static,
{
    let cache = Arc::new(ProcessedResultCache::new());
    let _pruner = cache.spawn_pruner(service, cancel.child_token());
    let mut getter = Getter::with_cache(Arc::clone(service), converter, cache);
    getter.bind(job_id);

    loop {
        if getter.change_signal().is_stable() {
            match getter.fetch() {
                Fetch::Ready(output) => {
                    return Ok(serde_json::to_string_pretty(&output)
                        .unwrap_or_else(|e| format!("<unserializable output: {e}>")));
                }
                Fetch::Failed(failure) => return Err(failure),
                Fetch::NotReady(status) => {
                    tracing::debug!(job_id = %job_id, status = %status, "Job not ready yet");
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), stopping");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping");
        }
    }
}

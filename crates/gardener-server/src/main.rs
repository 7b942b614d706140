use std::sync::Arc;
use std::time::Instant;

use gardener_agent::{AgentDiscovery, ClaudeRunner};
use gardener_core::agent::AgentRunner;
use gardener_core::config::Config;
use gardener_core::cycle::CycleOrchestrator;
use gardener_core::executor::WorkerPool;
use gardener_core::gateway::HostGateway;
use gardener_core::git::{Git, RepoVcs};
use gardener_core::github::GithubClient;
use gardener_core::merge::MergeResolver;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod logging;
mod routes;

use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_ring = logging::new_ring();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gardener_server=info,gardener_core=info,gardener_agent=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(logging::RingLayer {
            ring: Arc::clone(&log_ring),
        })
        .init();

    let config = Config::from_env()?;
    config.validate()?;
    let config = Arc::new(config);
    info!(
        repo = format!("{}/{}", config.repo.owner, config.repo.name),
        base = %config.repo.base_branch,
        workers = config.execution.parallel_workers,
        dry_run = config.daemon.dry_run,
        "starting"
    );

    let client = GithubClient::new(
        &config.repo.owner,
        &config.repo.name,
        &config.credentials.hosting_token,
    );
    let gateway = Arc::new(HostGateway::new(Box::new(client)));

    let runner = Arc::new(ClaudeRunner::new(
        "claude",
        &config.credentials.agent_credentials_path,
        &config.credentials.agent_oauth_token,
    ));
    let discovery = Arc::new(AgentDiscovery::new(Arc::clone(&runner)));

    let vcs: Arc<dyn RepoVcs> =
        Arc::new(Git::new(&config.repo.repo_path, &config.execution.work_dir));
    let pool = WorkerPool::new(
        Arc::clone(&vcs),
        Arc::clone(&runner) as Arc<dyn AgentRunner>,
        config.execution.parallel_workers,
        config.execution.timeout_minutes,
        &config.repo.base_branch,
    );
    let resolver = MergeResolver::new(
        Arc::clone(&vcs),
        config.merge.clone(),
        &config.repo.base_branch,
    );

    let orchestrator = Arc::new(CycleOrchestrator::new(
        Arc::clone(&config),
        Arc::clone(&gateway),
        discovery,
        pool,
        resolver,
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        orchestrator: Arc::clone(&orchestrator),
        log_ring,
        start_time: Instant::now(),
    });
    let app = routes::router(state);
    let addr = format!("{}:{}", config.daemon.web_bind, config.daemon.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("monitoring endpoint listening on {addr}");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    orchestrator.run(cancel.clone()).await;

    // The loop exited (cancelled or single cycle); take the endpoint down too.
    cancel.cancel();
    server.await??;
    info!("stopped");
    Ok(())
}

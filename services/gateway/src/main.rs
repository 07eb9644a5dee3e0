// Gateway service main entry point.
use anyhow::{Context, Result};
use gateway::auth::JwtAuthenticator;
use gateway::binding::InMemoryBindingStore;
use gateway::config::GatewayConfig;
use gateway::directory::InMemoryDirectory;
use gateway::driver::Collaborators;
use gateway::owner::RoundRobinOwner;
use gateway::partition::InMemoryPartitions;
use gateway::registry::SessionRegistry;
use gateway::{observability, transport};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("sluice-gateway")?;
    let config = Arc::new(GatewayConfig::from_env_or_yaml()?);

    let directory = match &config.topics_file {
        Some(path) => InMemoryDirectory::from_yaml_file(path)?,
        None => {
            tracing::info!("no topic catalogue configured (SLUICE_TOPICS_FILE not set)");
            InMemoryDirectory::new()
        }
    };
    tracing::info!(topics = ?directory.topic_names(), "topic catalogue loaded");
    let collaborators = Collaborators {
        directory: Arc::new(directory),
        authenticator: Arc::new(JwtAuthenticator::from_config(&config)),
        bindings: Arc::new(InMemoryBindingStore::new()),
        owners: Arc::new(RoundRobinOwner::new()),
        writers: Arc::new(InMemoryPartitions::new()),
        registry: Arc::new(SessionRegistry::new()),
    };

    let metrics_bind = config.metrics_bind;
    let metrics_task = tokio::spawn(async move {
        if let Err(err) = observability::serve_metrics(metrics_handle, metrics_bind).await {
            tracing::warn!(error = %err, "metrics endpoint exited");
        }
    });

    let listener = TcpListener::bind(config.listen_bind)
        .await
        .context("bind session listener")?;
    tracing::info!(addr = %listener.local_addr()?, "session listener started");

    let accept_task = {
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            if let Err(err) = transport::serve(listener, config, collaborators).await {
                tracing::warn!(error = %err, "accept loop exited");
            }
        })
    };

    shutdown.await;
    accept_task.abort();
    metrics_task.abort();
    tracing::info!("gateway stopped");
    Ok(())
}

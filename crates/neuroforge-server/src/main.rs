use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use neuroforge_kernel::{
    GeminiClient, HttpRunner, Orchestrator, OrchestratorConfig, ProgramRunner, SandboxRunner,
};
use neuroforge_memory::{
    Embedder, HashingEmbedder, InMemoryIndex, MemoryAdapter, PineconeIndex, RemoteEmbedder,
    VectorIndex,
};
use neuroforge_sandbox::{ContainerRunner, SandboxSettings};
use neuroforge_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,neuroforge_server=info")),
        )
        .init();

    let addr = std::env::var("NEUROFORGE_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());

    let sandbox = Arc::new(ContainerRunner::new(SandboxSettings::from_env()));
    let memory = Arc::new(MemoryAdapter::new(embedder_from_env(), index_from_env()));

    // Generator and repairer share one client; both seams stay pluggable.
    let llm = Arc::new(GeminiClient::from_env()?);
    let runner: Arc<dyn ProgramRunner> = match std::env::var("RUNNER_URL") {
        Ok(url) if !url.trim().is_empty() => {
            tracing::info!(%url, "dispatching runs to remote runner");
            Arc::new(HttpRunner::new(url))
        }
        _ => Arc::new(SandboxRunner::new(sandbox.clone())),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        llm.clone(),
        llm,
        runner,
        memory,
        OrchestratorConfig::default(),
    ));

    let state = Arc::new(AppState {
        orchestrator,
        sandbox,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("neuroforge server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn embedder_from_env() -> Arc<dyn Embedder> {
    match std::env::var("EMBED_URL") {
        Ok(url) if !url.trim().is_empty() => {
            tracing::info!(%url, "using remote sentence encoder");
            Arc::new(RemoteEmbedder::new(url))
        }
        _ => {
            tracing::info!("no EMBED_URL set, using local hashing encoder");
            Arc::new(HashingEmbedder)
        }
    }
}

fn index_from_env() -> Arc<dyn VectorIndex> {
    match (
        std::env::var("PINECONE_INDEX_HOST"),
        std::env::var("PINECONE_API_KEY"),
    ) {
        (Ok(host), Ok(api_key)) if !host.trim().is_empty() && !api_key.trim().is_empty() => {
            tracing::info!(%host, "using pinecone vector index");
            Arc::new(PineconeIndex::new(host, api_key))
        }
        _ => {
            tracing::info!("no pinecone configuration, using in-memory vector index");
            Arc::new(InMemoryIndex::new())
        }
    }
}

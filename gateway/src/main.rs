mod api;
mod routes;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use ironcrew_core::chat::{ChatService, PersonaCatalog};
use ironcrew_core::gemini::Gemini;
use ironcrew_core::video::VideoAssistant;
use ironcrew_core::{Brain, BlueprintLibrary, Config, Crew, LanguageModel, ToolRuntime};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("IronCrew Gateway Initializing...");

    // 2. Configuration (.env + environment)
    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    // 3. Initialize The Brain
    info!("Connecting to OpenAI Brain...");
    let brain = Brain::new(&config);
    match brain.say_hello().await {
        Ok(msg) => info!("Brain Status: {}", msg),
        Err(e) => error!("Brain is online but unresponsive: {}", e),
    }
    let model: Arc<dyn LanguageModel> = Arc::new(brain);

    // 4. Tool Registry & Runtime
    let registry = ironcrew_tools::standard_registry(&config, model.clone())?;
    let runtime = ToolRuntime::new(registry);

    // 5. Load Crews
    info!("Loading crews from {}", config.crews_dir.display());
    let library = BlueprintLibrary::load_dir(&config.crews_dir)
        .await
        .with_context(|| format!("failed to load crews from {}", config.crews_dir.display()))?;
    let mut crews = BTreeMap::new();
    for blueprint in library.iter() {
        let crew = Crew::new(blueprint.clone(), model.clone(), runtime.clone())
            .with_context(|| format!("crew '{}' is invalid", blueprint.name))?;
        crews.insert(crew.name().to_string(), crew);
    }
    info!("Loaded {} crews: {:?}", crews.len(), crews.keys().collect::<Vec<_>>());

    // 6. Optional Video Assistant
    let video = config.gemini.as_ref().map(|settings| {
        info!("Video assistant enabled with {}", settings.model);
        Arc::new(VideoAssistant::new(Arc::new(Gemini::new(settings))))
    });

    // 7. Bundle State
    let state = AppState {
        config: config.clone(),
        crews: Arc::new(crews),
        chat: Arc::new(ChatService::new(model, PersonaCatalog::standard())),
        video,
    };

    // 8. Start Server
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Gateway listening on {}...", config.bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

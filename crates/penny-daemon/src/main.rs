//! Penny entry point: load config, wire the store, LLM clients, agents,
//! channel, and scheduler, then run until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use penny_agents::tools::news::{NewsApiTransport, NewsClient};
use penny_agents::tools::search::{PerplexityBackend, SearchTool};
use penny_agents::tools::{Tool, ToolExecutor, ToolRegistry};
use penny_agents::{
    EnrichAgent, EventAgent, ExtractionPipeline, MessageAgent, MessageDispatcher,
    NotificationAgent, ResearchAgent,
};
use penny_channels::signal::SignalChannel;
use penny_channels::Outbound;
use penny_core::PennyConfig;
use penny_llm::{LlmBackend, OllamaClient};
use penny_scheduler::{BackgroundScheduler, Schedule};
use penny_store::KnowledgeStore;

#[derive(Parser)]
#[command(name = "penny", about = "Personal assistant daemon")]
struct Cli {
    /// Path to penny.toml (defaults to ~/.penny/penny.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = PennyConfig::load(cli.config.as_deref()).context("loading config")?;

    let store = Arc::new(KnowledgeStore::open(&config.database.path).context("opening database")?);
    info!(path = %config.database.path, "knowledge store open");

    let llm: Arc<dyn LlmBackend> = Arc::new(OllamaClient::new(
        &config.llm.api_url,
        &config.llm.foreground_model,
        config.llm.max_retries,
        config.llm.retry_delay_secs,
    ));
    let background_model = Some(config.llm.background_model().to_string());
    let embedding_model = config.llm.embedding_model.clone();

    // Channel transport. Signal is built in; other transports implement the
    // same trait out of tree.
    let channel: Arc<SignalChannel> = match config.channel.kind.as_str() {
        "signal" | "" => {
            let signal = config
                .channel
                .signal
                .as_ref()
                .context("signal channel selected but [channel.signal] is missing")?;
            Arc::new(SignalChannel::new(&signal.api_url, &signal.number))
        }
        other => bail!("unsupported channel kind: {other}"),
    };
    let outbound = Outbound::new(channel.clone(), Arc::clone(&store));

    // Tools.
    let search_tool = config.apis.search_api_key.as_ref().map(|key| {
        Arc::new(SearchTool::new(
            Arc::new(PerplexityBackend::new(&config.apis.search_api_url, key)),
            Arc::clone(&store),
        ))
    });
    if search_tool.is_none() {
        warn!("no search API key configured; search-dependent agents are idle");
    }
    let news_client = config.apis.news_api_key.as_ref().map(|key| {
        Arc::new(NewsClient::new(
            Box::new(NewsApiTransport::new(&config.apis.news_api_url, key)),
            config.runtime.news_cache_ttl_secs,
            config.runtime.news_rate_limit_backoff_secs,
        ))
    });

    let mut registry = ToolRegistry::new();
    if let Some(search) = &search_tool {
        registry.register(Arc::clone(search) as Arc<dyn Tool>);
    }
    let executor = ToolExecutor::new(
        registry,
        Duration::from_secs_f64(config.runtime.tool_timeout_secs),
    );

    // Foreground agent.
    let message_agent = Arc::new(MessageAgent::new(
        Arc::clone(&llm),
        Arc::clone(&store),
        executor.clone(),
        config.runtime.message_max_steps,
        config.llm.vision_model.clone(),
    ));

    // Background fleet, in scheduler priority order.
    let extraction = Arc::new(ExtractionPipeline::new(
        Arc::clone(&llm),
        Arc::clone(&store),
        Some(outbound.clone()),
        background_model.clone(),
        embedding_model.clone(),
        config.runtime.clone(),
    ));
    let research = Arc::new(ResearchAgent::new(
        Arc::clone(&llm),
        Arc::clone(&store),
        outbound.clone(),
        Arc::clone(&message_agent),
        config.runtime.clone(),
    ));
    let enrich = Arc::new(EnrichAgent::new(
        Arc::clone(&llm),
        Arc::clone(&store),
        search_tool.clone(),
        background_model.clone(),
        embedding_model.clone(),
        config.runtime.clone(),
    ));
    let event = Arc::new(EventAgent::new(
        Arc::clone(&llm),
        Arc::clone(&store),
        news_client.clone(),
        background_model.clone(),
        embedding_model.clone(),
        config.runtime.clone(),
    ));
    let composer = penny_agents::compose::Composer::new(Arc::clone(&llm), background_model.clone());
    let notification = Arc::new(NotificationAgent::new(
        Arc::clone(&store),
        outbound.clone(),
        composer,
        news_client.clone(),
        config.runtime.clone(),
    ));

    let schedules = vec![
        Schedule::periodic(
            extraction,
            Duration::from_secs_f64(config.runtime.extraction_interval_secs),
        ),
        Schedule::periodic(
            research,
            Duration::from_secs_f64(config.runtime.research_interval_secs),
        ),
        Schedule::idle(enrich),
        Schedule::idle(event),
        Schedule::idle(notification),
    ];

    let scheduler = BackgroundScheduler::new(
        schedules,
        Duration::from_secs_f64(config.runtime.scheduler_tick_interval_secs),
        Duration::from_secs_f64(config.runtime.idle_seconds),
    );
    let handle = scheduler.handle();

    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&store),
        outbound,
        message_agent,
        handle.clone(),
        Arc::clone(&llm),
        embedding_model,
        config.runtime.clone(),
    ));

    info!("penny is up");

    // Inbound loop: each envelope gets its own task so multiple foreground
    // messages can be in flight while collectively gating background work.
    let listener = {
        let channel = Arc::clone(&channel);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            loop {
                for message in channel.receive().await {
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        dispatcher.handle_envelope(message).await;
                    });
                }
            }
        })
    };

    tokio::select! {
        _ = scheduler.run() => {}
        _ = listener => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            handle.stop();
        }
    }

    Ok(())
}

pub mod assembler;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod intent;
pub mod llm;
pub mod models;
pub mod progress;
pub mod repl;
pub mod segment;
pub mod usage;

use cli::Args;
use config::Settings;
use dispatch::Dispatcher;
use history::create_history_store;
use llm::chat::OpenAIChatClient;
use llm::image::HttpImageClient;
use log::info;
use std::error::Error;
use std::sync::Arc;
use usage::UsageCounter;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let settings = Settings::from_args(&args)?;

    info!("--- Core Configuration ---");
    info!("Chat Endpoint: {}", settings.chat_endpoint.url);
    info!("Chat Model: {}", settings.dispatch.chat_model);
    info!("Vision Model: {}", settings.dispatch.vision_model);
    info!("Image Endpoint: {}", settings.image_endpoint.url);
    info!("Image Model: {}", settings.dispatch.image_model);
    info!("Temperature: {}", settings.dispatch.temperature);
    info!(
        "Token Budgets: chat={} essay={}",
        settings.dispatch.chat_max_tokens,
        settings.dispatch.essay_max_tokens
    );
    info!(
        "Essay Threshold: {} chars ({:?})",
        settings.dispatch.essay.threshold,
        settings.dispatch.essay.basis
    );
    info!("History Store Type: {}", args.history_type);
    info!("User: {}", settings.user_id);
    info!("-------------------------");

    let chat_client = Arc::new(OpenAIChatClient::from_config(&settings.chat_endpoint)?);
    let image_client = Arc::new(HttpImageClient::from_config(&settings.image_endpoint)?);
    let store = create_history_store(&settings)?;
    let usage = Arc::new(UsageCounter::new());

    let dispatcher = Arc::new(
        Dispatcher::new(chat_client, image_client, store, usage.clone(), settings.dispatch.clone())
    );
    repl::run_repl(dispatcher, settings.user_id.clone()).await?;

    let snapshot = usage.snapshot();
    info!("Session used {} model call(s): {:?}", snapshot.total_calls, snapshot.per_model);
    Ok(())
}

use std::sync::Arc;

use soup_card_bot::barcode::RxingDecoder;
use soup_card_bot::bot::{Controller, Dispatcher};
use soup_card_bot::config::BotConfig;
use soup_card_bot::gateway::MealCardGateway;
use soup_card_bot::rate_limit::RateLimiter;
use soup_card_bot::store::{LibSqlBackend, UserStore};
use soup_card_bot::telegram::TelegramChannel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env()?;

    eprintln!("🍲 Soup Card bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   Gateway:  {}", config.gateway_base_url);

    let store: Arc<dyn UserStore> =
        Arc::new(LibSqlBackend::new_local(std::path::Path::new(&config.db_path)).await?);

    let controller = Arc::new(Controller::new(
        store,
        Arc::new(MealCardGateway::new(config.gateway_base_url.clone())),
        Arc::new(RxingDecoder::new()),
        RateLimiter::new(config.cooldown_after_success, config.cooldown_after_failure),
    ));

    let channel = Arc::new(TelegramChannel::new(config.bot_token.clone()));
    let dispatcher = Arc::new(Dispatcher::new(controller, channel.clone()));

    channel.run(dispatcher).await?;
    Ok(())
}

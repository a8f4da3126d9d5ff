//! tokmeter - Meter token usage and cost of LLM API calls

use clap::Parser;
use tokmeter::{
    cli::{Cli, Command, validate_limit},
    mcp::McpServer,
    tracker::{UsageTracker, refresh_exchange_rate},
};
use tokmeter_core::error::Result;
use tokmeter_core::{PartialUsage, SessionId, TokenUsage, UserId};
use tokmeter_pricing::{CostCalculator, PricingResolver};
use tokmeter_terminal::{BudgetBar, OutputFormatter, TableFormatter, get_formatter};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Table output only gets colors on an interactive terminal
fn formatter_for(json: bool) -> Box<dyn OutputFormatter> {
    if json || is_terminal::is_terminal(std::io::stdout()) {
        get_formatter(json)
    } else {
        Box::new(TableFormatter::new().with_budget_bar(BudgetBar::default().with_color(false)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries reports and the MCP channel
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("tokmeter=info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tokmeter=warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.tracker_config()?;
    let needs_rate = cli.needs_exchange_rate(&config);
    let tracker = UsageTracker::new(config)?.into_shared();
    if needs_rate {
        refresh_exchange_rate(&tracker, false).await;
    }

    let formatter = formatter_for(cli.json);

    match cli.command {
        Some(Command::Mcp) => {
            info!("Starting MCP server");
            McpServer::new(tracker).run_stdio().await?;
        }
        Some(Command::Track {
            provider,
            model,
            input,
            output,
            user,
            session,
        }) => {
            let mut usage = PartialUsage::new(input, output).with_provider(provider);
            if let Some(model) = model {
                usage = usage.with_model(model);
            }
            let record = tracker.lock().await.track(
                user.map(UserId::new),
                session.map(SessionId::new),
                usage,
            )?;
            println!("{}", formatter.format_record(&record));
        }
        Some(Command::Summary { all: true, .. }) => {
            let (users, totals) = tracker.lock().await.all_users_summary();
            println!("{}", formatter.format_all_users(&users, &totals));
        }
        Some(Command::Summary { user, .. }) => {
            let user = user.map(UserId::new);
            let guard = tracker.lock().await;
            let user_id = user.clone().unwrap_or_else(|| guard.config().user_id.clone());
            match guard.user_summary(user.as_ref()) {
                Some(summary) => println!("{}", formatter.format_user_summary(summary)),
                None => println!("{}", formatter.format_history(&user_id, &[])),
            }
        }
        Some(Command::History { user, limit }) => {
            let limit = validate_limit(limit)?;
            let user = user.map(UserId::new);
            let guard = tracker.lock().await;
            let user_id = user.clone().unwrap_or_else(|| guard.config().user_id.clone());
            let records = guard.usage_history(user.as_ref(), Some(limit));
            println!("{}", formatter.format_history(&user_id, records));
        }
        Some(Command::Compare { input, output }) => {
            let ranking = tracker.lock().await.compare_models(input, output, &[]);
            println!("{}", formatter.format_comparison(&ranking));
        }
        Some(Command::Clear { user }) => {
            let user_id = UserId::new(user);
            if tracker.lock().await.clear_user_data(&user_id) {
                println!("Cleared usage data for {user_id}");
            } else {
                println!("No usage data for {user_id}");
            }
        }
        Some(Command::ExchangeRate { refresh }) => {
            let rate = refresh_exchange_rate(&tracker, refresh).await;
            println!("{}", formatter.format_exchange_rate(&rate));
        }
        Some(Command::Price {
            provider,
            model,
            input,
            output,
        }) => {
            let resolution = PricingResolver::new().resolve(&provider, &model);
            let cost = CostCalculator::calculate_from_rate(&resolution.rate, input, output);
            let usage = TokenUsage::new(input, output);
            println!("{}", formatter.format_price(&resolution, usage, cost));
        }
        None => {
            let summary = tracker.lock().await.session_summary();
            println!("{}", formatter.format_session_summary(&summary));
        }
    }

    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fso_domain::config::ConfigSeverity;
use fso_orchestrator::cli::{Cli, Command, ConfigCommand, QueueCommand};
use fso_orchestrator::runtime::dispatch::DispatchOptions;
use fso_orchestrator::runtime::{handlers, queue};
use fso_orchestrator::schedule::{jst_date, TriggerRunner};
use fso_orchestrator::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        None | Some(Command::Serve) => {
            let state = build_state()?;
            serve(state).await;
            Ok(())
        }
        Some(Command::Start {
            targeting_id,
            test_mode,
            use_extra,
        }) => {
            let state = build_state()?;
            let options = DispatchOptions {
                test_mode,
                use_extra,
                trigger: "manual".into(),
                workflow_trigger: "manual".into(),
                branch: None,
            };
            let now = Utc::now();
            let value = match targeting_id {
                Some(id) => {
                    serde_json::to_value(handlers::start_one(&state, id, &options, now).await)?
                }
                None => serde_json::to_value(handlers::start_all(&state, &options, now).await?)?,
            };
            print_json(&value)
        }
        Some(Command::Stop { targeting_id }) => {
            let state = build_state()?;
            let report = state.control.stop_specific(targeting_id).await;
            print_json(&serde_json::to_value(report)?)
        }
        Some(Command::StopAll) => {
            let state = build_state()?;
            let report = state.control.stop_all_running().await;
            print_json(&serde_json::to_value(report)?)
        }
        Some(Command::Status) => {
            let state = build_state()?;
            let summary = state.control.list_running().await?;
            print_json(&serde_json::to_value(summary)?)
        }
        Some(Command::Trigger { handler }) => {
            let state = build_state()?;
            let value = handlers::run_handler(&state, &handler, Utc::now()).await?;
            print_json(&value)
        }
        Some(Command::Queue(queue_command)) => {
            let state = build_state()?;
            run_queue_command(&state, queue_command).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = fso_orchestrator::cli::load_config()?;
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count();
            if errors > 0 {
                println!("{config_path}: {errors} error(s)");
                std::process::exit(1);
            }
            println!("{config_path}: OK");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = fso_orchestrator::cli::load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("formsender {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fso_orchestrator=debug")),
        )
        .init();
}

fn build_state() -> anyhow::Result<AppState> {
    let (config, config_path) = fso_orchestrator::cli::load_config()?;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config validation failed ({config_path})");
    }

    Ok(AppState::build(Arc::new(config))?)
}

async fn serve(state: AppState) {
    tracing::info!("formsender orchestrator starting");
    ensure_daily_triggers(&state).await;
    let interval = Duration::from_secs(state.config.scheduling.tick_interval_secs.max(1));
    TriggerRunner::run_loop(state, interval).await;
}

/// Seed the daily launch triggers when none exist yet (first boot, or
/// after the trigger store was cleared).
async fn ensure_daily_triggers(state: &AppState) {
    let existing = state.triggers.list().await;
    let now = Utc::now();
    let now_jst = fso_orchestrator::schedule::jst_now(now);
    for &hour in &state.config.scheduling.trigger_hours {
        let handler = match hour {
            7 => handlers::HANDLER_AT_7,
            13 => handlers::HANDLER_AT_13,
            _ => handlers::HANDLER_GENERIC,
        };
        if existing.iter().any(|t| t.handler == handler) {
            continue;
        }
        let next =
            fso_orchestrator::schedule::next_weekday_time_at(&state.calendar, hour, now_jst).await;
        match state
            .triggers
            .create_one_shot(handler, next.with_timezone(&Utc), now)
            .await
        {
            Ok(_) => tracing::info!(handler, at = %next, "seeded daily trigger"),
            Err(e) => tracing::error!(handler, error = %e, "failed to seed trigger"),
        }
    }
}

async fn run_queue_command(state: &AppState, command: QueueCommand) -> anyhow::Result<()> {
    let now = Utc::now();
    let shards = state.config.sender.shard_count;
    match command {
        QueueCommand::Build {
            targeting_id,
            test_mode,
            use_extra,
        } => {
            let config = state
                .config_source
                .get_targeting_config(targeting_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("targeting {targeting_id} not found"))?;
            let request = queue::QueueBuildRequest {
                targeting_id,
                target_date: jst_date(now),
                targeting_sql: config.targeting.targeting_sql.clone(),
                ng_companies: config.targeting.ng_companies.clone(),
                client_name: config.client.company_name.clone(),
                use_extra: use_extra || config.targeting.use_extra_table.is_explicit_true(),
                test_mode,
                shards,
            };
            let outcome =
                queue::build_for_targeting(state.rpc.as_ref(), &state.config.supabase, &request)
                    .await?;
            print_json(&serde_json::to_value(outcome)?)
        }
        QueueCommand::BuildAll => {
            let active = state.config_source.list_active_targetings().await?;
            let mut requests = Vec::new();
            for targeting in active {
                match state
                    .config_source
                    .get_targeting_config(targeting.targeting_id)
                    .await
                {
                    Ok(Some(config)) => requests.push(queue::QueueBuildRequest {
                        targeting_id: targeting.targeting_id,
                        target_date: jst_date(now),
                        targeting_sql: config.targeting.targeting_sql.clone(),
                        ng_companies: config.targeting.ng_companies.clone(),
                        client_name: config.client.company_name.clone(),
                        use_extra: config.targeting.use_extra_table.is_explicit_true(),
                        test_mode: false,
                        shards,
                    }),
                    Ok(None) => tracing::warn!(
                        targeting_id = targeting.targeting_id,
                        "active row vanished before queue build"
                    ),
                    Err(e) => tracing::error!(
                        targeting_id = targeting.targeting_id,
                        error = %e,
                        "skipping targeting with invalid config"
                    ),
                }
            }
            let outcome =
                queue::build_for_all(state.rpc.as_ref(), &state.config.supabase, &requests).await;
            print_json(&serde_json::to_value(outcome)?)
        }
        QueueCommand::ResetDaily { extra, test } => {
            let variant = if test {
                queue::TableVariant::Test
            } else if extra {
                queue::TableVariant::Extra
            } else {
                queue::TableVariant::Primary
            };
            queue::reset_all(state.rpc.as_ref(), &state.config.supabase, variant).await?;
            print_json(&serde_json::json!({ "success": true, "variant": variant.send_queue_table() }))
        }
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! Command execution against a freshly bootstrapped engine.
//!
//! Each invocation opens the file-backed simulated remote and the local
//! cache, resolves the session, runs one command and tears the engine down.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use payday_core::store::QuotaReset;
use payday_core::{
    Amount, AuthEvent, EngineError, MemoryRemote, QuotaStatus, Rejection, RewardsEngine,
    SessionState, Summary, Transaction,
};
use serde_json::{json, Value};

use super::config::CliConfig;
use super::protocol::CliCommand;

pub async fn execute(command: CliCommand, config: &CliConfig, offline: bool) -> Result<Value> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    let remote_path = config.remote_path();
    let remote = Arc::new(
        MemoryRemote::open(&remote_path)
            .with_context(|| format!("Failed to open remote store: {}", remote_path.display()))?,
    );
    remote.set_offline(offline);

    let engine = RewardsEngine::new(config.engine_config()?, remote.clone())?;
    let result = run(&engine, &remote, command).await;
    engine.teardown();
    result
}

async fn run(engine: &RewardsEngine, remote: &MemoryRemote, command: CliCommand) -> Result<Value> {
    if let CliCommand::Login { email, name } = &command {
        if remote.is_offline() {
            anyhow::bail!("Cannot sign in while offline");
        }
        remote.sign_in(email, name.as_deref());
    }

    let session = engine.bootstrap().await;
    tracing::debug!("cli: session {:?}", session.origin);

    match command {
        CliCommand::Login { .. } => {
            let summary = engine.summary()?;
            Ok(json!({
                "session": session_view(&session),
                "summary": summary_view(&summary),
            }))
        }
        CliCommand::Logout => {
            let user_id = session.user_id().map(str::to_string);
            if !remote.is_offline() {
                remote.sign_out();
            }
            engine.handle_auth_event(AuthEvent::SignedOut).await;
            Ok(json!({ "signedOut": user_id }))
        }
        CliCommand::Status => {
            let summary = engine.summary()?;
            Ok(json!({
                "session": session_view(&engine.session()),
                "summary": summary_view(&summary),
            }))
        }
        CliCommand::Perform { activity } => {
            let outcome = engine.perform_activity(activity).await?;
            Ok(json!({
                "activity": outcome.activity,
                "transaction": transaction_view(&outcome.transaction),
                "quota": quota_view(&outcome.quota),
                "cooldownUntil": outcome.cooldown_started.map(|c| format_timestamp(c.end_time)),
                "synced": outcome.synced,
                "balance": engine.balance()?.to_string(),
            }))
        }
        CliCommand::Withdraw { amount } => {
            let txn = engine.withdraw(amount).await?;
            Ok(json!({
                "transaction": transaction_view(&txn),
                "balance": engine.balance()?.to_string(),
            }))
        }
        CliCommand::History { limit } => {
            let history = engine.history(limit)?;
            Ok(Value::Array(history.iter().map(transaction_view).collect()))
        }
        CliCommand::Sync => {
            let synced = engine.reconnect().await?;
            let summary = engine.summary()?;
            Ok(json!({
                "synced": synced,
                "summary": summary_view(&summary),
            }))
        }
        CliCommand::ResetCheck => {
            if engine.current_user_id().is_none() {
                return Err(EngineError::from(Rejection::NotSignedIn).into());
            }
            let resets = engine.check_resets().await;
            Ok(Value::Array(resets.iter().map(reset_view).collect()))
        }
    }
}

fn format_timestamp(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn format_duration_ms(ms: u64) -> String {
    let minutes = ms / 60_000;
    format!("{}h{:02}m", minutes / 60, minutes % 60)
}

fn session_view(session: &SessionState) -> Value {
    json!({
        "userId": session.user_id(),
        "email": session.identity.as_ref().map(|i| i.email.as_str()),
        "displayName": session.identity.as_ref().map(|i| i.display_name.as_str()),
        "origin": session.origin,
    })
}

fn transaction_view(txn: &Transaction) -> Value {
    json!({
        "id": txn.id,
        "time": format_timestamp(txn.timestamp),
        "amount": txn.amount.to_string(),
        "category": txn.category,
        "status": txn.status,
    })
}

fn quota_view(status: &QuotaStatus) -> Value {
    json!({
        "activity": status.activity,
        "completed": status.completed,
        "dailyLimit": status.daily_limit,
        "remaining": status.remaining,
        "cooldown": status.cooldown_remaining_ms.map(format_duration_ms),
        "windowResetsIn": format_duration_ms(status.window_remaining_ms),
    })
}

fn summary_view(summary: &Summary) -> Value {
    let by_category: serde_json::Map<String, Value> = summary
        .by_category
        .iter()
        .map(|(category, amount)| (category.to_string(), Value::String(amount.to_string())))
        .collect();
    json!({
        "balance": summary.balance.to_string(),
        "earned": summary.earned.to_string(),
        "withdrawn": summary.withdrawn.to_string(),
        "byCategory": by_category,
        "quotas": summary.quotas.iter().map(quota_view).collect::<Vec<_>>(),
        "pending": summary.pending,
        "dirty": summary.dirty,
        "stale": summary.stale,
    })
}

fn reset_view(reset: &QuotaReset) -> Value {
    json!({
        "activity": reset.activity,
        "windowId": reset.window_id,
        "reason": format!("{:?}", reset.reason),
        "clearedCooldown": reset.cleared_cooldown,
    })
}

/// Parse a withdrawal amount given in currency units.
pub fn parse_amount(s: &str) -> Result<Amount> {
    s.parse::<Amount>()
        .with_context(|| format!("Invalid amount: {}", s))
}

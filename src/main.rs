use std::sync::Arc;

use coachsync::{ErrorCode, MemoryCredentials, MemoryStore, Role, SessionConfig, SessionPhase, SessionStore};
use tokio::time::{Duration, timeout};

const DEMO_PASSWORD: &str = "demo-password";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = SessionConfig::from_env()?;
    let store = Arc::new(MemoryStore::new());
    let credentials = Arc::new(MemoryCredentials::from_config(&config));

    let coach = SessionStore::new(store.clone(), credentials.clone(), config.clone());
    let client = SessionStore::new(store, credentials, config);

    coach
        .sign_up("Casey", "Coach", "coach@example.com", Role::Coach, DEMO_PASSWORD)
        .await?;
    let group = coach.create_group("Morning Runners").await?;
    tracing::info!(group_id = %group.id, code = %group.code, "coach created group");

    let member = client
        .sign_up("Robin", "Client", "robin@example.com", Role::Client, DEMO_PASSWORD)
        .await?;
    if let Err(e) = client.create_group("Not Allowed").await {
        tracing::info!(code = e.error_code(), error = %e, "client group creation refused");
    }
    let joined = client.join_group(&group.code.to_lowercase()).await?;
    tracing::info!(uid = %member.id, members = joined.members.len(), "client joined group");

    let mut rx = client.subscribe();
    let state = timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| s.phase() == SessionPhase::SignedInWithGroup && s.group.is_some()),
    )
    .await??
    .clone();
    if let Some(group) = &state.group {
        tracing::info!(group = %group.name, members = group.members.len(), "client session in group");
    }

    let mut rx = coach.subscribe();
    timeout(Duration::from_secs(2), rx.wait_for(|s| s.group.is_some())).await??;
    for user in coach.group_members().await? {
        tracing::info!(name = %user.full_name(), role = %user.role, "roster");
    }

    coach.sign_out().await?;
    client.stop();
    Ok(())
}

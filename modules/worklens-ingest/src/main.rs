use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracker_client::{TrackerClient, TrackerClientConfig};
use worklens_common::{db, Config};
use worklens_ingest::Syncer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("worklens_ingest=info".parse()?)
                .add_directive("tracker_client=info".parse()?),
        )
        .init();

    info!("Worklens sync starting...");

    let config = Config::from_env();
    config.log_redacted();

    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;
    info!("Migrations complete");

    let client = TrackerClient::new(TrackerClientConfig {
        base_url: config.tracker_base_url.clone(),
        token: config.tracker_token.clone(),
        timeout_secs: config.request_timeout_secs,
        page_cap: config.max_pages_per_resource,
    })?;

    let syncer = Syncer::new(client, pool, config.sync_project_ids.clone());
    let summary = syncer.run(config.sync_user_id).await?;

    for failure in &summary.failed_projects {
        warn!(project = failure.project_id, error = %failure.error, "Project failed this cycle");
    }
    info!(
        fetched = summary.fetched,
        stored = summary.stored,
        skipped = summary.skipped,
        linked = summary.linked,
        duration_ms = summary.duration_ms,
        "Sync finished"
    );

    Ok(())
}

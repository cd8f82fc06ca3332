use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::services::orchestrator;
use crate::state::AppContext;

pub async fn watch(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let root = ctx.root();
    anyhow::ensure!(
        root.is_dir(),
        "observation root is not a directory: {}",
        root.display()
    );
    info!(root = %root.display(), db = %ctx.db_path.display(), "Starting watcher");
    orchestrator::run(ctx.clone())
        .await
        .context("orchestrator stopped with an error")
}

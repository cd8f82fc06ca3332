pub mod backlog_commands;
pub mod entry_commands;
pub mod status_commands;
pub mod watch_commands;

use std::sync::Arc;

use crate::cli::Commands;
use crate::services::ingestion_service::EmptyPolicy;
use crate::state::AppContext;

pub async fn dispatch(ctx: Arc<AppContext>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Watch => watch_commands::watch(ctx).await,
        Commands::Backlog(args) => backlog_commands::backlog(&ctx, args.since.as_deref()).await,
        Commands::Status => status_commands::status(&ctx),
        Commands::Insert(args) => {
            entry_commands::insert(&ctx, &args.files, EmptyPolicy::BySize).await
        }
        Commands::InsertCorrupt(args) => {
            entry_commands::insert(&ctx, &args.files, EmptyPolicy::AlwaysCorrupt).await
        }
        Commands::Replace(args) => entry_commands::replace(&ctx, &args.files).await,
    }
}

use crate::services::orchestrator;
use crate::state::AppContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthStatus {
    pub bucket: String,
    pub on_disk: usize,
    pub missing: usize,
}

pub fn collect_status(ctx: &AppContext) -> anyhow::Result<Vec<MonthStatus>> {
    let mut rows = Vec::new();
    for bucket in orchestrator::known_months(ctx)? {
        let (on_disk, missing) = orchestrator::month_status(ctx, &bucket)?;
        rows.push(MonthStatus {
            bucket,
            on_disk,
            missing,
        });
    }
    Ok(rows)
}

pub fn status(ctx: &AppContext) -> anyhow::Result<()> {
    let rows = collect_status(ctx)?;
    if rows.is_empty() {
        println!("No projects recorded yet");
        return Ok(());
    }
    for row in rows {
        println!(
            "{}: {} files on disk, {} missing from database",
            row.bucket, row.on_disk, row.missing
        );
    }
    Ok(())
}

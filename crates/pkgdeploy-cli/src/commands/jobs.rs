//! Job commands against the database.

use anyhow::{Result, bail};
use chrono::{Duration, Utc};
use pkgdeploy_core::JobStatus;
use pkgdeploy_db::{JobRow, PgDeploymentJobRepo};

use super::connect;

pub async fn list(database_url: Option<&str>, status: Option<&str>) -> Result<()> {
    let filter = status.map(parse_status).transpose()?;
    let repo = PgDeploymentJobRepo::new(connect(database_url).await?);

    let rows = repo.list_rows().await?;
    let mut shown = 0;
    for row in rows
        .iter()
        .filter(|r| filter.is_none_or(|s| r.status == s.code()))
    {
        println!("{}", format_row(row));
        shown += 1;
    }
    println!("{} job(s)", shown);
    Ok(())
}

pub async fn purge(database_url: Option<&str>, days: u32) -> Result<()> {
    let repo = PgDeploymentJobRepo::new(connect(database_url).await?);
    let cutoff = Utc::now() - Duration::days(i64::from(days));

    let deleted = repo.purge_expired(cutoff).await?;
    tracing::info!(deleted, %cutoff, "Purged expired deployment jobs");
    println!("Deleted {} finished job(s) older than {} days", deleted, days);
    Ok(())
}

fn parse_status(name: &str) -> Result<JobStatus> {
    let wanted = name.trim().to_ascii_uppercase().replace('-', "_");
    match JobStatus::ALL.into_iter().find(|s| s.to_string() == wanted) {
        Some(status) => Ok(status),
        None => bail!("unknown job status {}", name),
    }
}

fn format_row(row: &JobRow) -> String {
    let status = JobStatus::from_code(row.status)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("STATUS_{}", row.status));
    let package = match (&row.pkg_name, &row.version) {
        (Some(name), Some(version)) => format!("{} {}", name, version),
        _ => format!("<package {}>", row.pkg_id),
    };

    let mut line = format!(
        "{}  node {:<6} {:<22} {:<24} due {}",
        row.id,
        row.node_id,
        status,
        package,
        row.execution_time.format("%Y-%m-%d %H:%M:%S")
    );
    if !row.failure_reason.is_empty() {
        line.push_str(&format!("  ({})", row.failure_reason));
    }
    line
}

//! CLI command implementations.

pub mod jobs;

use anyhow::{Context, Result};
use pkgdeploy_config::SystemConfig;
use pkgdeploy_db::{create_pool, run_migrations};
use sqlx::PgPool;

/// Connect to the database named on the command line or in `DATABASE_URL`.
pub async fn connect(database_url: Option<&str>) -> Result<PgPool> {
    let url = database_url.context("no database URL given (use --database-url or DATABASE_URL)")?;
    Ok(create_pool(url).await?)
}

pub async fn migrate(database_url: Option<&str>) -> Result<()> {
    let pool = connect(database_url).await?;
    run_migrations(&pool).await?;
    println!("Migrations applied");
    Ok(())
}

pub fn check_config(path: &str) -> Result<()> {
    let config = pkgdeploy_config::load_config(path).with_context(|| format!("in {}", path))?;
    println!("Configuration is valid");
    print!("{}", describe(&config));
    Ok(())
}

fn describe(config: &SystemConfig) -> String {
    let d = &config.deployment;
    let mut out = String::new();
    out.push_str(&format!("  max workers:          {}\n", d.max_workers));
    out.push_str(&format!(
        "  install timeout:      {}s\n",
        d.install_timeout.as_secs()
    ));
    out.push_str(&format!(
        "  agent reconnect wait: {}s\n",
        d.agent_reconnect_wait.as_secs()
    ));
    out.push_str(&format!("  job retention:        {} days\n", d.job_retention_days));
    out.push_str(&format!(
        "  package directory:    {}\n",
        d.package_directory.display()
    ));
    out.push_str(&format!("  listen:               {}\n", config.server.listen));
    out.push_str(&format!("  nodes:                {}\n", config.nodes.len()));
    out
}

//! Package catalog lookups.

use async_trait::async_trait;
use pkgdeploy_core::{PackageCatalog, PackageDetails, PackageId};
use sqlx::PgPool;

use super::jobs::to_u32;
use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct PackageRow {
    pkg_id: i64,
    pkg_type: String,
    pkg_name: String,
    version: String,
    platform: String,
    pkg_file: String,
    command: String,
    description: String,
}

impl TryFrom<PackageRow> for PackageDetails {
    type Error = DbError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        Ok(PackageDetails {
            id: PackageId(to_u32(row.pkg_id, "pkg_id")?),
            package_type: row.pkg_type,
            name: row.pkg_name,
            version: row.version,
            platform: row.platform,
            file: row.pkg_file,
            command: row.command,
            description: row.description,
        })
    }
}

/// PostgreSQL implementation of PackageCatalog.
pub struct PgPackageCatalog {
    pool: PgPool,
}

impl PgPackageCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageCatalog for PgPackageCatalog {
    async fn get_package(&self, id: PackageId) -> pkgdeploy_core::Result<Option<PackageDetails>> {
        let row = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT pkg_id, pkg_type, pkg_name, version, platform, pkg_file, command, description
            FROM packages
            WHERE pkg_id = $1
            "#,
        )
        .bind(i64::from(id.0))
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(row.map(PackageDetails::try_from).transpose()?)
    }
}

use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use super::env::env_flag;

pub const MIGRATIONS_DIR: &str = "./migrations";

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("invalid database URL")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connect to postgres")?;
        info!(max_connections, "connected to db");

        let db = Self { pool };
        // Off by default; the `migrate` command runs them explicitly.
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            db.run_migrations(Path::new(MIGRATIONS_DIR)).await?;
        }
        Ok(db)
    }

    /// Applies every `NNNN_description.sql` in `dir` not yet recorded in
    /// `_sqlx_migrations`, in version order. Returns the versions applied.
    pub async fn run_migrations(&self, dir: &Path) -> Result<Vec<i64>> {
        if !dir.exists() {
            info!(dir = %dir.display(), "no migrations directory; skipping");
            return Ok(Vec::new());
        }
        // raw_sql avoids prepared statements under PgBouncer
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied: HashSet<i64> = HashSet::new();
        for r in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
            .fetch_all(&self.pool)
            .await?
        {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut newly = Vec::new();
        for (version, desc, path) in migration_candidates(dir)? {
            if applied.contains(&version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            info!(version, file = ?path, "applying migration");
            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration {version} ({desc}) failed"))?;

            let insert_stmt = format!(
                "INSERT INTO _sqlx_migrations(version, description) VALUES ({}, '{}')",
                version,
                desc.replace('\'', "''")
            );
            sqlx::raw_sql(&insert_stmt).execute(&self.pool).await?;
            applied.insert(version);
            newly.push(version);
        }
        info!(applied = newly.len(), "migrations up-to-date");
        Ok(newly)
    }
}

/// Numbered `.sql` files in `dir`, sorted by version. Other files
/// (e.g. `database_settings.sql`) are ignored.
pub fn migration_candidates(dir: &Path) -> Result<Vec<(i64, String, PathBuf)>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some((version, desc)) = parse_migration_name(fname) {
            candidates.push((version, desc, path));
        }
    }
    candidates.sort_by_key(|(v, _, _)| *v);
    Ok(candidates)
}

// pattern: digits '_' rest '.sql'
fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits_end = stem.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let (num, rest) = stem.split_at(digits_end);
    let desc = rest.strip_prefix('_')?;
    Some((num.parse().ok()?, desc.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_names_need_a_numeric_prefix() {
        assert_eq!(
            parse_migration_name("0001_import_pipeline.sql"),
            Some((1, "import_pipeline".to_string()))
        );
        assert_eq!(parse_migration_name("database_settings.sql"), None);
        assert_eq!(parse_migration_name("0002_notes.txt"), None);
        assert_eq!(parse_migration_name("0003.sql"), None);
    }

    #[test]
    fn candidates_are_sorted_by_version() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0010_later.sql", "0002_early.sql", "readme.sql"] {
            std::fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        let found = migration_candidates(dir.path()).unwrap();
        let versions: Vec<i64> = found.iter().map(|(v, _, _)| *v).collect();
        assert_eq!(versions, vec![2, 10]);
        assert_eq!(found[0].1, "early");
    }
}

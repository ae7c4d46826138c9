use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

/// Which database a connection belongs to. The registry database is owned by
/// the foreground, the schedule database only by the background agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Registry,
    Schedule,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Registry => "registry",
            Schema::Schedule => "schedule",
        }
    }

    pub fn current_version(&self) -> i32 {
        match self {
            Schema::Registry => 1,
            Schema::Schedule => 1,
        }
    }
}

pub fn run_migrations(conn: &mut Connection, schema: Schema) -> Result<()> {
    let target = schema.current_version();
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > target {
        bail!(
            "{} database version ({}) is newer than supported schema ({})",
            schema.as_str(),
            version,
            target
        );
    }

    if version == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < target {
        let next_version = version + 1;
        apply_migration(&tx, schema, next_version)
            .with_context(|| format!("{} migration to version {next_version} failed", schema.as_str()))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, schema: Schema, version: i32) -> Result<()> {
    match (schema, version) {
        (Schema::Registry, 1) => {
            tx.execute_batch(include_str!("schemas/registry_v1.sql"))
                .context("failed to execute registry_v1.sql")?;
            Ok(())
        }
        (Schema::Schedule, 1) => {
            tx.execute_batch(include_str!("schemas/schedule_v1.sql"))
                .context("failed to execute schedule_v1.sql")?;
            Ok(())
        }
        _ => bail!(
            "unknown {} migration target version: {version}",
            schema.as_str()
        ),
    }
}

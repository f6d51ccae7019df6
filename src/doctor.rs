//! Pre-flight checks for a deployment.

use std::path::Path;

use crate::{
    config::Config,
    constants::REQUIRED_SOURCE_TABLES,
    store::{source::SourceDb, sqlite},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Runs every check without stopping at the first failure.
pub fn run_checks(config: &Config) -> Vec<Check> {
    let mut checks = vec![Check::new("STORE_PATH", true, config.store_path.as_str())];

    checks.push(store_check(&config.store_path));

    checks.push(match &config.kis {
        Some(kis) => Check::new("KIS credentials", true, kis.base_url.as_str()),
        None => Check::new("KIS credentials", false, "KIS_APP_KEY and KIS_APP_SECRET are required for fetch-daily"),
    });

    match &config.source_db_path {
        None => checks.push(Check::new(
            "SOURCE_DB_PATH",
            false,
            "not set; required for migrate",
        )),
        Some(path) if !Path::new(path).is_file() => {
            checks.push(Check::new("SOURCE_DB_PATH", false, format!("{path} does not exist")))
        }
        Some(path) => {
            checks.push(Check::new("SOURCE_DB_PATH", true, path.as_str()));
            checks.extend(source_table_checks(path));
        }
    }

    checks
}

/// Opens an existing store read-only; a missing file is created by the first run.
fn store_check(path: &str) -> Check {
    if !Path::new(path).exists() {
        return Check::new("document store", true, "not created yet, the first run creates it");
    }
    let count = sqlite::open_read_only(path).and_then(|conn| {
        conn.query_row("SELECT count(*) FROM documents", [], |row| row.get::<_, i64>(0))
    });
    match count {
        Ok(count) => Check::new("document store", true, format!("{count} documents")),
        Err(err) => Check::new("document store", false, err.to_string()),
    }
}

fn source_table_checks(path: &str) -> Vec<Check> {
    let tables = match SourceDb::open(path).and_then(|db| db.table_names()) {
        Ok(tables) => tables,
        Err(err) => return vec![Check::new("source database", false, err.to_string())],
    };
    REQUIRED_SOURCE_TABLES
        .iter()
        .map(|table| {
            let present = tables.iter().any(|t| t == table);
            Check::new(
                format!("table {table}"),
                present,
                if present { "present" } else { "missing" },
            )
        })
        .collect()
}

/// Logs each check; true when all passed.
pub fn report(checks: &[Check]) -> bool {
    for check in checks {
        if check.passed {
            log::info!("[ok]   {}: {}", check.name, check.detail);
        } else {
            log::error!("[fail] {}: {}", check.name, check.detail);
        }
    }
    let failed = checks.iter().filter(|c| !c.passed).count();
    if failed == 0 {
        log::info!("all {} checks passed", checks.len());
    } else {
        log::error!("{failed} of {} checks failed", checks.len());
    }
    failed == 0
}

//! Database path resolution
//!
//! The inspection commands find the pipeline database either from an
//! explicit `--db-path` flag or from the `DB_PATH` key of the defaults
//! document named by `VEGA_DEFAULTS_PATH`.

use anyhow::{Context, anyhow};

const DEFAULTS_ENV_KEY: &str = "VEGA_DEFAULTS_PATH";
const DB_PATH_KEY: &str = "DB_PATH";

pub fn resolve_db_path(flag: Option<String>) -> anyhow::Result<String> {
    if let Some(path) = flag {
        return Ok(path);
    }

    let defaults_path = std::env::var(DEFAULTS_ENV_KEY).map_err(|_| {
        anyhow!(
            "either the environment variable '{DEFAULTS_ENV_KEY}' must point to a config file \
             containing the key '{DB_PATH_KEY}' or a database path must be provided with --db-path"
        )
    })?;

    let raw = std::fs::read_to_string(&defaults_path)
        .with_context(|| format!("failed to read defaults file {defaults_path}"))?;
    let table: toml::Table = raw
        .parse()
        .with_context(|| format!("failed to parse defaults file {defaults_path}"))?;

    table
        .get(DB_PATH_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("defaults file {defaults_path} has no string key '{DB_PATH_KEY}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_flag_wins() {
        let path = resolve_db_path(Some("/data/vega.db".to_string())).unwrap();
        assert_eq!(path, "/data/vega.db");
    }
}

//! Load `.edgarsync.toml` (CLI only). Library callers build `Opts` themselves.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::Opts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EdgarsyncToml {
    #[serde(default)]
    pub(crate) settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SettingsSection {
    db_path: Option<String>,
    start_year: Option<i32>,
    end_year: Option<i32>,
    archive_base: Option<String>,
    form_type: Option<String>,
    pub(crate) user_agent: Option<String>,
    max_requests: Option<usize>,
    min_requests: Option<usize>,
    backoff_factor: Option<f64>,
    fetch_workers: Option<usize>,
    parse_workers: Option<usize>,
    batch_size: Option<usize>,
    chunk_size: Option<usize>,
    stale_after_hours: Option<i64>,
    max_filings: Option<usize>,
    verbose: Option<bool>,
}

/// Default config location: `.edgarsync.toml` in `dir`.
pub(crate) fn default_config_path(dir: &Path) -> PathBuf {
    dir.join(PackagePaths::get().config_filename())
}

/// Load the config file if present. Returns None if missing or unreadable (a parse error is logged).
pub(crate) fn load_edgarsync_toml(path: &Path) -> Option<EdgarsyncToml> {
    let s = std::fs::read_to_string(path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $($opts_field:ident).+) => {
        if let Some(ref v) = $sec.$sec_field {
            $opts.$($opts_field).+ = v.clone();
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
pub(crate) fn apply_file_to_opts(file: &EdgarsyncToml, opts: &mut Opts) {
    let s = &file.settings;
    if let Some(ref p) = s.db_path {
        opts.db_path = PathBuf::from(p);
    }
    apply_file_opt!(s, opts, start_year => start_year);
    apply_file_opt!(s, opts, end_year => end_year);
    apply_file_opt!(s, opts, archive_base => archive_base);
    apply_file_opt!(s, opts, form_type => form_type);
    apply_file_opt!(s, opts, max_requests => rate_limit.max_requests);
    apply_file_opt!(s, opts, min_requests => rate_limit.min_requests);
    apply_file_opt!(s, opts, backoff_factor => rate_limit.backoff_factor);
    if let Some(n) = s.fetch_workers {
        opts.fetch_workers = Some(n);
    }
    apply_file_opt!(s, opts, parse_workers => parse_workers);
    apply_file_opt!(s, opts, batch_size => batch_size);
    apply_file_opt!(s, opts, chunk_size => chunk_size);
    apply_file_opt!(s, opts, stale_after_hours => stale_after_hours);
    apply_file_opt!(s, opts, verbose => verbose);
    if s.max_filings.is_some() {
        opts.max_filings = s.max_filings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let file: EdgarsyncToml = toml::from_str(
            r#"
            [settings]
            start_year = 2020
            max_requests = 4
            batch_size = 25
            fetch_workers = 4
            "#,
        )
        .unwrap();
        let mut opts = Opts::default();
        apply_file_to_opts(&file, &mut opts);
        assert_eq!(opts.start_year, 2020);
        assert_eq!(opts.rate_limit.max_requests, 4);
        assert_eq!(opts.batch_size, 25);
        assert_eq!(opts.fetch_workers, Some(4));
        assert_eq!(opts.parse_workers, Opts::default().parse_workers);
    }

    #[test]
    fn empty_file_is_valid() {
        let file: EdgarsyncToml = toml::from_str("").unwrap();
        assert!(file.settings.user_agent.is_none());
    }
}

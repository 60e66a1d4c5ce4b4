//! Filing discovery over the daily index: year → `QTR{n}/` listing → `form.YYYYMMDD.idx` manifests.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::FilingDescriptor;
use crate::engine::fetch::Transport;
use crate::engine::rate_limiter::RateLimiter;
use crate::engine::signal::StopSignal;
use crate::error::PipelineError;
use crate::types::UnitId;

/// Fixed-width manifest columns (character offsets).
const FORM_COLS: (usize, usize) = (0, 12);
const COMPANY_COLS: (usize, usize) = (12, 74);
const CIK_COLS: (usize, usize) = (74, 86);
const DATE_COLS: (usize, usize) = (86, 94);
const PATH_START: usize = 94;
/// Shorter lines cannot hold every column.
const MIN_LINE_CHARS: usize = 90;
const CIK_WIDTH: usize = 10;

fn column(chars: &[char], (start, end): (usize, usize)) -> String {
    let end = end.min(chars.len());
    let start = start.min(end);
    chars[start..end].iter().collect::<String>().trim().to_string()
}

fn parse_line(line: &str, form_type: &str, archive_base: &str) -> Option<FilingDescriptor> {
    let chars: Vec<char> = line.chars().collect();
    if chars.len() < MIN_LINE_CHARS || line.contains("--------") {
        return None;
    }
    if column(&chars, FORM_COLS) != form_type {
        return None;
    }
    let date_str = column(&chars, DATE_COLS);
    if date_str.len() != 8 || !date_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let filing_date = NaiveDate::parse_from_str(&date_str, "%Y%m%d").ok()?;
    let path = column(&chars, (PATH_START, chars.len()));
    let file_name = path.rsplit('/').next().filter(|s| !s.is_empty())?;
    let accession_number = file_name.trim_end_matches(".txt").to_string();
    let cik = column(&chars, CIK_COLS);
    Some(FilingDescriptor {
        accession_number,
        url: format!(
            "{}/{}",
            archive_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        company_cik: format!("{:0>width$}", cik, width = CIK_WIDTH),
        company_name: column(&chars, COMPANY_COLS),
        filing_date,
        form_type: form_type.to_string(),
    })
}

/// Parse one daily manifest. Data starts two lines after the `Form Type` header; malformed
/// or short lines and other form types are skipped.
pub fn parse_index_content(
    content: &str,
    form_type: &str,
    archive_base: &str,
) -> Vec<FilingDescriptor> {
    let lines: Vec<&str> = content.trim().lines().collect();
    let data_start = lines
        .iter()
        .position(|l| l.starts_with("Form Type"))
        .map_or(0, |i| i + 2);
    lines
        .iter()
        .skip(data_start)
        .filter_map(|line| parse_line(line.trim_end_matches('\r'), form_type, archive_base))
        .collect()
}

const MANIFEST_LINK: &str = r"form\.(\d{8})\.idx";

/// `YYYYMMDD` dates of the `form.*.idx` manifests linked from a quarter listing, sorted, deduplicated.
fn manifest_dates(re: &Regex, listing: &str) -> Vec<String> {
    let mut dates: Vec<String> = re
        .captures_iter(listing)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    dates.sort();
    dates.dedup();
    dates
}

/// Walks the daily index for one unit (calendar year).
pub struct IndexWalker {
    transport: Arc<dyn Transport>,
    limiter: Arc<dyn RateLimiter>,
    archive_base: String,
    form_type: String,
    manifest_link: Regex,
}

impl IndexWalker {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<dyn RateLimiter>,
        archive_base: &str,
        form_type: &str,
    ) -> Result<Self> {
        let manifest_link =
            Regex::new(MANIFEST_LINK).context("compile manifest link pattern")?;
        Ok(Self {
            transport,
            limiter,
            archive_base: archive_base.trim_end_matches('/').to_string(),
            form_type: form_type.to_string(),
            manifest_link,
        })
    }

    /// Manifest dates linked from a quarter listing.
    pub fn manifest_dates(&self, listing: &str) -> Vec<String> {
        manifest_dates(&self.manifest_link, listing)
    }

    pub fn quarter_url(&self, year: UnitId, quarter: u8) -> String {
        format!(
            "{}/edgar/daily-index/{}/QTR{}/",
            self.archive_base, year, quarter
        )
    }

    /// One rate-limited GET. `Ok(None)` for 404.
    fn get_text(&self, url: &str) -> Result<Option<String>> {
        self.limiter.admit();
        let resp = match self.transport.get(url) {
            Ok(r) => r,
            Err(e) => bail!("{url}: {e}"),
        };
        match resp.status {
            s if (200..300).contains(&s) => Ok(Some(resp.body)),
            404 => Ok(None),
            429 => {
                self.limiter.report_throttled();
                bail!("{url}: throttled (HTTP 429)")
            }
            s => bail!("{url}: HTTP {s}"),
        }
    }

    /// Every matching descriptor for `year`, deduplicated by accession number, capped at `max`.
    /// A quarter or manifest that cannot be read is logged and skipped.
    pub fn discover_unit(
        &self,
        year: UnitId,
        stop: &StopSignal,
        max: Option<usize>,
    ) -> Result<Vec<FilingDescriptor>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let cap = max.unwrap_or(usize::MAX);

        'quarters: for quarter in 1..=4_u8 {
            if stop.is_raised() {
                return Err(PipelineError::Cancelled.into());
            }
            let listing_url = self.quarter_url(year, quarter);
            let listing = match self.get_text(&listing_url) {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("No daily index for {} QTR{}", year, quarter);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {} QTR{}: {:#}", year, quarter, e);
                    continue;
                }
            };
            let dates = self.manifest_dates(&listing);
            debug!(
                "{} QTR{}: {} daily manifests",
                year,
                quarter,
                dates.len()
            );
            for date in dates {
                if stop.is_raised() {
                    return Err(PipelineError::Cancelled.into());
                }
                let url = format!("{listing_url}form.{date}.idx");
                let content = match self.get_text(&url) {
                    Ok(Some(body)) => body,
                    Ok(None) => {
                        debug!("Manifest {} missing", url);
                        continue;
                    }
                    Err(e) => {
                        warn!("Skipping manifest {}: {:#}", date, e);
                        continue;
                    }
                };
                for d in parse_index_content(&content, &self.form_type, &self.archive_base) {
                    if seen.insert(d.accession_number.clone()) {
                        found.push(d);
                        if found.len() >= cap {
                            info!("Reached filing cap of {} for {}", cap, year);
                            break 'quarters;
                        }
                    }
                }
            }
        }
        info!(
            "Discovered {} form {} filings for {}",
            found.len(),
            self.form_type,
            year
        );
        Ok(found)
    }
}

//! Shared fixtures: scripted archive transport, filing builders, temp databases.
#![allow(dead_code)]

use chrono::NaiveDate;
use edgarsync::engine::{
    FetchPolicy, RateLimiter, SlidingWindowLimiter, StopSignal, Transport, TransportError,
    TransportResponse,
};
use edgarsync::{FilingDescriptor, StoreItem};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const BASE: &str = "https://archive.test/Archives";

pub type Reply = Result<TransportResponse, TransportError>;

pub fn reply_ok(body: &str) -> Reply {
    Ok(TransportResponse {
        status: 200,
        body: body.to_string(),
    })
}

pub fn reply_status(status: u16) -> Reply {
    Ok(TransportResponse {
        status,
        body: String::new(),
    })
}

/// Fake archive. Each URL answers from its script in order; the last reply repeats.
/// Unscripted URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    hooks: Mutex<Vec<(String, Hook)>>,
}

type Hook = Box<dyn Fn() + Send>;

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    pub fn ok(&self, url: &str, body: &str) {
        self.route(url, vec![reply_ok(body)]);
    }

    /// Raise `stop` when `url` is requested (simulates Ctrl+C mid-run).
    pub fn stop_on(&self, url: &str, stop: StopSignal) {
        self.on_request(url, move || stop.raise());
    }

    /// Run `hook` each time `url` is requested, before it is answered.
    pub fn on_request(&self, url: &str, hook: impl Fn() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap()
            .push((url.to_string(), Box::new(hook)));
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        for (hooked, hook) in self.hooks.lock().unwrap().iter() {
            if hooked == url {
                hook();
            }
        }
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap(),
            Some(q) => q.front().cloned().unwrap_or_else(|| reply_status(404)),
            None => reply_status(404),
        }
    }
}

/// Retry policy with every delay zeroed.
pub fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        first_delay: Duration::ZERO,
        jitter: Duration::ZERO,
        retry_base: Duration::ZERO,
        throttle_base: Duration::ZERO,
        throttle_floor: Duration::ZERO,
        throttle_jitter: Duration::ZERO,
        ..FetchPolicy::default()
    }
}

/// Limiter that never blocks in practice.
pub fn open_limiter() -> Arc<dyn RateLimiter> {
    Arc::new(SlidingWindowLimiter::new(100_000, Duration::from_secs(1)))
}

pub fn doc_url(cik: &str, accession: &str) -> String {
    format!("{BASE}/edgar/data/{cik}/{accession}.txt")
}

pub fn descriptor(accession: &str) -> FilingDescriptor {
    FilingDescriptor {
        accession_number: accession.to_string(),
        url: doc_url("320193", accession),
        company_cik: "0000320193".to_string(),
        company_name: "APPLE INC".to_string(),
        filing_date: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
        form_type: "4".to_string(),
    }
}

/// Full submission text wrapping an ownership document with two transactions.
pub fn filing_text(accession: &str) -> String {
    format!(
        r#"<SEC-DOCUMENT>{accession}.txt : 20230103
<TYPE>4
<XML>
<?xml version="1.0"?>
<ownershipDocument>
    <schemaVersion>X0306</schemaVersion>
    <documentType>4</documentType>
    <periodOfReport>2023-01-03</periodOfReport>
    <issuer>
        <issuerCik>0000320193</issuerCik>
        <issuerName>Apple Inc.</issuerName>
        <issuerTradingSymbol>AAPL</issuerTradingSymbol>
    </issuer>
    <reportingOwner>
        <reportingOwnerId>
            <rptOwnerCik>0001214156</rptOwnerCik>
            <rptOwnerName>COOK TIMOTHY D</rptOwnerName>
        </reportingOwnerId>
        <reportingOwnerRelationship>
            <isDirector>1</isDirector>
            <isOfficer>1</isOfficer>
            <officerTitle>Chief Executive Officer</officerTitle>
        </reportingOwnerRelationship>
    </reportingOwner>
    <nonDerivativeTable>
        <nonDerivativeTransaction><securityTitle><value>Common Stock</value></securityTitle></nonDerivativeTransaction>
        <nonDerivativeTransaction><securityTitle><value>Common Stock</value></securityTitle></nonDerivativeTransaction>
    </nonDerivativeTable>
</ownershipDocument>
</XML>
</SEC-DOCUMENT>
"#
    )
}

/// Long enough to pass validation but holds no ownership document.
pub fn unparseable_text(accession: &str) -> String {
    format!("<SEC-DOCUMENT>{accession}.txt\n<TYPE>4\n{}\n</SEC-DOCUMENT>", "x".repeat(200))
}

pub fn store_item(accession: &str, content: &str) -> StoreItem {
    StoreItem {
        descriptor: descriptor(accession),
        content: content.to_string(),
        record: None,
    }
}

/// One fixed-width manifest row.
pub fn manifest_line(form: &str, company: &str, cik: &str, date: &str, path: &str) -> String {
    format!("{form:<12}{company:<62}{cik:<12}{date:<8}{path}")
}

/// Daily manifest with the usual preamble, header and separator.
pub fn manifest(rows: &[String]) -> String {
    let mut s = String::from(
        "Description:           Daily Index of EDGAR Dissemination Feed by Form Type\n\
         Last Data Received:    January 3, 2023\n\
         Comments:              webmaster@sec.gov\n\
         Anonymous FTP:         ftp://ftp.sec.gov/edgar/\n\
         \n\
         \n\
         \n\
         Form Type   Company Name                                                  CIK         Date Filed  File Name\n\
         ---------------------------------------------------------------------------------------------------------------------------------------------\n",
    );
    for row in rows {
        s.push_str(row);
        s.push('\n');
    }
    s
}

pub fn quarter_url(year: i32, quarter: u8) -> String {
    format!("{BASE}/edgar/daily-index/{year}/QTR{quarter}/")
}

/// Directory listing page linking the given manifests.
pub fn listing(dates: &[&str]) -> String {
    let mut s = String::from("<html><body><table>\n");
    for d in dates {
        s.push_str(&format!(
            "<tr><td><a href=\"form.{d}.idx\">form.{d}.idx</a></td></tr>\n"
        ));
    }
    s.push_str("</table></body></html>\n");
    s
}

/// Script a year with one QTR1 manifest listing `accessions` (all form 4) and their documents.
pub fn publish_year(t: &ScriptedTransport, year: i32, accessions: &[&str]) {
    let date = format!("{year}0103");
    t.ok(&quarter_url(year, 1), &listing(&[date.as_str()]));
    let rows: Vec<String> = accessions
        .iter()
        .map(|acc| {
            manifest_line(
                "4",
                "APPLE INC",
                "320193",
                &date,
                &format!("edgar/data/320193/{acc}.txt"),
            )
        })
        .collect();
    t.ok(
        &format!("{}form.{date}.idx", quarter_url(year, 1)),
        &manifest(&rows),
    );
    for acc in accessions {
        t.ok(&doc_url("320193", acc), &filing_text(acc));
    }
}

pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("edgarsync.db");
    (dir, path)
}

pub fn accessions(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}-23-{i:06}")).collect()
}

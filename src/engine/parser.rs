//! Content → structured record.

use chrono::NaiveDate;
use regex::Regex;

use crate::error::ParseError;
use crate::types::{FilingDescriptor, IssuerInfo, ReportingOwner, StructuredRecord};

/// Parse stage boundary. Implementations must be pure and thread-safe; parse workers share one.
pub trait FilingParser: Send + Sync {
    fn parse(
        &self,
        descriptor: &FilingDescriptor,
        content: &str,
    ) -> Result<StructuredRecord, ParseError>;
}

struct OwnershipPatterns {
    document: Regex,
    period: Regex,
    issuer: Regex,
    owner: Regex,
    transaction: Regex,
}

impl OwnershipPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            document: Regex::new(r"(?s)<ownershipDocument>.*</ownershipDocument>")?,
            period: Regex::new(r"<periodOfReport>\s*(\d{4}-\d{2}-\d{2})\s*</periodOfReport>")?,
            issuer: Regex::new(r"(?s)<issuer>(.*?)</issuer>")?,
            owner: Regex::new(r"(?s)<reportingOwner>(.*?)</reportingOwner>")?,
            transaction: Regex::new(r"<(?:nonDerivativeTransaction|derivativeTransaction)>")?,
        })
    }
}

/// First capture of `<tag>value</tag>` inside `block`, trimmed. Empty values are None.
fn tag_value(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    let value = block[start..end].trim();
    // Some filers wrap scalars in <value>.
    let value = value
        .strip_prefix("<value>")
        .and_then(|v| v.strip_suffix("</value>"))
        .unwrap_or(value)
        .trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn flag(block: &str, tag: &str) -> bool {
    matches!(
        tag_value(block, tag).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("True")
    )
}

fn relationship(owner_block: &str) -> Option<String> {
    let mut parts = Vec::new();
    if flag(owner_block, "isDirector") {
        parts.push("Director".to_string());
    }
    if flag(owner_block, "isOfficer") {
        match tag_value(owner_block, "officerTitle") {
            Some(title) => parts.push(format!("Officer ({title})")),
            None => parts.push("Officer".to_string()),
        }
    }
    if flag(owner_block, "isTenPercentOwner") {
        parts.push("10% Owner".to_string());
    }
    if flag(owner_block, "isOther") {
        parts.push(tag_value(owner_block, "otherText").unwrap_or_else(|| "Other".to_string()));
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Insider-ownership XML parser. Pulls issuer, first reporting owner, period and transaction count.
pub struct OwnershipParser {
    patterns: OwnershipPatterns,
}

impl OwnershipParser {
    pub fn new() -> anyhow::Result<Self> {
        let patterns = OwnershipPatterns::compile()
            .map_err(|e| anyhow::anyhow!("compile ownership patterns: {e}"))?;
        Ok(Self { patterns })
    }
}

impl FilingParser for OwnershipParser {
    fn parse(
        &self,
        descriptor: &FilingDescriptor,
        content: &str,
    ) -> Result<StructuredRecord, ParseError> {
        let p = &self.patterns;
        let doc = p
            .document
            .find(content)
            .map(|m| m.as_str())
            .ok_or_else(|| ParseError("no ownership document".to_string()))?;

        let document_type = tag_value(doc, "documentType")
            .ok_or_else(|| ParseError("missing documentType".to_string()))?;

        let period_of_report = match p.period.captures(doc).and_then(|c| c.get(1)) {
            Some(m) => Some(
                NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d")
                    .map_err(|e| ParseError(format!("bad periodOfReport: {e}")))?,
            ),
            None => None,
        };

        let issuer = p
            .issuer
            .captures(doc)
            .and_then(|c| c.get(1))
            .map(|m| {
                let block = m.as_str();
                IssuerInfo {
                    cik: tag_value(block, "issuerCik"),
                    name: tag_value(block, "issuerName"),
                    trading_symbol: tag_value(block, "issuerTradingSymbol"),
                }
            })
            .unwrap_or_default();

        let reporting_owner = p
            .owner
            .captures(doc)
            .and_then(|c| c.get(1))
            .map(|m| {
                let block = m.as_str();
                ReportingOwner {
                    cik: tag_value(block, "rptOwnerCik"),
                    name: tag_value(block, "rptOwnerName"),
                    relationship: relationship(block),
                }
            })
            .unwrap_or_default();

        Ok(StructuredRecord {
            accession_number: descriptor.accession_number.clone(),
            document_type,
            period_of_report,
            issuer,
            reporting_owner,
            transaction_count: p.transaction.find_iter(doc).count(),
        })
    }
}

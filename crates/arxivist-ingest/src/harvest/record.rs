//! Normalized harvest records

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::xml::Element;
use crate::error::{IngestError, Result};

/// Prefix of arXiv OAI identifiers, e.g. `oai:arXiv.org:2101.00001`.
pub const OAI_IDENTIFIER_PREFIX: &str = "oai:arXiv.org:";

const NEW_STYLE_PATTERN: &str = r"^\d{4}\.\d{4,5}(v\d+)?$";
const OLD_STYLE_PATTERN: &str = r"^[a-z][a-z-]*(\.[A-Z]{2})?/\d{7}(v\d+)?$";

static NEW_STYLE_ID: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(NEW_STYLE_PATTERN));

static OLD_STYLE_ID: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(OLD_STYLE_PATTERN));

/// Panics on an invalid pattern; both patterns are compiled in tests.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// One harvested record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identity: String,
    /// Primary category, e.g. `cs.LG`
    pub category: String,
    /// Header datestamp (`YYYY-MM-DD`)
    pub datestamp: String,
    /// Metadata format element name, e.g. `arXivRaw`
    pub format: String,
    /// Metadata block as JSON
    pub metadata: serde_json::Value,
}

impl Record {
    /// Build a record from an OAI `<record>` element.
    pub fn from_oai(record: &Element) -> Result<Self> {
        let header = record
            .child("header")
            .ok_or_else(|| IngestError::malformed("record without header"))?;

        let oai_identifier = header.child_text("identifier");
        let datestamp = header.child_text("datestamp").ok_or_else(|| {
            IngestError::malformed(format!(
                "record {} has no datestamp",
                oai_identifier.unwrap_or("<unknown>")
            ))
        })?;

        let metadata = record
            .child("metadata")
            .and_then(|m| m.children.first())
            .ok_or_else(|| {
                IngestError::malformed(format!(
                    "record {} has no metadata block",
                    oai_identifier.unwrap_or("<unknown>")
                ))
            })?;

        let identity = metadata
            .child_text("id")
            .or_else(|| oai_identifier.map(|id| id.strip_prefix(OAI_IDENTIFIER_PREFIX).unwrap_or(id)))
            .ok_or_else(|| IngestError::malformed("record has neither <id> nor an OAI identifier"))?;

        let category = metadata
            .child_text("categories")
            .and_then(|c| c.split_whitespace().next())
            .or_else(|| header.child_text("setSpec"))
            .ok_or_else(|| IngestError::malformed(format!("record {} has no category", identity)))?;

        Ok(Self {
            identity: identity.to_string(),
            category: category.to_string(),
            datestamp: datestamp.to_string(),
            format: metadata.name.clone(),
            metadata: metadata.to_json(),
        })
    }

    /// Whether the header marks this record as deleted.
    pub fn is_deleted(record: &Element) -> bool {
        record
            .child("header")
            .and_then(|h| h.attr("status"))
            .is_some_and(|status| status == "deleted")
    }
}

/// Ways an identity can deviate from the arXiv identifier schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeViolation {
    MissingSeparator,
    ExtraSegments,
    Hyphenated,
    Unrecognized,
}

impl fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShapeViolation::MissingSeparator => "missing separator",
            ShapeViolation::ExtraSegments => "unexpected extra segments",
            ShapeViolation::Hyphenated => "embedded hyphenation",
            ShapeViolation::Unrecognized => "unrecognized identifier scheme",
        };
        f.write_str(text)
    }
}

/// Check `identity` against `YYMM.NNNNN` and `archive/YYMMNNN`.
///
/// Violations are advisory: the record is processed either way.
pub fn check_identity_shape(identity: &str) -> Option<ShapeViolation> {
    if NEW_STYLE_ID.is_match(identity) || OLD_STYLE_ID.is_match(identity) {
        return None;
    }

    let slashes = identity.matches('/').count();
    if slashes == 0 && !identity.contains('.') {
        return Some(ShapeViolation::MissingSeparator);
    }
    if slashes > 1 || (slashes == 0 && identity.matches('.').count() > 1) {
        return Some(ShapeViolation::ExtraSegments);
    }
    if slashes == 0 && identity.contains('-') {
        return Some(ShapeViolation::Hyphenated);
    }
    Some(ShapeViolation::Unrecognized)
}

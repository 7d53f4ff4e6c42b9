//! OAI-PMH `ListRecords` client
//!
//! The first request carries `metadataPrefix`, `from` and an optional `set`;
//! every later request carries only the `resumptionToken` from the previous
//! page. An empty or missing token ends the listing.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use super::record::Record;
use super::xml;
use crate::config::HarvestConfig;
use crate::error::{IngestError, Result};
use crate::fetch::rate_limiter::parse_retry_after;
use crate::retry::{retry_transient, RetryPolicy};

/// OAI error code meaning "valid request, nothing to list".
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRequest {
    /// First page, bounded below by `from` (`YYYY-MM-DD`)
    Initial { from: Option<String> },
    Resume { token: String },
}

/// One page of the listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub deleted: u64,
    pub malformed: u64,
    /// `None` on the last page
    pub resumption_token: Option<String>,
    /// Server clock at response time; logged only. Never used as the cursor,
    /// which is the datestamp of the page's last record.
    pub response_date: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.resumption_token.is_none()
    }
}

#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn list_records(&self, request: &ListRequest) -> Result<Page>;
}

pub struct OaiClient {
    client: Client,
    endpoint: String,
    metadata_prefix: String,
    set: Option<String>,
    retry: RetryPolicy,
}

impl OaiClient {
    pub fn new(config: &HarvestConfig, user_agent: &str, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent)
            .build()
            .map_err(|e| IngestError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            metadata_prefix: config.metadata_prefix.clone(),
            set: config.set.clone(),
            retry,
        })
    }

    pub fn query_for(&self, request: &ListRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("verb", "ListRecords".to_string())];
        match request {
            ListRequest::Initial { from } => {
                query.push(("metadataPrefix", self.metadata_prefix.clone()));
                if let Some(from) = from {
                    query.push(("from", from.clone()));
                }
                if let Some(set) = &self.set {
                    query.push(("set", set.clone()));
                }
            },
            ListRequest::Resume { token } => query.push(("resumptionToken", token.clone())),
        }
        query
    }

    async fn attempt(&self, query: &[(&'static str, String)]) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(query)
            .send()
            .await
            .map_err(|e| IngestError::transient("list_records", e))?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
            // OAI flow control: wait as told before the retry loop tries again
            if let Some(delay) = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
            {
                info!(delay_secs = delay.as_secs(), "Feed asked us to retry later");
                tokio::time::sleep(delay).await;
            }
            return Err(IngestError::transient("list_records", format!("HTTP {}", status)));
        }
        if status.is_server_error() {
            return Err(IngestError::transient("list_records", format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(IngestError::permanent("list_records", format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| IngestError::transient("list_records", e))
    }
}

#[async_trait]
impl FeedClient for OaiClient {
    #[instrument(skip(self))]
    async fn list_records(&self, request: &ListRequest) -> Result<Page> {
        let query = self.query_for(request);
        let params = query.as_slice();
        let body = retry_transient(&self.retry, "list_records", || self.attempt(params)).await?;

        let page = parse_page(&body)?;
        debug!(
            records = page.records.len(),
            deleted = page.deleted,
            last = page.is_last(),
            "Received page"
        );
        Ok(page)
    }
}

/// Parse a `ListRecords` response document.
///
/// Deleted and malformed records are counted and left out of the page.
pub fn parse_page(body: &str) -> Result<Page> {
    let root = xml::parse(body)?;
    if root.name != "OAI-PMH" {
        return Err(IngestError::malformed(format!(
            "expected OAI-PMH document, got <{}>",
            root.name
        )));
    }

    let response_date = root.child_text("responseDate").map(str::to_string);

    if let Some(error) = root.child("error") {
        let code = error.attr("code").unwrap_or("unknown");
        if code == NO_RECORDS_MATCH {
            return Ok(Page {
                response_date,
                ..Page::default()
            });
        }
        return Err(IngestError::malformed(format!("OAI error {}: {}", code, error.text)));
    }

    let list = root
        .child("ListRecords")
        .ok_or_else(|| IngestError::malformed("OAI response without ListRecords"))?;

    let mut page = Page {
        response_date,
        resumption_token: list.child_text("resumptionToken").map(str::to_string),
        ..Page::default()
    };

    for element in list.children_named("record") {
        if Record::is_deleted(element) {
            page.deleted += 1;
            continue;
        }
        match Record::from_oai(element) {
            Ok(record) => page.records.push(record),
            Err(e) => {
                warn!(error = %e, "Skipping malformed record");
                page.malformed += 1;
            },
        }
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2021-01-05T12:00:00Z</responseDate>
  <request verb="ListRecords" metadataPrefix="arXivRaw">http://export.arxiv.org/oai2</request>
  <ListRecords>
    <record>
      <header>
        <identifier>oai:arXiv.org:2101.00001</identifier>
        <datestamp>2021-01-04</datestamp>
        <setSpec>cs</setSpec>
      </header>
      <metadata>
        <arXivRaw xmlns="http://arxiv.org/OAI/arXivRaw/">
          <id>2101.00001</id>
          <categories>cs.LG</categories>
        </arXivRaw>
      </metadata>
    </record>
    <record>
      <header status="deleted">
        <identifier>oai:arXiv.org:2101.00009</identifier>
        <datestamp>2021-01-04</datestamp>
      </header>
    </record>
    <record>
      <header><identifier>oai:arXiv.org:2101.00010</identifier></header>
    </record>
    <resumptionToken cursor="0" completeListSize="3">6182467|1001</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    fn client() -> OaiClient {
        OaiClient::new(&HarvestConfig::default(), "test", RetryPolicy::none()).unwrap()
    }

    #[test]
    fn test_parse_page() {
        let page = parse_page(PAGE).unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].identity, "2101.00001");
        assert_eq!(page.deleted, 1);
        assert_eq!(page.malformed, 1);
        assert_eq!(page.resumption_token.as_deref(), Some("6182467|1001"));
        assert_eq!(page.response_date.as_deref(), Some("2021-01-05T12:00:00Z"));
        assert!(!page.is_last());
    }

    #[test]
    fn test_empty_resumption_token_ends_listing() {
        let body = r#"<OAI-PMH><ListRecords><resumptionToken completeListSize="0"/></ListRecords></OAI-PMH>"#;
        let page = parse_page(body).unwrap();
        assert!(page.is_last());
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_no_records_match_is_empty_final_page() {
        let body = r#"<OAI-PMH><responseDate>2021-01-05</responseDate><error code="noRecordsMatch">nothing</error></OAI-PMH>"#;
        let page = parse_page(body).unwrap();
        assert!(page.is_last());
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_other_oai_errors_are_malformed() {
        let body = r#"<OAI-PMH><error code="badResumptionToken">expired</error></OAI-PMH>"#;
        let err = parse_page(body).unwrap_err();
        assert!(err.to_string().contains("badResumptionToken"));
    }

    #[test]
    fn test_unexpected_root_is_malformed() {
        assert!(matches!(parse_page("<html/>"), Err(IngestError::Malformed(_))));
    }

    #[test]
    fn test_query_for_initial_and_resume() {
        let client = client();

        let initial = client.query_for(&ListRequest::Initial {
            from: Some("2021-01-01".to_string()),
        });
        assert_eq!(
            initial,
            vec![
                ("verb", "ListRecords".to_string()),
                ("metadataPrefix", "arXivRaw".to_string()),
                ("from", "2021-01-01".to_string()),
            ]
        );

        let resume = client.query_for(&ListRequest::Resume {
            token: "abc|1001".to_string(),
        });
        assert_eq!(
            resume,
            vec![
                ("verb", "ListRecords".to_string()),
                ("resumptionToken", "abc|1001".to_string()),
            ]
        );
    }
}

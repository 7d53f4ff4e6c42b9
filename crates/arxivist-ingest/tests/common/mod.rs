//! Shared fixtures for arxivist-ingest integration tests

#![allow(dead_code)]

use arxivist_ingest::config::{FetchConfig, HarvestConfig};
use arxivist_ingest::retry::RetryPolicy;
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,arxivist_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Two attempts with millisecond backoff
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    }
}

pub fn harvest_config(server_uri: &str) -> HarvestConfig {
    HarvestConfig {
        endpoint: format!("{}/oai2", server_uri),
        epoch: "2021-01-01".to_string(),
        timeout_secs: 5,
        ..HarvestConfig::default()
    }
}

pub fn fetch_config(server_uri: &str, min_interval_ms: u64) -> FetchConfig {
    FetchConfig {
        base_url: format!("{}/pdf", server_uri),
        min_interval_ms,
        timeout_secs: 5,
        ..FetchConfig::default()
    }
}

/// `arXivRaw` record as it appears inside `<ListRecords>`
pub fn oai_record(identity: &str, datestamp: &str, category: &str) -> String {
    format!(
        r#"<record>
      <header>
        <identifier>oai:arXiv.org:{identity}</identifier>
        <datestamp>{datestamp}</datestamp>
        <setSpec>{set}</setSpec>
      </header>
      <metadata>
        <arXivRaw xmlns="http://arxiv.org/OAI/arXivRaw/">
          <id>{identity}</id>
          <title>Paper {identity}</title>
          <categories>{category}</categories>
        </arXivRaw>
      </metadata>
    </record>"#,
        identity = identity,
        datestamp = datestamp,
        set = category.split('.').next().unwrap_or(category),
        category = category,
    )
}

/// Full `ListRecords` response; an empty token marks the last page.
pub fn oai_page(records: &[String], resumption_token: Option<&str>) -> String {
    let token = match resumption_token {
        Some(token) => format!("<resumptionToken cursor=\"0\">{}</resumptionToken>", token),
        None => "<resumptionToken cursor=\"0\"/>".to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2021-01-05T12:00:00Z</responseDate>
  <request verb="ListRecords">http://export.arxiv.org/oai2</request>
  <ListRecords>
    {}
    {}
  </ListRecords>
</OAI-PMH>"#,
        records.join("\n    "),
        token
    )
}

/// Uncompressed tar with the given regular files
pub fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *data)
            .expect("append tar member");
    }
    builder.into_inner().expect("finish tar")
}

/// Same as [`build_tar`], gzip-compressed
pub fn build_tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&build_tar(files)).expect("gzip tar");
    encoder.finish().expect("finish gzip")
}

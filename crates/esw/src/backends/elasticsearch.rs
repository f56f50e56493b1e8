//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN -- INT. SERVER ROOM -- 3:47 AM
//!
//! The dashboards are green. The dashboards are always green. That is
//! exactly what makes the on-call engineer nervous. Somewhere a scraper just
//! produced a sample with the value `NaN`, and somewhere else a mapping is
//! waiting to reject a `long` that showed up as a `float`.
//!
//! 🚀 This module opens a session with `GET /`, renders NDJSON, fires it at
//! `POST /_bulk`, and then reads the response carefully, because a 200 from
//! the bulk API means "I read your letter", not "I agreed with every line of it".
//!
//! ⚠️ No retries live here. No auth lives here either. Those are other people's problems.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::backends::{BulkAck, BulkBackend, BulkSession};
use crate::common::Document;
use crate::errors::SubmissionCause;

/// 🔌 Opens reqwest-backed sessions to an Elasticsearch cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ElasticsearchBackend {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl Default for ElasticsearchBackend {
    fn default() -> Self {
        // 🔧 10s to shake hands, 30s to finish the conversation. We will wait, but not forever.
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

#[async_trait]
impl BulkBackend for ElasticsearchBackend {
    type Session = ElasticsearchSession;

    /// 📡 Build a client, then knock on the root URL to make sure someone is home.
    ///
    /// If the knock fails we fail here, before a single document is rendered.
    async fn open(&self, url: &str) -> Result<ElasticsearchSession> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .context("💀 The HTTP client refused to be born. Probably a cursed TLS setup. Either way: tragic.")?;

        let response = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("💀 Knocked on '{url}' and nobody answered. Is the cluster running? Is the URL right? Is it DNS? It's always DNS."))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "💀 '{}' answered the door with '{}' and then closed it again. Not the welcome we hoped for.",
                url,
                status
            );
        }
        debug!("✅ Cluster at '{}' is home and accepting visitors", url);

        Ok(ElasticsearchSession {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }
}

/// 📦 One open conversation with the cluster.
#[derive(Debug)]
pub struct ElasticsearchSession {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl BulkSession for ElasticsearchSession {
    async fn bulk_index(
        &mut self,
        index: &str,
        document_type: &str,
        documents: &[Document],
        deadline: Instant,
    ) -> std::result::Result<BulkAck, SubmissionCause> {
        let time_left = deadline.saturating_duration_since(Instant::now());
        if time_left.is_zero() {
            return Err(SubmissionCause::DeadlineExceeded);
        }

        let request_body = render_bulk_body(index, document_type, documents)?;
        let bulk_url = format!("{}/_bulk", self.base_url);
        debug!(
            "📡 Sending {} documents ({} bytes) to {}",
            documents.len(),
            request_body.len(),
            bulk_url
        );

        // ⚠️ application/x-ndjson, not application/json. The bulk API has opinions.
        let response = self
            .client
            .post(&bulk_url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .timeout(time_left)
            .body(request_body)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|err| match err.is_timeout() {
                true => SubmissionCause::DeadlineExceeded,
                false => SubmissionCause::NoResponse,
            })?;

        if !status.is_success() {
            return Err(SubmissionCause::Rejected(format!(
                "status {status}, body: {response_body}"
            )));
        }

        trace!("🚀 Bulk request answered, reading the fine print");
        parse_bulk_response(&response_body)
    }

    async fn close(&mut self) -> Result<()> {
        // -- 🗑️ the client drops with the session, pooled connections go with it
        debug!("🗑️ Closing session to '{}'", self.base_url);
        Ok(())
    }
}

fn classify_transport_error(err: &reqwest::Error) -> SubmissionCause {
    if err.is_timeout() {
        SubmissionCause::DeadlineExceeded
    } else {
        SubmissionCause::Rejected(format!("the request never landed: {err}"))
    }
}

/// 🔄 Render documents into the sacred two-lines-per-document NDJSON body.
///
/// ```text
/// {"index":{"_index":"prometheus","_type":"sample"}}
/// {"metric":"up","timestamp":1000,"value":1.0,"tags":{"instance":"a"}}
/// ```
///
/// `_type` is left out when `document_type` is empty; typeless clusters reject it.
/// The body ends with a newline. It MATTERS.
pub(crate) fn render_bulk_body(
    index: &str,
    document_type: &str,
    documents: &[Document],
) -> std::result::Result<String, SubmissionCause> {
    let mut the_action_metadata = Map::new();
    the_action_metadata.insert("_index".to_string(), Value::String(index.to_string()));
    if !document_type.is_empty() {
        the_action_metadata.insert("_type".to_string(), Value::String(document_type.to_string()));
    }
    let the_action_line = json!({ "index": the_action_metadata }).to_string();

    let mut bulk_body = String::with_capacity(documents.len() * (the_action_line.len() + 128));
    for document in documents {
        let the_source_line = serde_json::to_string(document).map_err(|err| {
            SubmissionCause::Rejected(format!("a document refused to become JSON: {err}"))
        })?;
        bulk_body.push_str(&the_action_line);
        bulk_body.push('\n');
        bulk_body.push_str(&the_source_line);
        bulk_body.push('\n');
    }
    Ok(bulk_body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkItem {
    fn landed(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn describe(&self) -> String {
        match self.error.as_ref() {
            Some(Value::Object(details)) => {
                let kind = details.get("type").and_then(Value::as_str).unwrap_or("unknown");
                let reason = details.get("reason").and_then(Value::as_str).unwrap_or("no reason given");
                format!("status {}: {}: {}", self.status, kind, reason)
            }
            Some(other) => format!("status {}: {}", self.status, other),
            None => format!("status {}", self.status),
        }
    }
}

/// 🧾 Count the acknowledged actions in a `_bulk` response body.
///
/// An empty or unparseable body is [`SubmissionCause::NoResponse`].
pub(crate) fn parse_bulk_response(body: &str) -> std::result::Result<BulkAck, SubmissionCause> {
    if body.trim().is_empty() {
        return Err(SubmissionCause::NoResponse);
    }
    let response: BulkResponse =
        serde_json::from_str(body).map_err(|_| SubmissionCause::NoResponse)?;

    let the_outcomes: Vec<&BulkItem> = response.items.iter().flat_map(|item| item.values()).collect();
    let acknowledged = the_outcomes.iter().filter(|outcome| outcome.landed()).count();
    let first_failure = the_outcomes
        .iter()
        .find(|outcome| !outcome.landed())
        .map(|outcome| outcome.describe());

    if response.errors {
        debug!(
            "⚠️ Bulk response flagged errors: {} of {} actions landed",
            acknowledged,
            the_outcomes.len()
        );
    }

    Ok(BulkAck {
        acknowledged,
        first_failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn the_up_document(instance: &str, value: f64) -> Document {
        let mut tags = BTreeMap::new();
        tags.insert("instance".to_string(), instance.to_string());
        Document {
            metric: "up".to_string(),
            timestamp: 1000,
            value,
            tags,
        }
    }

    fn the_distant_future() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    async fn a_cluster_that_says_hello() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"tagline": "You Know, for Search"})),
            )
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn the_one_where_documents_become_two_lines_each() -> anyhow::Result<()> {
        let the_body = render_bulk_body(
            "prometheus",
            "sample",
            &[the_up_document("a", 1.0), the_up_document("b", 0.0)],
        )?;

        assert!(the_body.ends_with('\n'), "the trailing newline is not optional");
        let the_lines: Vec<&str> = the_body.lines().collect();
        assert_eq!(the_lines.len(), 4);

        let the_action: Value = serde_json::from_str(the_lines[0])?;
        assert_eq!(the_action, json!({"index": {"_index": "prometheus", "_type": "sample"}}));

        let the_source: Value = serde_json::from_str(the_lines[3])?;
        assert_eq!(
            the_source,
            json!({"metric": "up", "timestamp": 1000, "value": 0.0, "tags": {"instance": "b"}})
        );
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_type_stays_out_of_the_action_line() -> anyhow::Result<()> {
        let the_body = render_bulk_body("prometheus", "", &[the_up_document("a", 1.0)])?;

        let the_action: Value = serde_json::from_str(
            the_body.lines().next().context("💀 expected an action line")?,
        )?;
        assert!(the_action["index"].get("_type").is_none());
        assert_eq!(the_action["index"]["_index"], "prometheus");
        Ok(())
    }

    #[test]
    fn the_one_where_partial_failures_are_counted_not_ignored() -> anyhow::Result<()> {
        let the_body = json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_index": "prometheus", "status": 201}},
                {"index": {"_index": "prometheus", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [value]"}}}
            ]
        })
        .to_string();

        let the_ack = parse_bulk_response(&the_body)?;

        assert_eq!(the_ack.acknowledged, 1);
        let the_failure = the_ack.first_failure.context("💀 expected a described failure")?;
        assert!(the_failure.contains("400"));
        assert!(the_failure.contains("mapper_parsing_exception"));
        Ok(())
    }

    #[test]
    fn the_one_where_silence_is_not_an_answer() {
        assert_eq!(parse_bulk_response(""), Err(SubmissionCause::NoResponse));
        assert_eq!(parse_bulk_response("   \n"), Err(SubmissionCause::NoResponse));
        assert_eq!(parse_bulk_response("<html>nginx says hi</html>"), Err(SubmissionCause::NoResponse));
    }

    #[tokio::test]
    async fn the_one_where_the_bulk_request_lands_in_full() -> anyhow::Result<()> {
        let server = a_cluster_that_says_hello().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 1,
                "errors": false,
                "items": [{"index": {"_index": "prometheus", "status": 201}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = ElasticsearchBackend::default().open(&server.uri()).await?;
        let the_ack = session
            .bulk_index("prometheus", "sample", &[the_up_document("a", 1.0)], the_distant_future())
            .await?;
        session.close().await?;

        assert_eq!(the_ack.acknowledged, 1);
        assert_eq!(the_ack.first_failure, None);

        let the_requests = server
            .received_requests()
            .await
            .context("💀 wiremock forgot to record requests")?;
        let the_bulk_request = the_requests
            .iter()
            .find(|request| request.url.path() == "/_bulk")
            .context("💀 the bulk request never arrived")?;
        let the_wire_body = String::from_utf8(the_bulk_request.body.clone())?;
        assert_eq!(
            the_wire_body,
            "{\"index\":{\"_index\":\"prometheus\",\"_type\":\"sample\"}}\n\
             {\"metric\":\"up\",\"timestamp\":1000,\"value\":1.0,\"tags\":{\"instance\":\"a\"}}\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_500_is_a_rejection() -> anyhow::Result<()> {
        let server = a_cluster_that_says_hello().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_string("shard on fire"))
            .mount(&server)
            .await;

        let mut session = ElasticsearchBackend::default().open(&server.uri()).await?;
        let the_outcome = session
            .bulk_index("prometheus", "sample", &[the_up_document("a", 1.0)], the_distant_future())
            .await;

        match the_outcome {
            Err(SubmissionCause::Rejected(details)) => {
                assert!(details.contains("500"));
                assert!(details.contains("shard on fire"));
            }
            plot_twist => panic!("💀 expected a rejection, got {plot_twist:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_200_is_no_response_at_all() -> anyhow::Result<()> {
        let server = a_cluster_that_says_hello().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut session = ElasticsearchBackend::default().open(&server.uri()).await?;
        let the_outcome = session
            .bulk_index("prometheus", "sample", &[the_up_document("a", 1.0)], the_distant_future())
            .await;

        assert_eq!(the_outcome, Err(SubmissionCause::NoResponse));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_slow_cluster_runs_out_the_clock() -> anyhow::Result<()> {
        let server = a_cluster_that_says_hello().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errors": false, "items": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut session = ElasticsearchBackend::default().open(&server.uri()).await?;
        let the_outcome = session
            .bulk_index(
                "prometheus",
                "sample",
                &[the_up_document("a", 1.0)],
                Instant::now() + Duration::from_millis(100),
            )
            .await;

        assert_eq!(the_outcome, Err(SubmissionCause::DeadlineExceeded));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_cluster_is_not_home() {
        // -- port 1 is tcpmux. nobody runs tcpmux. nobody has run tcpmux since 1988.
        let the_outcome = ElasticsearchBackend::new(Duration::from_secs(1), Duration::from_secs(1))
            .open("http://127.0.0.1:1")
            .await;

        assert!(the_outcome.is_err(), "an unreachable cluster must not yield a session");
    }

    #[tokio::test]
    async fn the_one_where_the_door_opens_but_the_answer_is_401() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let the_outcome = ElasticsearchBackend::default().open(&server.uri()).await;

        let the_error = the_outcome.err().context("💀 a 401 should not open a session")?;
        assert!(format!("{the_error:#}").contains("401"));
        Ok(())
    }
}

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    AroundPage, AroundRequest, ArchiveBackend, JobStream, ListMessagesRequest, MessagePage,
    SearchRequest, SearchResponse, SearchStatus, SenderFacetRequest, SenderFacets,
};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::models::{
    Anchor, AnchorKind, BuildStatus, ConversationKey, DailyCounts, ExportJob, ExportParams,
    MessageId, SearchFilters, SearchHit, SearchIndexState, SearchScope, SenderOption,
};
use crate::streaming::{SseDecoder, SseEvent};

/// JSON/HTTP client for the decryption backend.
pub struct HttpBackend {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

type Query = Vec<(&'static str, String)>;

impl HttpBackend {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &Query) -> Result<T> {
        let request = self.client.get(self.url(path)).query(query);
        self.send_json(request).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.client.post(self.url(path)).json(body);
        self.send_json(request).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.timeout(self.timeout).send().await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(CoreError::Backend {
        status: status.as_u16(),
        message: error_text,
    })
}

fn key_query(key: &ConversationKey) -> Query {
    vec![
        ("account", key.account.clone()),
        ("conversationId", key.conversation_id.clone()),
    ]
}

fn scope_query(query: &mut Query, scope: &SearchScope, filters: &SearchFilters) {
    match scope {
        SearchScope::All => query.push(("scope", "all".to_string())),
        SearchScope::Conversation { conversation_id } => {
            query.push(("scope", "conversation".to_string()));
            query.push(("conversationId", conversation_id.clone()));
        }
    }
    if let Some(sender) = &filters.sender_id {
        query.push(("senderId", sender.clone()));
    }
    if let Some(start) = filters.start_time {
        query.push(("startTime", start.to_string()));
    }
    if let Some(end) = filters.end_time {
        query.push(("endTime", end.to_string()));
    }
    if let Some(kind) = &filters.render_kind {
        query.push(("renderKind", kind.clone()));
    }
}

// ===== Wire shapes =====

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnchorWire {
    anchor_id: Option<MessageId>,
    create_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BuildWire {
    status: Option<String>,
    indexed_messages: u64,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IndexStatusWire {
    exists: bool,
    ready: bool,
    build: BuildWire,
}

impl From<IndexStatusWire> for SearchIndexState {
    fn from(wire: IndexStatusWire) -> Self {
        let build_status = match wire.build.status.as_deref() {
            Some("building") | Some("running") => BuildStatus::Building,
            Some("error") | Some("failed") => BuildStatus::Error,
            _ => BuildStatus::Idle,
        };
        SearchIndexState {
            exists: wire.exists,
            ready: wire.ready,
            build_status,
            indexed_count: wire.build.indexed_messages,
            error: wire.build.error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildResponseWire {
    index: IndexStatusWire,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchWire {
    status: SearchStatus,
    hits: Vec<SearchHit>,
    has_more: bool,
    total: u64,
    index: Option<IndexStatusWire>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendersWire {
    status: SearchStatus,
    senders: Vec<SenderOption>,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    job: ExportJob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequestWire<'a> {
    account: &'a str,
    rebuild: bool,
}

/// Progress events carry either `{ "job": {...} }` or the bare job.
fn decode_job_event(event: &SseEvent) -> Result<ExportJob> {
    if let Ok(envelope) = serde_json::from_str::<JobEnvelope>(&event.data) {
        return Ok(envelope.job);
    }
    Ok(serde_json::from_str::<ExportJob>(&event.data)?)
}

fn is_job_event(event: &SseEvent) -> bool {
    matches!(event.event.as_deref(), None | Some("progress") | Some("job") | Some("message"))
}

#[async_trait]
impl ArchiveBackend for HttpBackend {
    async fn list_messages(&self, request: ListMessagesRequest) -> Result<MessagePage> {
        let mut query = key_query(&request.key);
        query.push(("limit", request.limit.to_string()));
        query.push(("offset", request.offset.to_string()));
        query.push(("order", request.order.as_str().to_string()));
        if let Some(kind) = request.render_filter {
            query.push(("renderType", kind.as_str().to_string()));
        }
        self.get_json("/api/messages", &query).await
    }

    async fn messages_around(&self, request: AroundRequest) -> Result<AroundPage> {
        let mut query = key_query(&request.key);
        query.push(("anchorId", request.anchor_id.to_string()));
        query.push(("before", request.before.to_string()));
        query.push(("after", request.after.to_string()));
        self.get_json("/api/messages/around", &query).await
    }

    async fn anchor_for(
        &self,
        key: &ConversationKey,
        kind: AnchorKind,
        date: Option<NaiveDate>,
    ) -> Result<Option<Anchor>> {
        let mut query = key_query(key);
        query.push(("kind", kind.as_str().to_string()));
        if let Some(date) = date {
            query.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        let wire: AnchorWire = self.get_json("/api/messages/anchor", &query).await?;
        Ok(wire.anchor_id.map(|anchor_id| Anchor {
            anchor_id,
            create_time: wire.create_time.unwrap_or(0),
        }))
    }

    async fn daily_counts(
        &self,
        key: &ConversationKey,
        year: i32,
        month: u32,
    ) -> Result<DailyCounts> {
        let mut query = key_query(key);
        query.push(("year", year.to_string()));
        query.push(("month", month.to_string()));
        self.get_json("/api/messages/daily-counts", &query).await
    }

    async fn search_messages(&self, request: SearchRequest) -> Result<SearchResponse> {
        let mut query: Query = vec![
            ("account", request.account.clone()),
            ("q", request.query.clone()),
            ("limit", request.limit.to_string()),
            ("offset", request.offset.to_string()),
        ];
        scope_query(&mut query, &request.scope, &request.filters);
        let wire: SearchWire = self.get_json("/api/search", &query).await?;
        Ok(SearchResponse {
            status: wire.status,
            hits: wire.hits,
            has_more: wire.has_more,
            total: wire.total,
            index: wire.index.map(SearchIndexState::from),
            error: wire.error,
        })
    }

    async fn search_index_status(&self, account: &str) -> Result<SearchIndexState> {
        let query: Query = vec![("account", account.to_string())];
        let wire: IndexStatusWire = self.get_json("/api/search/index/status", &query).await?;
        Ok(wire.into())
    }

    async fn build_search_index(&self, account: &str, rebuild: bool) -> Result<SearchIndexState> {
        let body = BuildRequestWire { account, rebuild };
        let wire: BuildResponseWire = self.post_json("/api/search/index/build", &body).await?;
        Ok(wire.index.into())
    }

    async fn list_search_senders(&self, request: SenderFacetRequest) -> Result<SenderFacets> {
        let mut query: Query = vec![
            ("account", request.account.clone()),
            ("q", request.query.clone()),
        ];
        scope_query(&mut query, &request.scope, &request.filters);
        let wire: SendersWire = self.get_json("/api/search/senders", &query).await?;
        Ok(SenderFacets {
            status: wire.status,
            senders: wire.senders,
        })
    }

    async fn create_export_job(&self, params: &ExportParams) -> Result<ExportJob> {
        let envelope: JobEnvelope = self.post_json("/api/exports", params).await?;
        Ok(envelope.job)
    }

    async fn get_export_job(&self, export_id: &str) -> Result<ExportJob> {
        let envelope: JobEnvelope = self
            .get_json(&format!("/api/exports/{export_id}"), &Vec::new())
            .await?;
        Ok(envelope.job)
    }

    async fn cancel_export_job(&self, export_id: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/api/exports/{export_id}/cancel")))
            .timeout(self.timeout);
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn export_progress(&self, export_id: &str) -> Result<Option<JobStream>> {
        // No timeout: the channel stays open for the lifetime of the job
        let response = self
            .client
            .get(self.url(&format!("/api/exports/{export_id}/events")))
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            return Ok(None);
        }
        let response = check_status(response).await?;

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            (bytes, SseDecoder::new(), VecDeque::<SseEvent>::new()),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        if !is_job_event(&event) {
                            continue;
                        }
                        let item = decode_job_event(&event);
                        return Some((item, (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                        Some(Err(e)) => {
                            return Some((Err(CoreError::from(e)), (bytes, decoder, pending)))
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(Some(stream.boxed()))
    }
}

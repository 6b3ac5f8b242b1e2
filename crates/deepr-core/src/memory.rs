// In-memory implementations for examples and testing
//
// These keep all data in memory, making them suitable for unit tests,
// integration suites and local development without provider credentials.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use deepr_contracts::{CostBreakdown, ErrorKind, JobError, ProviderKind, TokenUsage};

use crate::docstore::{Document, DocumentStore, SearchHit};
use crate::error::{DeeprError, Result};
use crate::governor::{CostLedger, NewLedgerEntry};
use crate::provider::{Provider, RemotePoll, RemoteStatus, ResearchRequest, ResearchResult};

// ============================================================================
// FakeProvider - scriptable research provider
// ============================================================================

/// Scripted behaviour for one submission
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    /// Fail the submit call itself with this kind
    pub submit_error: Option<ErrorKind>,
    /// Statuses returned per poll, in order; the last repeats forever
    pub statuses: Vec<RemoteStatus>,
    pub result: ResearchResult,
}

impl ScriptedOutcome {
    /// Run for `polls` ticks, then complete with the given artifact
    pub fn completed_after(polls: usize, markdown: impl Into<String>, cost: f64) -> Self {
        let mut statuses: Vec<RemoteStatus> = (0..polls)
            .map(|i| RemoteStatus::Running {
                progress: Some((i + 1) as f64 / (polls + 1) as f64),
            })
            .collect();
        statuses.push(RemoteStatus::Completed);
        let markdown = markdown.into();
        let tokens = (markdown.len() / 4) as i64;
        Self {
            submit_error: None,
            statuses,
            result: ResearchResult {
                markdown,
                citations: Vec::new(),
                token_usage: TokenUsage {
                    input_tokens: tokens / 4,
                    output_tokens: tokens,
                    total_tokens: tokens + tokens / 4,
                },
                cost,
            },
        }
    }

    /// Fail the submit call with the given error kind
    pub fn submit_fails(kind: ErrorKind) -> Self {
        Self {
            submit_error: Some(kind),
            ..Self::completed_after(0, "", 0.0)
        }
    }

    /// Run once, then report the job failed remotely
    pub fn failing(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            submit_error: None,
            statuses: vec![
                RemoteStatus::Running {
                    progress: Some(0.2),
                },
                RemoteStatus::Failed {
                    error: JobError::new(kind, message),
                },
            ],
            ..Self::completed_after(0, "", 0.0)
        }
    }

    /// Provider forgets the job id on every poll
    pub fn lost() -> Self {
        Self {
            submit_error: None,
            statuses: vec![RemoteStatus::Unknown],
            ..Self::completed_after(0, "", 0.0)
        }
    }

    pub fn with_citations(mut self, citations: Vec<deepr_contracts::Citation>) -> Self {
        self.result.citations = citations;
        self
    }
}

struct ActiveFakeJob {
    outcome: ScriptedOutcome,
    polls_seen: usize,
    cancelled: bool,
}

struct FakeProviderInner {
    counter: u64,
    queued: VecDeque<ScriptedOutcome>,
    default_outcome: ScriptedOutcome,
    jobs: HashMap<String, ActiveFakeJob>,
    submit_count: u64,
    poll_count: u64,
    cancel_calls: Vec<String>,
}

/// Scriptable in-memory provider
///
/// Each submit consumes the next queued outcome, falling back to the
/// default (two running polls, then completed). Call counters are exposed
/// so tests can assert idempotence.
pub struct FakeProvider {
    kind: ProviderKind,
    inner: Arc<RwLock<FakeProviderInner>>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            inner: Arc::new(RwLock::new(FakeProviderInner {
                counter: 0,
                queued: VecDeque::new(),
                default_outcome: ScriptedOutcome::completed_after(
                    2,
                    "## Findings\n\nNothing of note.\n",
                    0.01,
                ),
                jobs: HashMap::new(),
                submit_count: 0,
                poll_count: 0,
                cancel_calls: Vec::new(),
            })),
        }
    }

    /// Queue a scripted outcome for the next submission
    pub async fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.inner.write().await.queued.push_back(outcome);
    }

    /// Replace the fallback outcome used when the queue is empty
    pub async fn set_default_outcome(&self, outcome: ScriptedOutcome) {
        self.inner.write().await.default_outcome = outcome;
    }

    pub async fn submit_count(&self) -> u64 {
        self.inner.read().await.submit_count
    }

    pub async fn poll_count(&self) -> u64 {
        self.inner.read().await.poll_count
    }

    pub async fn cancel_calls(&self) -> Vec<String> {
        self.inner.read().await.cancel_calls.clone()
    }
}

fn provider_error(kind: ErrorKind, context: &str) -> DeeprError {
    match kind {
        ErrorKind::RateLimited => DeeprError::RateLimited(context.to_string()),
        ErrorKind::Provider5xx => DeeprError::Provider5xx(context.to_string()),
        ErrorKind::Network => DeeprError::Network(context.to_string()),
        ErrorKind::Auth => DeeprError::Auth(context.to_string()),
        _ => DeeprError::InvalidRequest(context.to_string()),
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn submit(&self, request: &ResearchRequest) -> Result<String> {
        let mut inner = self.inner.write().await;
        inner.submit_count += 1;

        let outcome = match inner.queued.pop_front() {
            Some(outcome) => outcome,
            None => inner.default_outcome.clone(),
        };

        if let Some(kind) = outcome.submit_error {
            return Err(provider_error(kind, "scripted submit failure"));
        }

        inner.counter += 1;
        let provider_job_id = format!("fake-{}-{}", self.kind, inner.counter);
        inner.jobs.insert(
            provider_job_id.clone(),
            ActiveFakeJob {
                outcome,
                polls_seen: 0,
                cancelled: false,
            },
        );
        tracing::debug!(
            job_id = %request.job_id,
            provider_job_id = %provider_job_id,
            "Fake provider accepted submission"
        );
        Ok(provider_job_id)
    }

    async fn poll(&self, provider_job_ids: &[String]) -> Result<Vec<RemotePoll>> {
        let mut inner = self.inner.write().await;
        inner.poll_count += 1;

        let mut out = Vec::with_capacity(provider_job_ids.len());
        for id in provider_job_ids {
            let status = match inner.jobs.get_mut(id) {
                Some(job) if job.cancelled => RemoteStatus::Failed {
                    error: JobError::new(ErrorKind::InvalidRequest, "job was cancelled"),
                },
                Some(job) => {
                    let index = job.polls_seen.min(job.outcome.statuses.len() - 1);
                    job.polls_seen += 1;
                    job.outcome.statuses[index].clone()
                }
                None => RemoteStatus::Unknown,
            };
            out.push(RemotePoll {
                provider_job_id: id.clone(),
                status,
            });
        }
        Ok(out)
    }

    async fn fetch_result(&self, provider_job_id: &str) -> Result<ResearchResult> {
        let inner = self.inner.read().await;
        inner
            .jobs
            .get(provider_job_id)
            .map(|job| job.outcome.result.clone())
            .ok_or_else(|| DeeprError::ProviderLostJob(provider_job_id.to_string()))
    }

    async fn cancel(&self, provider_job_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.cancel_calls.push(provider_job_id.to_string());
        if let Some(job) = inner.jobs.get_mut(provider_job_id) {
            job.cancelled = true;
        }
        Ok(())
    }
}

// ============================================================================
// FakeDocumentStore - naive keyword retrieval
// ============================================================================

struct StoredDoc {
    doc_ref: String,
    text: String,
}

/// In-memory document store with keyword-overlap scoring
#[derive(Default)]
pub struct FakeDocumentStore {
    stores: Arc<RwLock<HashMap<String, Vec<StoredDoc>>>>,
    counter: AtomicU64,
}

impl FakeDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn create_store(&self, name: &str) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let store_ref = format!("store-{}-{}", n, name);
        self.stores
            .write()
            .await
            .insert(store_ref.clone(), Vec::new());
        Ok(store_ref)
    }

    async fn add(&self, store_ref: &str, documents: Vec<Document>) -> Result<Vec<String>> {
        let mut stores = self.stores.write().await;
        let docs = stores
            .get_mut(store_ref)
            .ok_or_else(|| DeeprError::invalid_request(format!("no such store: {}", store_ref)))?;

        let mut refs = Vec::with_capacity(documents.len());
        for document in documents {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let doc_ref = format!("doc-{}", n);
            docs.push(StoredDoc {
                doc_ref: doc_ref.clone(),
                text: String::from_utf8_lossy(&document.bytes).into_owned(),
            });
            refs.push(doc_ref);
        }
        Ok(refs)
    }

    async fn search(&self, store_ref: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let stores = self.stores.read().await;
        let docs = stores
            .get(store_ref)
            .ok_or_else(|| DeeprError::invalid_request(format!("no such store: {}", store_ref)))?;

        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter_map(|doc| {
                let haystack = doc.text.to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                if matched == 0 {
                    return None;
                }
                Some(SearchHit {
                    doc_ref: doc.doc_ref.clone(),
                    score: matched as f64 / terms.len() as f64,
                    excerpt: doc.text.chars().take(200).collect(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, store_ref: &str) -> Result<()> {
        self.stores.write().await.remove(store_ref);
        Ok(())
    }
}

// ============================================================================
// InMemoryCostLedger - ledger port without a database
// ============================================================================

/// In-memory cost ledger, idempotent by `(job_id, amount)`
#[derive(Default)]
pub struct InMemoryCostLedger {
    entries: RwLock<Vec<NewLedgerEntry>>,
    seen: RwLock<HashSet<(Uuid, u64)>>,
}

impl InMemoryCostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CostLedger for InMemoryCostLedger {
    async fn append(&self, entry: NewLedgerEntry) -> anyhow::Result<bool> {
        let key = (entry.job_id, entry.amount.to_bits());
        let mut seen = self.seen.write().await;
        if !seen.insert(key) {
            return Ok(false);
        }
        self.entries.write().await.push(entry);
        Ok(true)
    }

    async fn total_since(&self, since: DateTime<Utc>) -> anyhow::Result<f64> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.recorded_at >= since)
            .map(|e| e.amount)
            .sum())
    }

    async fn total_all(&self) -> anyhow::Result<f64> {
        Ok(self.entries.read().await.iter().map(|e| e.amount).sum())
    }

    async fn breakdown_since(
        &self,
        since: Option<DateTime<Utc>>,
        top_n: usize,
    ) -> anyhow::Result<(Vec<CostBreakdown>, Vec<CostBreakdown>)> {
        let entries = self.entries.read().await;
        let mut by_model: HashMap<String, (f64, i64)> = HashMap::new();
        let mut by_provider: HashMap<String, (f64, i64)> = HashMap::new();

        for entry in entries
            .iter()
            .filter(|e| since.map(|s| e.recorded_at >= s).unwrap_or(true))
        {
            let model = by_model.entry(entry.model.clone()).or_default();
            model.0 += entry.amount;
            model.1 += 1;
            let provider = by_provider.entry(entry.provider.clone()).or_default();
            provider.0 += entry.amount;
            provider.1 += 1;
        }

        let collect = |map: HashMap<String, (f64, i64)>| {
            let mut rows: Vec<CostBreakdown> = map
                .into_iter()
                .map(|(key, (total, entries))| CostBreakdown {
                    key,
                    total,
                    entries,
                })
                .collect();
            rows.sort_by(|a, b| b.total.total_cmp(&a.total));
            rows.truncate(top_n);
            rows
        };

        Ok((collect(by_model), collect(by_provider)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> ResearchRequest {
        ResearchRequest {
            job_id: Uuid::now_v7(),
            prompt: prompt.to_string(),
            model: "small".to_string(),
            tools: Vec::new(),
            vector_store_ref: None,
        }
    }

    #[tokio::test]
    async fn fake_provider_follows_script() {
        let provider = FakeProvider::new(ProviderKind::OpenAi);
        provider
            .push_outcome(ScriptedOutcome::completed_after(2, "# Done", 0.04))
            .await;

        let id = provider.submit(&request("hello")).await.unwrap();

        for _ in 0..2 {
            let polls = provider.poll(std::slice::from_ref(&id)).await.unwrap();
            assert!(matches!(polls[0].status, RemoteStatus::Running { .. }));
        }
        let polls = provider.poll(std::slice::from_ref(&id)).await.unwrap();
        assert_eq!(polls[0].status, RemoteStatus::Completed);

        let result = provider.fetch_result(&id).await.unwrap();
        assert_eq!(result.markdown, "# Done");
        assert!((result.cost - 0.04).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn scripted_submit_failure_consumes_one_outcome() {
        let provider = FakeProvider::new(ProviderKind::OpenAi);
        provider
            .push_outcome(ScriptedOutcome::submit_fails(ErrorKind::RateLimited))
            .await;

        let err = provider.submit(&request("a")).await.unwrap_err();
        assert!(matches!(err, DeeprError::RateLimited(_)));

        // Next submit falls back to the default outcome
        assert!(provider.submit(&request("a")).await.is_ok());
        assert_eq!(provider.submit_count().await, 2);
    }

    #[tokio::test]
    async fn unknown_ids_poll_as_unknown() {
        let provider = FakeProvider::new(ProviderKind::OpenAi);
        let polls = provider.poll(&["never-submitted".to_string()]).await.unwrap();
        assert_eq!(polls[0].status, RemoteStatus::Unknown);
    }

    #[tokio::test]
    async fn fake_doc_store_ranks_by_term_overlap() {
        let store = FakeDocumentStore::new();
        let store_ref = store.create_store("tls").await.unwrap();
        store
            .add(
                &store_ref,
                vec![
                    Document::text("a", "the TLS handshake uses X25519"),
                    Document::text("b", "cooking with cast iron"),
                    Document::text("c", "TLS record layer and handshake framing"),
                ],
            )
            .await
            .unwrap();

        let hits = store.search(&store_ref, "tls handshake", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| h.doc_ref != "doc-2"));
    }

    #[tokio::test]
    async fn ledger_rejects_duplicate_job_amount_pairs() {
        let ledger = InMemoryCostLedger::new();
        let job_id = Uuid::now_v7();
        let entry = NewLedgerEntry {
            job_id,
            amount: 0.04,
            provider: "openai".into(),
            model: "small".into(),
            recorded_at: Utc::now(),
        };
        assert!(ledger.append(entry.clone()).await.unwrap());
        assert!(!ledger.append(entry).await.unwrap());
        assert_eq!(ledger.entries().await, 1);
    }
}

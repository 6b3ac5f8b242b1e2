// Expert store
//
// Owns experts, their append-only beliefs and their gaps. Synthesis and
// grounded answering are jobs on a lightweight model; this module is the
// only writer of beliefs.
//
// Synthesis output grammar (one belief per list line, gaps on their own
// lines):
//
//   - [0.85] QUIC carries the TLS 1.3 handshake in CRYPTO frames
//   - [0.90] The record layer is replaced by QUIC packets [supersedes: 2]
//   GAP: QUIC connection migration (priority 4)

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use deepr_contracts::{Belief, Citation, DeeprEvent, Expert, ExpertAnswer, Gap, JobStatus};
use deepr_core::clock::{new_id, Clock};
use deepr_core::docstore::{Document, DocumentStore};
use deepr_core::error::{DeeprError, Result};
use deepr_core::EventBus;
use deepr_storage::{ArtifactStore, CreateBelief, Database, ExpertRow, JobRow};

use crate::queue::{EnqueueOutcome, JobQueue, JobSpec};
use crate::wait::await_job_terminal;

/// Default priority for gaps flagged by the answering model
const FLAGGED_GAP_PRIORITY: i32 = 3;

/// How long synthesis and answer jobs may run before the store gives up
const EXPERT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Beliefs considered when answering a question
const ANSWER_BELIEF_LIMIT: usize = 5;

/// Parsed belief line from a synthesis result
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefDraft {
    pub statement: String,
    pub confidence: f64,
    /// 1-based position in the prompt's numbered list of current beliefs
    pub supersedes: Option<usize>,
}

pub struct ExpertStore {
    db: Database,
    docstore: Arc<dyn DocumentStore>,
    queue: Arc<JobQueue>,
    artifacts: ArtifactStore,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl ExpertStore {
    pub fn new(
        db: Database,
        docstore: Arc<dyn DocumentStore>,
        queue: Arc<JobQueue>,
        artifacts: ArtifactStore,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            docstore,
            queue,
            artifacts,
            bus,
            clock,
        }
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Create an expert and its document store; no beliefs yet
    pub async fn create(
        self: &Arc<Self>,
        name: &str,
        domain_description: &str,
        initial_documents: Vec<Document>,
    ) -> Result<Expert> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DeeprError::invalid_request("expert name is empty"));
        }
        if self.db.get_expert_by_name(name).await?.is_some() {
            return Err(DeeprError::invalid_request(format!(
                "expert {} already exists",
                name
            )));
        }

        let store_ref = self
            .docstore
            .create_store(&format!("expert-{}", name))
            .await?;
        let row = self
            .db
            .create_expert(
                new_id(),
                name,
                domain_description,
                Some(&store_ref),
                self.clock.now(),
            )
            .await?;
        info!(expert = %name, store_ref = %store_ref, "Expert created");

        if !initial_documents.is_empty() {
            self.upload(name, initial_documents).await?;
        }

        self.get(name).await
    }

    pub async fn get(&self, name: &str) -> Result<Expert> {
        Ok(self.require(name).await?.into_dto())
    }

    pub async fn list(&self) -> Result<Vec<Expert>> {
        Ok(self
            .db
            .list_experts()
            .await?
            .into_iter()
            .map(ExpertRow::into_dto)
            .collect())
    }

    pub async fn beliefs(&self, name: &str) -> Result<Vec<Belief>> {
        let expert = self.require(name).await?;
        Ok(self
            .db
            .list_beliefs(expert.id)
            .await?
            .into_iter()
            .map(|row| row.into_dto())
            .collect())
    }

    pub async fn gaps(&self, name: &str) -> Result<Vec<Gap>> {
        let expert = self.require(name).await?;
        Ok(self
            .db
            .list_gaps(expert.id, false)
            .await?
            .into_iter()
            .map(|row| row.into_dto())
            .collect())
    }

    // ============================================
    // Documents and synthesis
    // ============================================

    /// Add documents to the expert's corpus and schedule synthesis
    pub async fn upload(self: &Arc<Self>, name: &str, documents: Vec<Document>) -> Result<()> {
        let expert = self.require(name).await?;
        let store_ref = expert
            .document_store_ref
            .clone()
            .ok_or_else(|| DeeprError::invalid_request("expert has no document store"))?;

        let refs = self.docstore.add(&store_ref, documents).await?;
        info!(expert = %name, documents = refs.len(), "Documents uploaded");

        self.synthesise(name).await?;
        Ok(())
    }

    /// Produce or update beliefs from the current corpus
    ///
    /// Returns the synthesis job id; belief integration happens in the
    /// background when the job completes.
    pub async fn synthesise(self: &Arc<Self>, name: &str) -> Result<Uuid> {
        let expert = self.require(name).await?;
        let prompt = self.synthesis_prompt(&expert).await?;

        let outcome = self
            .queue
            .enqueue(JobSpec {
                prompt,
                model: Some("small".to_string()),
                priority: Some(4),
                ..JobSpec::default()
            })
            .await?;

        let job = match outcome {
            EnqueueOutcome::Accepted(job) => job,
            EnqueueOutcome::Elicitation { .. } => {
                return Err(DeeprError::BudgetExceeded(
                    "no budget headroom for synthesis".into(),
                ))
            }
            EnqueueOutcome::Rejected(job) => {
                return Err(DeeprError::BudgetExceeded(format!(
                    "synthesis job {} rejected at admission",
                    job.id
                )))
            }
        };

        // Fold beliefs in once the job lands
        let store = self.clone();
        let expert_name = expert.name.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            match await_job_terminal(&store.db, &store.bus, job_id, EXPERT_JOB_TIMEOUT).await {
                Ok(row) if row.status() == JobStatus::Completed => {
                    if let Err(err) = store.integrate_result(&expert_name, &row).await {
                        warn!(expert = %expert_name, error = %err, "Synthesis integration failed");
                    }
                }
                Ok(row) => {
                    warn!(expert = %expert_name, job_id = %row.id, status = %row.status(), "Synthesis job did not complete");
                }
                Err(err) => {
                    warn!(expert = %expert_name, error = %err, "Synthesis wait failed");
                }
            }
        });

        Ok(job_id)
    }

    async fn synthesis_prompt(&self, expert: &ExpertRow) -> Result<String> {
        let mut prompt = format!(
            "You maintain the knowledge base of the expert \"{}\" ({}).\n\
             Read the corpus excerpts below and state what you now believe.\n\
             Answer with a markdown list, one belief per line, formatted as\n\
             `- [confidence] statement`. When a belief contradicts a numbered\n\
             existing belief, append `[supersedes: N]`. Flag missing knowledge\n\
             as lines `GAP: topic (priority 1-5)`.\n",
            expert.name, expert.domain_description
        );

        let heads = self.head_beliefs(expert.id).await?;
        if !heads.is_empty() {
            prompt.push_str("\nExisting beliefs:\n");
            for (index, belief) in heads.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", index + 1, belief.statement));
            }
        }

        if let Some(store_ref) = &expert.document_store_ref {
            let hits = self
                .docstore
                .search(store_ref, &expert.domain_description, 8)
                .await?;
            if !hits.is_empty() {
                prompt.push_str("\nCorpus excerpts:\n");
                for hit in hits {
                    prompt.push_str(&format!("- {}\n", hit.excerpt));
                }
            }
        }

        Ok(prompt)
    }

    /// Fold a completed research or synthesis result into beliefs and gaps
    ///
    /// The only write path for beliefs. Returns the new belief ids.
    pub async fn integrate_result(&self, name: &str, job: &JobRow) -> Result<Vec<Uuid>> {
        let expert = self.require(name).await?;
        let Some(result_ref) = &job.result_ref else {
            return Err(DeeprError::invalid_request(format!(
                "job {} has no result to integrate",
                job.id
            )));
        };

        let markdown =
            String::from_utf8_lossy(&self.artifacts.load(result_ref).await?).into_owned();
        let citations = match self.db.get_artifact(result_ref).await? {
            Some(artifact) => artifact.citation_list(),
            None => Vec::new(),
        };

        let drafts = parse_beliefs(&markdown);
        let heads = self.head_beliefs(expert.id).await?;
        let now = self.clock.now();

        let mut created = Vec::new();
        for draft in drafts {
            let belief = self
                .db
                .create_belief(CreateBelief {
                    id: new_id(),
                    expert_id: expert.id,
                    statement: draft.statement,
                    confidence: draft.confidence.clamp(0.0, 1.0),
                    sources: citations.clone(),
                    created_at: now,
                })
                .await?;

            if let Some(position) = draft.supersedes {
                match heads.get(position - 1) {
                    Some(old) => {
                        self.db.supersede_belief(old.id, belief.id).await?;
                    }
                    None => {
                        warn!(expert = %name, position, "Supersession target out of range");
                    }
                }
            }

            self.bus.publish(DeeprEvent::BeliefAdded {
                expert_name: expert.name.clone(),
                belief_id: belief.id,
            });
            created.push(belief.id);
        }

        for (topic, priority) in parse_gaps(&markdown) {
            self.record_gap(name, &topic, priority).await?;
        }

        self.db.touch_expert_synthesised(expert.id, now).await?;
        info!(expert = %name, beliefs = created.len(), "Result integrated");
        Ok(created)
    }

    // ============================================
    // Query
    // ============================================

    /// Grounded answer from current beliefs via a lightweight provider call
    pub async fn query(&self, name: &str, question: &str) -> Result<ExpertAnswer> {
        let expert = self.require(name).await?;
        let heads = self.head_beliefs(expert.id).await?;

        let mut relevant: Vec<(&HeadBelief, f64)> = heads
            .iter()
            .filter_map(|belief| {
                let score = term_overlap(question, &belief.statement);
                (score > 0.0).then_some((belief, score))
            })
            .collect();
        relevant.sort_by(|a, b| b.1.total_cmp(&a.1));
        relevant.truncate(ANSWER_BELIEF_LIMIT);

        let confidence = relevant
            .iter()
            .map(|(belief, _)| belief.confidence)
            .fold(f64::INFINITY, f64::min);
        let confidence = if confidence.is_finite() { confidence } else { 0.0 };

        let mut citations: Vec<Citation> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (belief, _) in &relevant {
            for citation in &belief.sources {
                if seen.insert(citation.url.clone()) {
                    citations.push(citation.clone());
                }
            }
        }

        let mut prompt = format!(
            "You are the expert \"{}\" on {}.\nAnswer the question strictly \
             from the beliefs below. If they are insufficient, say so and \
             flag what is missing as lines `GAP: topic`.\n\nBeliefs:\n",
            expert.name, expert.domain_description
        );
        for (index, (belief, _)) in relevant.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. (confidence {:.2}) {}\n",
                index + 1,
                belief.confidence,
                belief.statement
            ));
        }
        prompt.push_str(&format!("\nQuestion: {}\n", question));

        let outcome = self
            .queue
            .enqueue(JobSpec {
                prompt,
                model: Some("small".to_string()),
                priority: Some(5),
                ..JobSpec::default()
            })
            .await?;
        let job = match outcome {
            EnqueueOutcome::Accepted(job) => job,
            EnqueueOutcome::Elicitation { .. } => {
                return Err(DeeprError::BudgetExceeded(
                    "no budget headroom for answering".into(),
                ))
            }
            EnqueueOutcome::Rejected(_) => {
                return Err(DeeprError::BudgetExceeded("answer job rejected".into()))
            }
        };

        let row = await_job_terminal(&self.db, &self.bus, job.id, EXPERT_JOB_TIMEOUT).await?;
        if row.status() != JobStatus::Completed {
            let message = row
                .job_error()
                .map(|e| e.message)
                .unwrap_or_else(|| row.status().to_string());
            return Err(DeeprError::invalid_request(format!(
                "answer job failed: {}",
                message
            )));
        }

        let answer = match &row.result_ref {
            Some(result_ref) => {
                String::from_utf8_lossy(&self.artifacts.load(result_ref).await?).into_owned()
            }
            None => String::new(),
        };

        let identified_gaps: Vec<String> = parse_gaps(&answer)
            .into_iter()
            .map(|(topic, _)| topic)
            .collect();
        for topic in &identified_gaps {
            self.record_gap(name, topic, FLAGGED_GAP_PRIORITY).await?;
        }

        Ok(ExpertAnswer {
            answer,
            confidence,
            citations,
            identified_gaps,
        })
    }

    // ============================================
    // Gaps
    // ============================================

    /// Record a known-unknown; idempotent by `(expert, topic)`
    pub async fn record_gap(&self, name: &str, topic: &str, priority: i32) -> Result<Gap> {
        let expert = self.require(name).await?;
        let (row, created) = self
            .db
            .record_gap(
                new_id(),
                expert.id,
                topic.trim(),
                priority.clamp(1, 5),
                self.clock.now(),
            )
            .await?;

        if created {
            info!(expert = %name, topic = %topic, "Gap recorded");
            self.bus.publish(DeeprEvent::GapRecorded {
                expert_name: expert.name.clone(),
                gap_id: row.id,
                topic: row.topic.clone(),
            });
        }
        Ok(row.into_dto())
    }

    /// Close a gap against the job whose result filled it
    pub async fn close_gap(&self, name: &str, gap_id: Uuid, job_id: Uuid) -> Result<()> {
        let expert = self.require(name).await?;
        self.db.fill_gap(gap_id, job_id).await?;
        self.bus.publish(DeeprEvent::GapFilled {
            expert_name: expert.name,
            gap_id,
            job_id,
        });
        Ok(())
    }

    pub async fn add_spend(&self, name: &str, delta: f64) -> Result<()> {
        let expert = self.require(name).await?;
        self.db.add_expert_spend(expert.id, delta).await?;
        Ok(())
    }

    // ============================================
    // Internals
    // ============================================

    async fn require(&self, name: &str) -> Result<ExpertRow> {
        self.db
            .get_expert_by_name(name)
            .await?
            .ok_or_else(|| DeeprError::ExpertNotFound(name.to_string()))
    }

    /// Non-superseded beliefs in creation order
    async fn head_beliefs(&self, expert_id: Uuid) -> Result<Vec<HeadBelief>> {
        Ok(self
            .db
            .list_beliefs(expert_id)
            .await?
            .into_iter()
            .filter(|row| row.superseded_by.is_none())
            .map(|row| HeadBelief {
                id: row.id,
                confidence: row.confidence,
                sources: row.citations(),
                statement: row.statement,
            })
            .collect())
    }
}

struct HeadBelief {
    id: Uuid,
    statement: String,
    confidence: f64,
    sources: Vec<Citation>,
}

/// Share of `question` terms present in `statement`
fn term_overlap(question: &str, statement: &str) -> f64 {
    let haystack = statement.to_lowercase();
    let terms: Vec<String> = question
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| t.len() > 2)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
    matched as f64 / terms.len() as f64
}

/// Parse `- [0.85] statement [supersedes: N]` lines
pub fn parse_beliefs(markdown: &str) -> Vec<BeliefDraft> {
    let mut drafts = Vec::new();

    for line in markdown.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) else {
            continue;
        };
        let rest = rest.trim();

        let (confidence, statement) = match rest.strip_prefix('[') {
            Some(after) => match after.split_once(']') {
                Some((value, tail)) => match value.trim().parse::<f64>() {
                    Ok(parsed) => (parsed, tail.trim()),
                    Err(_) => continue,
                },
                None => continue,
            },
            // Plain bullet without an explicit confidence
            None => (0.6, rest),
        };

        let (statement, supersedes) = match statement.rfind("[supersedes:") {
            Some(open) => {
                let tail = &statement[open + "[supersedes:".len()..];
                let position = tail
                    .split(']')
                    .next()
                    .and_then(|inner| inner.trim().parse::<usize>().ok())
                    .filter(|p| *p > 0);
                (statement[..open].trim(), position)
            }
            None => (statement, None),
        };

        if statement.is_empty() || statement.to_lowercase().starts_with("gap:") {
            continue;
        }
        drafts.push(BeliefDraft {
            statement: statement.to_string(),
            confidence,
            supersedes,
        });
    }

    drafts
}

/// Parse `GAP: topic (priority N)` lines
pub fn parse_gaps(markdown: &str) -> Vec<(String, i32)> {
    let mut gaps = Vec::new();

    for line in markdown.lines() {
        let line = line.trim().trim_start_matches("- ").trim();
        let lower = line.to_lowercase();
        let Some(rest) = lower
            .starts_with("gap:")
            .then(|| line["gap:".len()..].trim())
        else {
            continue;
        };

        let (topic, priority) = match rest.rfind("(priority") {
            Some(open) => {
                let priority = rest[open + "(priority".len()..]
                    .split(')')
                    .next()
                    .and_then(|inner| inner.trim().parse::<i32>().ok())
                    .unwrap_or(FLAGGED_GAP_PRIORITY);
                (rest[..open].trim(), priority)
            }
            None => (rest, FLAGGED_GAP_PRIORITY),
        };

        if !topic.is_empty() {
            gaps.push((topic.to_string(), priority.clamp(1, 5)));
        }
    }

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_beliefs_with_confidence_and_supersession() {
        let markdown = "Preamble\n\
                        - [0.85] QUIC carries TLS 1.3 in CRYPTO frames\n\
                        - [0.9] The record layer is replaced [supersedes: 1]\n\
                        - plain statement without confidence\n\
                        GAP: connection migration (priority 4)\n";
        let drafts = parse_beliefs(markdown);
        assert_eq!(drafts.len(), 3);
        assert!((drafts[0].confidence - 0.85).abs() < f64::EPSILON);
        assert_eq!(drafts[1].supersedes, Some(1));
        assert!((drafts[2].confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_gaps_with_and_without_priority() {
        let markdown = "GAP: QUIC handshake (priority 5)\n- GAP: 0-RTT replay\nnot a gap\n";
        let gaps = parse_gaps(markdown);
        assert_eq!(
            gaps,
            vec![
                ("QUIC handshake".to_string(), 5),
                ("0-RTT replay".to_string(), FLAGGED_GAP_PRIORITY),
            ]
        );
    }

    #[test]
    fn term_overlap_ignores_short_words() {
        let score = term_overlap("what is the QUIC handshake", "the QUIC handshake uses TLS");
        assert!(score > 0.5);
        assert_eq!(term_overlap("a an of", "anything"), 0.0);
    }
}

// End-to-end engine scenarios against the in-memory provider fakes

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use deepr_contracts::{
    CampaignStatus, Citation, ElicitOption, ErrorKind, JobStatus, ProviderKind, SpendPeriod,
    TopicState,
};
use deepr_core::governor::CostLedger;
use deepr_core::memory::{FakeDocumentStore, FakeProvider, ScriptedOutcome};
use deepr_core::provider::ProviderRegistry;
use deepr_core::{DeeprConfig, SystemClock, TruncationSummarizer};
use deepr_engine::campaign::CampaignSpec;
use deepr_engine::wait::{await_campaign_terminal, await_job_terminal};
use deepr_engine::{Deepr, EnqueueOutcome, JobSpec, PlannedTopic};
use deepr_storage::{ArtifactStore, Database};

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    engine: Arc<Deepr>,
    provider: Arc<FakeProvider>,
    _blobs: TempDir,
}

fn fast_config() -> DeeprConfig {
    DeeprConfig {
        poll_interval: Duration::from_millis(25),
        campaign_step_interval: Duration::from_millis(25),
        retry_base: Duration::from_millis(100),
        ..DeeprConfig::default()
    }
}

async fn engine_on(
    config: DeeprConfig,
    db: Database,
    provider: Arc<FakeProvider>,
    blob_root: &std::path::Path,
) -> Arc<Deepr> {
    let mut providers = ProviderRegistry::new();
    providers.register(provider);
    Deepr::init(
        config,
        db,
        ArtifactStore::new(blob_root),
        providers,
        Arc::new(FakeDocumentStore::new()),
        Arc::new(TruncationSummarizer::new()),
        Arc::new(SystemClock),
    )
    .await
    .expect("engine init")
}

async fn harness_with(config: DeeprConfig) -> Harness {
    let db = Database::in_memory().await.expect("in-memory db");
    let provider = Arc::new(FakeProvider::new(ProviderKind::OpenAi));
    let blobs = tempfile::tempdir().expect("blob dir");
    let engine = engine_on(config, db, provider.clone(), blobs.path()).await;
    Harness {
        engine,
        provider,
        _blobs: blobs,
    }
}

#[tokio::test]
async fn happy_path_single_job() {
    let h = harness_with(fast_config()).await;
    h.provider
        .push_outcome(ScriptedOutcome::completed_after(
            2,
            "# TLS 1.3 record layer\n\nFragmentation, padding, AEAD.\n",
            0.04,
        ))
        .await;

    let outcome = h
        .engine
        .create_job(JobSpec {
            prompt: "Summarise TLS 1.3 record layer".into(),
            model: Some("small".into()),
            budget_cap: Some(0.10),
            ..JobSpec::default()
        })
        .await
        .unwrap();
    let EnqueueOutcome::Accepted(job) = outcome else {
        panic!("expected acceptance, got {:?}", outcome);
    };

    let row = await_job_terminal(&h.engine.db, &h.engine.bus, job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(row.status(), JobStatus::Completed);
    assert!((row.actual_cost - 0.04).abs() < 1e-9);

    let (markdown, _citations) = h.engine.job_result(job.id).await.unwrap();
    assert!(markdown.contains("TLS 1.3 record layer"));

    let summary = h.engine.costs(SpendPeriod::Today).await.unwrap();
    assert!((summary.total - 0.04).abs() < 1e-9);

    h.engine.shutdown();
}

#[tokio::test]
async fn budget_overrun_elicits_and_creates_no_job() {
    let mut config = fast_config();
    config.daily_budget = Some(1.0);
    let h = harness_with(config).await;

    h.engine
        .governor
        .record_spend(Uuid::now_v7(), 0.95, "openai", "small")
        .await
        .unwrap();

    let outcome = h
        .engine
        .create_job(JobSpec {
            prompt: "Deep dive into post-quantum TLS deployments".into(),
            model: Some("deep".into()),
            ..JobSpec::default()
        })
        .await
        .unwrap();

    match outcome {
        EnqueueOutcome::Elicitation { options, .. } => {
            assert_eq!(options, ElicitOption::all().to_vec());
        }
        other => panic!("expected elicitation, got {:?}", other),
    }

    let jobs = h.engine.list_jobs(None, false, 100, 0).await.unwrap();
    assert!(jobs.is_empty(), "no job row may be created on elicitation");

    h.engine.shutdown();
}

#[tokio::test]
async fn campaign_runs_dependencies_and_retries_rate_limit() {
    let h = harness_with(fast_config()).await;
    // First submission (topic A) is rate-limited once, then everything
    // succeeds with the default outcome
    h.provider
        .push_outcome(ScriptedOutcome::submit_fails(ErrorKind::RateLimited))
        .await;

    let campaign = h
        .engine
        .create_campaign(CampaignSpec {
            goal: "map the TLS 1.3 record layer".into(),
            topics: Some(vec![
                PlannedTopic {
                    prompt: "Topic A".into(),
                    depends_on: vec![],
                },
                PlannedTopic {
                    prompt: "Topic B".into(),
                    depends_on: vec![],
                },
                PlannedTopic {
                    prompt: "Topic C".into(),
                    depends_on: vec![0, 1],
                },
            ]),
            ..CampaignSpec::default()
        })
        .await
        .unwrap();

    let row = await_campaign_terminal(&h.engine.db, &h.engine.bus, campaign.id, WAIT)
        .await
        .unwrap();
    assert_eq!(row.status(), CampaignStatus::Completed);
    // Three successful jobs at the default fake cost
    assert!((row.actual_cost - 0.03).abs() < 1e-9);

    let campaign = h.engine.get_campaign(campaign.id).await.unwrap();
    let topics = &campaign.phases[0].topics;
    assert!(topics.iter().all(|t| t.state == TopicState::Completed));

    let topic_a = topics.iter().find(|t| t.prompt == "Topic A").unwrap();
    assert_eq!(topic_a.attempts, 2, "rate-limited topic was retried once");

    // 1 failed + 3 successful submissions
    assert_eq!(h.provider.submit_count().await, 4);

    h.engine.shutdown();
}

#[tokio::test]
async fn pause_lets_inflight_finish_and_resume_completes() {
    let mut config = fast_config();
    config.max_parallel_per_campaign = 2;
    let h = harness_with(config).await;

    let topics = (0..5)
        .map(|i| PlannedTopic {
            prompt: format!("Parallel topic {}", i),
            depends_on: vec![],
        })
        .collect();
    let campaign = h
        .engine
        .create_campaign(CampaignSpec {
            goal: "wide survey".into(),
            topics: Some(topics),
            ..CampaignSpec::default()
        })
        .await
        .unwrap();

    let paused = h.engine.pause_campaign(campaign.id).await.unwrap();
    assert_eq!(paused.status, CampaignStatus::Paused);

    // The two in-flight topic jobs run to completion
    let dispatched: Vec<Uuid> = paused.phases[0]
        .topics
        .iter()
        .filter_map(|t| t.job_id)
        .collect();
    assert_eq!(dispatched.len(), 2, "parallelism cap dispatched two topics");
    for job_id in &dispatched {
        let row = await_job_terminal(&h.engine.db, &h.engine.bus, *job_id, WAIT)
            .await
            .unwrap();
        assert_eq!(row.status(), JobStatus::Completed);
    }

    // Give the event router time to observe the completions
    tokio::time::sleep(Duration::from_millis(200)).await;
    let current = h.engine.get_campaign(campaign.id).await.unwrap();
    assert_eq!(current.status, CampaignStatus::Paused);
    let planned = current.phases[0]
        .topics
        .iter()
        .filter(|t| t.state == TopicState::Planned && t.job_id.is_none())
        .count();
    assert_eq!(planned, 3, "paused campaign must not enqueue new topics");

    h.engine.resume_campaign(campaign.id).await.unwrap();
    let row = await_campaign_terminal(&h.engine.db, &h.engine.bus, campaign.id, WAIT)
        .await
        .unwrap();
    assert_eq!(row.status(), CampaignStatus::Completed);

    let finished = h.engine.get_campaign(campaign.id).await.unwrap();
    assert!(finished.phases[0]
        .topics
        .iter()
        .all(|t| t.state == TopicState::Completed));

    h.engine.shutdown();
}

#[tokio::test]
async fn expert_gap_loop_fills_gap_with_cited_belief() {
    let h = harness_with(fast_config()).await;
    h.provider
        .set_default_outcome(
            ScriptedOutcome::completed_after(
                1,
                "- [0.8] QUIC tunnels the TLS 1.3 handshake inside CRYPTO frames\n",
                0.05,
            )
            .with_citations(vec![Citation {
                start: 0,
                end: 42,
                url: "https://example.org/quic-rfc".into(),
                title: "QUIC transport RFC".into(),
            }]),
        )
        .await;

    h.engine
        .create_expert("TLS", "transport layer security", vec![])
        .await
        .unwrap();
    h.engine.record_gap("TLS", "QUIC handshake", 5).await.unwrap();

    let report = h.engine.learn("TLS", 0.50, 3).await.unwrap();
    assert_eq!(report.campaigns_run.len(), 1, "exactly one campaign");
    assert_eq!(report.gaps_filled.len(), 1);

    let campaign = h.engine.get_campaign(report.campaigns_run[0]).await.unwrap();
    assert!(campaign.goal.contains("QUIC handshake"));

    let beliefs = h.engine.expert_beliefs("TLS").await.unwrap();
    assert!(!beliefs.is_empty());
    assert!(beliefs
        .iter()
        .any(|b| b.sources.iter().any(|c| c.url.contains("example.org"))));

    let gaps = h.engine.expert_gaps("TLS").await.unwrap();
    let gap = gaps.iter().find(|g| g.topic == "QUIC handshake").unwrap();
    assert!(gap.filled_by_job.is_some());

    h.engine.shutdown();
}

#[tokio::test]
async fn crash_recovery_completes_exactly_once() {
    let db = Database::in_memory().await.unwrap();
    let provider = Arc::new(FakeProvider::new(ProviderKind::OpenAi));
    provider
        .set_default_outcome(ScriptedOutcome::completed_after(2, "# Findings", 0.07))
        .await;
    let blobs = tempfile::tempdir().unwrap();

    // First process: poller effectively disabled so the job stays
    // processing when it "crashes"
    let mut before_crash = fast_config();
    before_crash.poll_interval = Duration::from_secs(3_600);
    before_crash.campaign_step_interval = Duration::from_secs(3_600);
    let a = engine_on(before_crash, db.clone(), provider.clone(), blobs.path()).await;

    let outcome = a
        .create_job(JobSpec {
            prompt: "durable research".into(),
            model: Some("small".into()),
            ..JobSpec::default()
        })
        .await
        .unwrap();
    let EnqueueOutcome::Accepted(job) = outcome else {
        panic!("expected acceptance");
    };
    assert_eq!(job.status, JobStatus::Processing);
    a.shutdown();

    // Restart on the same database and provider
    let b = engine_on(fast_config(), db.clone(), provider.clone(), blobs.path()).await;
    let row = await_job_terminal(&b.db, &b.bus, job.id, WAIT).await.unwrap();
    assert_eq!(row.status(), JobStatus::Completed);

    // One ledger entry only: total equals the single job's cost
    let total = db.total_all().await.unwrap();
    assert!((total - 0.07).abs() < 1e-9);

    let summary = b.costs(SpendPeriod::All).await.unwrap();
    assert!((summary.total - 0.07).abs() < 1e-9);

    b.shutdown();
}

#[tokio::test]
async fn cancel_is_idempotent_with_one_remote_call() {
    let h = harness_with(fast_config()).await;
    // Runs far longer than the test; only a cancel can end it
    h.provider
        .push_outcome(ScriptedOutcome::completed_after(100_000, "unreached", 0.0))
        .await;

    let outcome = h
        .engine
        .create_job(JobSpec {
            prompt: "long running".into(),
            model: Some("small".into()),
            ..JobSpec::default()
        })
        .await
        .unwrap();
    let EnqueueOutcome::Accepted(job) = outcome else {
        panic!("expected acceptance");
    };
    assert_eq!(job.status, JobStatus::Processing);

    let first = h.engine.cancel_job(job.id).await.unwrap();
    assert_eq!(first.status, JobStatus::Cancelled);
    let second = h.engine.cancel_job(job.id).await.unwrap();
    assert_eq!(second.status, JobStatus::Cancelled);

    assert_eq!(
        h.provider.cancel_calls().await.len(),
        1,
        "no extra provider call after the first ack"
    );

    h.engine.shutdown();
}

#[tokio::test]
async fn provider_losing_a_job_fails_it_after_three_unknown_polls() {
    let h = harness_with(fast_config()).await;
    h.provider.push_outcome(ScriptedOutcome::lost()).await;

    let outcome = h
        .engine
        .create_job(JobSpec {
            prompt: "who am i".into(),
            model: Some("small".into()),
            ..JobSpec::default()
        })
        .await
        .unwrap();
    let EnqueueOutcome::Accepted(job) = outcome else {
        panic!("expected acceptance");
    };

    let row = await_job_terminal(&h.engine.db, &h.engine.bus, job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(row.status(), JobStatus::Failed);
    assert_eq!(row.job_error().unwrap().kind, ErrorKind::ProviderLostJob);

    h.engine.shutdown();
}

#[tokio::test]
async fn recording_the_same_gap_twice_is_one_gap() {
    let h = harness_with(fast_config()).await;
    h.engine
        .create_expert("TLS", "transport layer security", vec![])
        .await
        .unwrap();

    let first = h.engine.record_gap("TLS", "0-RTT replay", 4).await.unwrap();
    let second = h.engine.record_gap("TLS", "0-RTT replay", 2).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.priority, 4, "first write wins");

    let gaps = h.engine.expert_gaps("TLS").await.unwrap();
    assert_eq!(gaps.len(), 1);

    h.engine.shutdown();
}

// Property-based tests for the engine's pure invariants

use proptest::prelude::*;

use deepr_contracts::events::topic_matches;
use deepr_contracts::JobStatus;
use deepr_core::summarize::{Summarizer, TruncationSummarizer};

const ALL_STATUSES: [JobStatus; 7] = [
    JobStatus::Pending,
    JobStatus::Submitting,
    JobStatus::Processing,
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
    JobStatus::AdmissionRejected,
];

proptest! {
    /// Applying only legal transitions always yields a valid path prefix,
    /// and a terminal state is never left
    #[test]
    fn job_status_walks_never_leave_terminal(steps in proptest::collection::vec(0usize..7, 0..40)) {
        let mut current = JobStatus::Pending;
        let mut reached_terminal_at: Option<usize> = None;

        for (index, step) in steps.iter().enumerate() {
            let candidate = ALL_STATUSES[*step];
            if current.can_transition_to(candidate) {
                prop_assert!(!current.is_terminal(), "transitioned out of a terminal state");
                current = candidate;
            }
            if current.is_terminal() && reached_terminal_at.is_none() {
                reached_terminal_at = Some(index);
            }
            if let Some(_at) = reached_terminal_at {
                prop_assert!(current.is_terminal(), "left a terminal state after reaching one");
            }
        }
    }

    /// Terminal states accept no successor at all
    #[test]
    fn terminal_states_are_absorbing(from in 0usize..7, to in 0usize..7) {
        let from = ALL_STATUSES[from];
        let to = ALL_STATUSES[to];
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    /// A pattern matches exactly the topics it is a segment-prefix of
    #[test]
    fn topic_matching_is_segment_prefixing(
        segments in proptest::collection::vec("[a-z0-9]{1,8}", 1..5),
        extra in proptest::collection::vec("[a-z0-9]{1,8}", 0..3),
    ) {
        let pattern = segments.join(".");
        let mut full = segments.clone();
        full.extend(extra.clone());
        let topic = full.join(".");

        prop_assert!(topic_matches(&pattern, &topic));

        // Growing the last pattern segment must break the match
        let mut broken = segments.clone();
        if let Some(last) = broken.last_mut() {
            last.push('x');
        }
        prop_assert!(!topic_matches(&broken.join("."), &topic));
    }

    /// The truncation fallback always honours its budget and never panics
    /// on multi-byte input
    #[test]
    fn truncation_respects_token_budget(text in ".{0,2000}", budget in 1usize..500) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let out = runtime
            .block_on(TruncationSummarizer::new().summarise(&text, budget))
            .unwrap();
        prop_assert!(out.chars().count() <= budget * 4 || text.chars().count() <= budget * 4);

        // Determinism
        let again = runtime
            .block_on(TruncationSummarizer::new().summarise(&text, budget))
            .unwrap();
        prop_assert_eq!(out, again);
    }

    /// Forward-only dependency edges can never form a cycle
    #[test]
    fn forward_edges_are_acyclic(deps in proptest::collection::vec(proptest::collection::vec(0usize..10, 0..3), 1..10)) {
        use std::collections::HashMap;

        let count = deps.len();
        let edges: HashMap<usize, Vec<usize>> = deps
            .into_iter()
            .enumerate()
            .map(|(index, targets)| {
                // Point each edge strictly at an earlier topic
                let forward: Vec<usize> = targets
                    .into_iter()
                    .filter(|t| *t < index)
                    .collect();
                (index, forward)
            })
            .take(count)
            .collect();

        prop_assert!(!deepr_engine::campaign::dag::has_cycle(&edges));
    }
}

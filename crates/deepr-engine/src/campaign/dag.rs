// Dependency-graph helpers for campaign topics

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use deepr_contracts::TopicState;
use deepr_storage::TopicRow;

/// Whether `edges` (node -> prerequisites) contains a cycle
pub fn has_cycle(edges: &HashMap<usize, Vec<usize>>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        node: usize,
        edges: &HashMap<usize, Vec<usize>>,
        marks: &mut HashMap<usize, Mark>,
    ) -> bool {
        match marks.get(&node).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return false,
            Mark::InProgress => return true,
            Mark::Unvisited => {}
        }
        marks.insert(node, Mark::InProgress);
        for dep in edges.get(&node).into_iter().flatten() {
            if visit(*dep, edges, marks) {
                return true;
            }
        }
        marks.insert(node, Mark::Done);
        false
    }

    let mut marks = HashMap::new();
    edges.keys().any(|node| visit(*node, edges, &mut marks))
}

/// Topics that can never run: a transitive prerequisite failed
pub fn doomed_topics(topics: &[TopicRow]) -> HashSet<Uuid> {
    let by_id: HashMap<Uuid, &TopicRow> = topics.iter().map(|t| (t.id, t)).collect();

    fn is_doomed(
        id: Uuid,
        by_id: &HashMap<Uuid, &TopicRow>,
        cache: &mut HashMap<Uuid, bool>,
    ) -> bool {
        if let Some(&known) = cache.get(&id) {
            return known;
        }
        // Break potential cycles defensively while computing
        cache.insert(id, false);
        let doomed = match by_id.get(&id) {
            None => false,
            Some(topic) => topic.depends_on_ids().iter().any(|dep| {
                by_id
                    .get(dep)
                    .map(|row| row.state() == TopicState::Failed)
                    .unwrap_or(false)
                    || is_doomed(*dep, by_id, cache)
            }),
        };
        cache.insert(id, doomed);
        doomed
    }

    let mut cache = HashMap::new();
    topics
        .iter()
        .filter(|t| is_doomed(t.id, &by_id, &mut cache))
        .map(|t| t.id)
        .collect()
}

/// Topics nothing else depends on; the campaign's goal is reached through
/// at least one of them
pub fn sink_topics(topics: &[TopicRow]) -> Vec<Uuid> {
    let mut depended_on: HashSet<Uuid> = HashSet::new();
    for topic in topics {
        depended_on.extend(topic.depends_on_ids());
    }
    topics
        .iter()
        .filter(|t| !depended_on.contains(&t.id))
        .map(|t| t.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: Uuid, deps: &[Uuid], state: &str) -> TopicRow {
        TopicRow {
            id,
            phase_id: Uuid::nil(),
            campaign_id: Uuid::nil(),
            prompt: String::new(),
            depends_on: serde_json::to_string(deps).unwrap(),
            estimated_cost: 0.0,
            job_id: None,
            context_summary: None,
            state: state.to_string(),
            attempts: 0,
            next_attempt_at: None,
        }
    }

    #[test]
    fn detects_cycles() {
        let mut edges = HashMap::new();
        edges.insert(0, vec![1]);
        edges.insert(1, vec![2]);
        edges.insert(2, vec![0]);
        assert!(has_cycle(&edges));

        let mut acyclic = HashMap::new();
        acyclic.insert(0, vec![]);
        acyclic.insert(1, vec![0]);
        acyclic.insert(2, vec![0, 1]);
        assert!(!has_cycle(&acyclic));
    }

    #[test]
    fn failure_dooms_transitive_dependents() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let c = Uuid::now_v7();
        let d = Uuid::now_v7();
        let topics = vec![
            topic(a, &[], "failed"),
            topic(b, &[a], "planned"),
            topic(c, &[b], "planned"),
            topic(d, &[], "planned"),
        ];

        let doomed = doomed_topics(&topics);
        assert!(doomed.contains(&b));
        assert!(doomed.contains(&c));
        assert!(!doomed.contains(&d));
    }

    #[test]
    fn sinks_are_undepended_topics() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let c = Uuid::now_v7();
        let topics = vec![
            topic(a, &[], "planned"),
            topic(b, &[a], "planned"),
            topic(c, &[a, b], "planned"),
        ];
        assert_eq!(sink_topics(&topics), vec![c]);
    }
}

// Planner prompt construction and plan parsing
//
// Planning is itself a job on a cheap model. The planner answers with a
// markdown list, one topic per line, dependencies named by 1-based list
// position:
//
//   - Survey QUIC handshake literature
//   - Compare with TLS 1.3 record layer [after: 1]
//   - Synthesise findings [after: 1, 2]
//
// Anything that fails to parse fails the campaign rather than guessing.

use deepr_core::error::{DeeprError, Result};

/// Parsed topic with 0-based dependency indices into the same list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDraft {
    pub prompt: String,
    pub depends_on: Vec<usize>,
}

/// Prompt asking the planner model to decompose a goal
pub fn planner_prompt(goal: &str, results_so_far: Option<&str>) -> String {
    let mut prompt = format!(
        "Decompose the following research goal into 2-6 focused research topics.\n\
         Answer with a markdown list only, one topic per line. When a topic needs\n\
         the results of earlier topics, append [after: N] with their 1-based\n\
         positions.\n\nGoal: {}\n",
        goal
    );
    if let Some(results) = results_so_far {
        prompt.push_str(
            "\nResults gathered so far (plan the next phase to build on them, \
             without repeating covered ground):\n\n",
        );
        prompt.push_str(results);
        prompt.push('\n');
    }
    prompt
}

/// Parse planner output into topic drafts
pub fn parse_plan(markdown: &str) -> Result<Vec<TopicDraft>> {
    let mut drafts = Vec::new();

    for line in markdown.lines() {
        let line = line.trim();
        let Some(item) = list_item(line) else { continue };
        if item.is_empty() {
            continue;
        }

        let (prompt, depends_on) = split_dependencies(item)?;
        if prompt.is_empty() {
            return Err(DeeprError::invalid_request(format!(
                "planner produced an empty topic: {:?}",
                line
            )));
        }
        drafts.push(TopicDraft {
            prompt: prompt.to_string(),
            depends_on,
        });
    }

    if drafts.is_empty() {
        return Err(DeeprError::invalid_request(
            "planner output contained no topics",
        ));
    }

    // Dependencies must name existing, distinct, earlier topics
    for (index, draft) in drafts.iter().enumerate() {
        for &dep in &draft.depends_on {
            if dep >= drafts.len() {
                return Err(DeeprError::invalid_request(format!(
                    "topic {} depends on nonexistent topic {}",
                    index + 1,
                    dep + 1
                )));
            }
            if dep == index {
                return Err(DeeprError::invalid_request(format!(
                    "topic {} depends on itself",
                    index + 1
                )));
            }
        }
    }

    Ok(drafts)
}

/// Strip a markdown list marker (`- `, `* `, `1. `)
fn list_item(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            return Some(rest.trim());
        }
    }
    None
}

/// Split `"topic text [after: 1, 2]"` into text and 0-based indices
fn split_dependencies(item: &str) -> Result<(&str, Vec<usize>)> {
    let lower = item.to_lowercase();
    let Some(open) = lower.rfind("[after:") else {
        return Ok((item, Vec::new()));
    };
    let Some(close) = item[open..].find(']') else {
        return Err(DeeprError::invalid_request(format!(
            "unterminated dependency list in {:?}",
            item
        )));
    };

    let inner = &item[open + "[after:".len()..open + close];
    let mut depends_on = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let position: usize = part.parse().map_err(|_| {
            DeeprError::invalid_request(format!("bad dependency reference {:?}", part))
        })?;
        if position == 0 {
            return Err(DeeprError::invalid_request(
                "dependency positions are 1-based",
            ));
        }
        depends_on.push(position - 1);
    }

    Ok((item[..open].trim(), depends_on))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_list() {
        let plan = parse_plan("- First topic\n- Second topic\n").unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].prompt, "First topic");
        assert!(plan[0].depends_on.is_empty());
    }

    #[test]
    fn parses_dependencies_and_numbered_lists() {
        let markdown = "Intro text ignored\n\
                        1. Survey literature\n\
                        2. Compare approaches [after: 1]\n\
                        3. Synthesise findings [after: 1, 2]\n";
        let plan = parse_plan(markdown).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[1].depends_on, vec![0]);
        assert_eq!(plan[2].depends_on, vec![0, 1]);
        assert_eq!(plan[2].prompt, "Synthesise findings");
    }

    #[test]
    fn rejects_empty_and_dangling_plans() {
        assert!(parse_plan("no list here\n").is_err());
        assert!(parse_plan("- only topic [after: 5]\n").is_err());
        assert!(parse_plan("- self loop [after: 1]\n").is_err());
    }

    #[test]
    fn prompt_carries_prior_results_for_replanning() {
        let prompt = planner_prompt("map QUIC", Some("# Phase 1 findings"));
        assert!(prompt.contains("Goal: map QUIC"));
        assert!(prompt.contains("# Phase 1 findings"));
    }
}

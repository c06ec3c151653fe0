//! Offline oracle. Deterministic keyword matching for topics and an
//! extractive digest for summaries; useful without credentials and in tests.

use crate::decant::transcript::{Exchange, PREVIOUS_SUMMARY_ROLE};
use crate::decant::util::truncate_with_ellipsis;
use crate::error::DecantError;
use crate::oracle::prompts::NOT_FOUND;
use crate::oracle::{BoundaryOracle, Oracle, SummaryOracle, SummaryQuery, TopicQuery};

const MAX_BULLET_CHARS: usize = 160;
const MAX_BULLETS: usize = 40;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOracle;

fn topic_words(topic: &str) -> Vec<String> {
    topic
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn mentions_all(exchange: &Exchange, words: &[String]) -> bool {
    let haystack = exchange.text.to_lowercase();
    words.iter().all(|w| haystack.contains(w.as_str()))
}

impl BoundaryOracle for LocalOracle {
    fn locate(&self, query: &TopicQuery) -> Result<String, DecantError> {
        let words = topic_words(&query.topic);
        if words.is_empty() {
            return Ok(NOT_FOUND.to_string());
        }
        Ok(query
            .exchanges
            .iter()
            .find(|ex| mentions_all(ex, &words))
            .map_or_else(|| NOT_FOUND.to_string(), |ex| ex.id.clone()))
    }
}

fn bullet(exchange: &Exchange) -> String {
    // An earlier summary is already condensed; keep it whole.
    if exchange.role == PREVIOUS_SUMMARY_ROLE {
        return format!("- {}: {}", exchange.role, exchange.text);
    }
    format!(
        "- {}: {}",
        exchange.role,
        truncate_with_ellipsis(&exchange.text, MAX_BULLET_CHARS)
    )
}

impl SummaryOracle for LocalOracle {
    fn summarize(&self, query: &SummaryQuery) -> Result<String, DecantError> {
        let total = query.exchanges.len();
        let mut lines = vec![format!(
            "Summary of the earlier conversation ({total} exchanges, extractive):"
        )];
        if total <= MAX_BULLETS {
            lines.extend(query.exchanges.iter().map(bullet));
        } else {
            let half = MAX_BULLETS / 2;
            lines.extend(query.exchanges[..half].iter().map(bullet));
            lines.push(format!("- ... {} exchanges omitted ...", total - 2 * half));
            lines.extend(query.exchanges[total - half..].iter().map(bullet));
        }
        Ok(lines.join("\n"))
    }
}

impl Oracle for LocalOracle {
    fn label(&self) -> String {
        "local".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::LocalOracle;
    use crate::decant::transcript::{Exchange, PREVIOUS_SUMMARY_ROLE};
    use crate::oracle::{BoundaryOracle, SummaryOracle, SummaryQuery, TopicQuery};

    fn exchange(id: &str, role: &str, text: &str) -> Exchange {
        Exchange {
            id: id.to_string(),
            role: role.to_string(),
            text: text.to_string(),
            line: 1,
        }
    }

    fn topic(topic: &str, exchanges: Vec<Exchange>) -> TopicQuery {
        TopicQuery {
            topic: topic.to_string(),
            transcript: String::new(),
            exchanges,
        }
    }

    #[test]
    fn first_exchange_with_every_word_wins() {
        let exchanges = vec![
            exchange("u1", "user", "set up the database"),
            exchange("a1", "assistant", "Database ready."),
            exchange("u2", "user", "Now the Auth refactor, please"),
            exchange("u3", "user", "more auth refactor work"),
        ];
        let got = LocalOracle.locate(&topic("auth refactor!", exchanges.clone())).expect("locate");
        assert_eq!(got, "u2");
        let missing = LocalOracle.locate(&topic("kubernetes", exchanges)).expect("locate");
        assert_eq!(missing, "NOT_FOUND");
    }

    #[test]
    fn summary_lists_exchanges() {
        let summary = LocalOracle
            .summarize(&SummaryQuery {
                transcript: String::new(),
                exchanges: vec![
                    exchange("u1", "user", "fix the parser"),
                    exchange("a1", "assistant", "done"),
                ],
                max_tokens: 100,
            })
            .expect("summary");
        assert!(summary.starts_with("Summary of the earlier conversation (2 exchanges"));
        assert!(summary.contains("- user: fix the parser"));
        assert!(summary.ends_with("- assistant: done"));
    }

    #[test]
    fn long_heads_are_elided_in_the_middle() {
        let exchanges = (0..100)
            .map(|i| exchange(&format!("m{i}"), "user", &format!("message {i}")))
            .collect();
        let summary = LocalOracle
            .summarize(&SummaryQuery {
                transcript: String::new(),
                exchanges,
                max_tokens: 100,
            })
            .expect("summary");
        assert!(summary.contains("- ... 60 exchanges omitted ..."));
        assert!(summary.contains("message 0"));
        assert!(summary.contains("message 99"));
    }

    #[test]
    fn earlier_summary_is_kept_whole() {
        let prior = format!("PRIOR WORK {}", "detail ".repeat(60));
        let summary = LocalOracle
            .summarize(&SummaryQuery {
                transcript: String::new(),
                exchanges: vec![
                    exchange("sum0", PREVIOUS_SUMMARY_ROLE, &prior),
                    exchange("u1", "user", "next task"),
                ],
                max_tokens: 100,
            })
            .expect("summary");
        assert!(summary.contains(&format!("- previous summary: {}", prior.trim_end())));
    }
}

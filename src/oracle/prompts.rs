use crate::oracle::{SummaryQuery, TopicQuery};

/// Answer the topic oracle gives when the topic is absent.
pub const NOT_FOUND: &str = "NOT_FOUND";

const BOUNDARY_MAX_TOKENS: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

const BOUNDARY_SYSTEM: &str = "You are a conversation analyst. You will be given a transcript of a \
coding-agent session in which every message is labelled with its uuid. Find the first message \
where the conversation turns to the requested topic.\n\n\
Rules:\n\
- Return ONLY the uuid of the first message that matches the topic\n\
- If the topic spans several messages, return the uuid of the FIRST one\n\
- If the topic is discussed from the very start, return the uuid of the first message\n\
- If the topic is never discussed, return NOT_FOUND\n\
- Return nothing else, just the uuid or NOT_FOUND";

const SUMMARY_SYSTEM: &str = "You are a conversation summarizer. Given a transcript of a \
coding-agent session, produce a concise but thorough summary that captures:\n\n\
1. Topics discussed: what the conversation was about\n\
2. Key decisions: what was chosen and why\n\
3. Actions taken: files modified, commands run\n\
4. Current state: what was accomplished by the end of this section\n\
5. Unresolved items: anything left incomplete or pending\n\n\
Format the summary as a structured overview using bullet points. Be specific about file \
names, function names and technical details. Keep it under 1500 words. Do not include \
preamble or meta-commentary.";

pub fn boundary_prompt(query: &TopicQuery) -> Prompt {
    Prompt {
        system: BOUNDARY_SYSTEM.to_string(),
        user: format!(
            "Find the first message about this topic: {}\n\nTranscript:\n{}",
            query.topic, query.transcript
        ),
        max_tokens: BOUNDARY_MAX_TOKENS,
    }
}

pub fn summary_prompt(query: &SummaryQuery) -> Prompt {
    Prompt {
        system: SUMMARY_SYSTEM.to_string(),
        user: format!("Summarize this conversation section:\n\n{}", query.transcript),
        max_tokens: query.max_tokens,
    }
}

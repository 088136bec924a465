//! Content-analysis capability
//!
//! The engine never interprets text itself. It hands raw text to a
//! [`ContentAnalyzer`] and gets back keywords, a short context, tags,
//! entities and (optionally) a classification. [`KeywordAnalyzer`] is the
//! built-in lexical implementation used when no model-backed analyzer is
//! injected.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;
use crate::model::{EntityRef, Memory, MemoryType, Task};
use crate::text;

/// Result of analysing one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub keywords: Vec<String>,
    pub context: String,
    pub tags: Vec<String>,
    pub entities: Vec<EntityRef>,
    /// Ignored by the engine; the vector index embeds with its own model.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
}

/// Result of revising memories in light of a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Revision {
    /// Revised copies of the input memories (same ids)
    pub revised: Vec<Memory>,
    /// Free-text lessons worth remembering on their own
    pub lessons: Vec<String>,
}

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, text: &str, max_chars: usize) -> AdapterResult<ContentAnalysis>;

    async fn revise(&self, memories: &[Memory], task: &Task) -> AdapterResult<Revision>;
}

// ---------------------------------------------------------------------------
// KeywordAnalyzer
// ---------------------------------------------------------------------------

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\p{Lu}[\p{L}\p{N}]*(?:\s+\p{Lu}[\p{L}\p{N}]*)*").expect("valid name regex")
});

const MAX_KEYWORDS: usize = 6;
const MAX_TOPICS: usize = 3;
const MAX_CONTEXT_CHARS: usize = 160;
const MAX_LESSON_SOURCES: usize = 3;

pub const REFLECTED_TAG: &str = "reflected";
pub const LESSON_TAG: &str = "lesson";

/// Words that signal a classification but say nothing about the topic.
const CUE_WORDS: &[&str] = &[
    "believe", "dislike", "dislikes", "favorite", "favourite", "feel", "hate", "hates", "learned",
    "learnt", "lesson", "like", "likes", "love", "loves", "noticed", "observed", "prefer",
    "preferred", "prefers", "saw", "think", "user",
];

fn has_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

/// Lexical heuristics standing in for a language model.
#[derive(Debug, Clone, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Most frequent content tokens, ties broken by first appearance.
    pub fn keywords(input: &str) -> Vec<String> {
        let tokens: Vec<String> = text::content_tokens(input)
            .into_iter()
            .filter(|t| t.chars().count() >= 3)
            .collect();
        let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
        for (idx, token) in tokens.iter().enumerate() {
            stats.entry(token.as_str()).or_insert((0, idx)).0 += 1;
        }
        let mut ranked: Vec<(&str, (usize, usize))> = stats.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.1 .1.cmp(&b.1 .1)));
        ranked
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(token, _)| token.to_string())
            .collect()
    }

    pub fn classify(input: &str) -> Option<MemoryType> {
        let lower = input.to_lowercase();
        let tokens = text::tokenize(&lower);
        if has_any(
            &tokens,
            &[
                "prefer", "prefers", "preferred", "favorite", "favourite", "likes", "dislikes",
                "loves", "hates",
            ],
        ) {
            return Some(MemoryType::UserProfile);
        }
        if ["i think", "i believe", "in my opinion", "i feel"]
            .iter()
            .any(|cue| lower.contains(cue))
        {
            return Some(MemoryType::Opinion);
        }
        if has_any(&tokens, &["lesson", "lessons", "learned", "learnt"]) {
            return Some(MemoryType::Experience);
        }
        if lower.contains("how to") || has_any(&tokens, &["step", "steps"]) {
            return Some(MemoryType::Procedural);
        }
        if has_any(&tokens, &["noticed", "observed", "saw"]) {
            return Some(MemoryType::Observation);
        }
        None
    }

    /// Capitalised names plus the leading topical keywords.
    pub fn entities(input: &str, keywords: &[String]) -> Vec<EntityRef> {
        let mut entities: Vec<EntityRef> = Vec::new();
        for m in NAME_RE.find_iter(input) {
            let name = m.as_str().trim();
            let single = !name.contains(char::is_whitespace);
            let lower = name.to_lowercase();
            if single && (text::is_stopword(&lower) || CUE_WORDS.contains(&lower.as_str())) {
                continue;
            }
            let entity = EntityRef::new(name, "name");
            if !entities.iter().any(|e| e.id == entity.id) {
                entities.push(entity);
            }
        }
        let named: Vec<String> = entities.iter().map(|e| e.name.to_lowercase()).collect();
        for keyword in keywords
            .iter()
            .filter(|k| !CUE_WORDS.contains(&k.as_str()))
            .filter(|k| !named.iter().any(|n| n.split_whitespace().any(|w| w == k.as_str())))
            .take(MAX_TOPICS)
        {
            entities.push(EntityRef::new(keyword, "topic"));
        }
        entities
    }

    fn tags(input: &str, memory_type: Option<MemoryType>) -> Vec<String> {
        let mut tags = vec![memory_type.unwrap_or(MemoryType::Episodic).to_string()];
        if input.contains('?') {
            tags.push("question".to_string());
        }
        let tokens = text::tokenize(input);
        if has_any(&tokens, &["plan", "plans", "will", "tomorrow", "todo"]) {
            tags.push("plan".to_string());
        }
        tags
    }

    fn context(input: &str) -> String {
        let first = text::sentences(input).into_iter().next().unwrap_or_default();
        text::truncate_chars(first, MAX_CONTEXT_CHARS).to_string()
    }
}

#[async_trait]
impl ContentAnalyzer for KeywordAnalyzer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn analyze(&self, input: &str, max_chars: usize) -> AdapterResult<ContentAnalysis> {
        let input = text::truncate_chars(input, max_chars);
        let keywords = Self::keywords(input);
        let memory_type = Self::classify(input);
        Ok(ContentAnalysis {
            entities: Self::entities(input, &keywords),
            tags: Self::tags(input, memory_type),
            context: Self::context(input),
            keywords,
            embedding: None,
            memory_type,
        })
    }

    async fn revise(&self, memories: &[Memory], task: &Task) -> AdapterResult<Revision> {
        let task_note = format!("relevant to: {}", task.description.trim());
        let revised = memories
            .iter()
            .map(|m| {
                let mut m = m.clone();
                if !m.tags.iter().any(|t| t == REFLECTED_TAG) {
                    m.tags.push(REFLECTED_TAG.to_string());
                }
                if !m.context.contains(&task_note) {
                    m.context = if m.context.is_empty() {
                        task_note.clone()
                    } else {
                        format!("{} ({})", m.context, task_note)
                    };
                }
                m
            })
            .collect();

        let mut lessons = Vec::new();
        if memories.len() >= 2 {
            let sources: Vec<&str> = memories
                .iter()
                .take(MAX_LESSON_SOURCES)
                .filter_map(|m| text::sentences(&m.content).into_iter().next())
                .collect();
            let mut lesson = format!(
                "Lesson learned for {}: {}",
                task.description.trim(),
                sources.join("; ")
            );
            if !task.goal.trim().is_empty() {
                lesson.push_str(&format!(" (goal: {})", task.goal.trim()));
            }
            lessons.push(lesson);
        }

        Ok(Revision { revised, lessons })
    }
}

//! Data model shared by every layer of the engine
//!
//! - `Memory`: the durable unit, placed in one of three tiers (`MemoryLayer`)
//! - `Experience`: raw input to Retain, never stored directly
//! - `Entity` / `Relation`: graph-side view of long-term memories
//! - `Context` / `Task`: request scoping and the reason for a Reflect
//! - `RetrievalResult`: one scored hit from a retrieval strategy

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::text;

/// Free-form metadata attached to experiences, memories and contexts.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Unique identifier for a memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Generate a new random MemoryId
    pub fn new() -> Self {
        MemoryId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        MemoryId(s.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        MemoryId(s)
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of knowledge a memory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Episodic,
    Semantic,
    Procedural,
    Experience,
    Observation,
    Opinion,
    UserProfile,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episodic => write!(f, "episodic"),
            Self::Semantic => write!(f, "semantic"),
            Self::Procedural => write!(f, "procedural"),
            Self::Experience => write!(f, "experience"),
            Self::Observation => write!(f, "observation"),
            Self::Opinion => write!(f, "opinion"),
            Self::UserProfile => write!(f, "user_profile"),
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "experience" => Ok(Self::Experience),
            "observation" => Ok(Self::Observation),
            "opinion" => Ok(Self::Opinion),
            "user_profile" | "userprofile" => Ok(Self::UserProfile),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

/// Storage tier a memory currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryLayer {
    /// Focus of attention: short-lived, session-scoped, bounded
    #[serde(rename = "foa")]
    Foa,
    /// Dynamic/associative: mid-term, TTL-bound
    #[serde(rename = "da")]
    Da,
    /// Long-term: durable, never silently evicted
    #[serde(rename = "ltm")]
    Ltm,
}

impl std::fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foa => write!(f, "foa"),
            Self::Da => write!(f, "da"),
            Self::Ltm => write!(f, "ltm"),
        }
    }
}

/// Reference from a memory to a graph entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: String,
    pub entity_type: String,
}

impl EntityRef {
    pub fn new(name: &str, entity_type: &str) -> Self {
        Self {
            id: Entity::derive_id(name, entity_type),
            name: name.trim().to_string(),
            entity_type: entity_type.to_string(),
        }
    }
}

/// The durable unit of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub memory_type: MemoryType,
    pub layer: MemoryLayer,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub links: BTreeSet<MemoryId>,
    #[serde(default)]
    pub retrieval_count: u64,
    /// Session that produced the memory; scopes the FoA tier.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Memory {
    /// Create a new focus-of-attention memory with a fresh id.
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            id: MemoryId::new(),
            content: content.into(),
            timestamp: Utc::now(),
            memory_type,
            layer: MemoryLayer::Foa,
            keywords: Vec::new(),
            tags: Vec::new(),
            context: String::new(),
            entities: Vec::new(),
            links: BTreeSet::new(),
            retrieval_count: 0,
            session_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_layer(mut self, layer: MemoryLayer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Check the id/content/self-link invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::EmptyId);
        }
        if self.content.trim().is_empty() {
            return Err(ModelError::EmptyContent);
        }
        if self.links.contains(&self.id) {
            return Err(ModelError::SelfLink(self.id.to_string()));
        }
        Ok(())
    }

    /// Record an undirected association. Returns `Ok(false)` when the link
    /// already existed.
    pub fn add_link(&mut self, other: &MemoryId) -> Result<bool, ModelError> {
        if other == &self.id {
            return Err(ModelError::SelfLink(self.id.to_string()));
        }
        Ok(self.links.insert(other.clone()))
    }

    /// Fold a near-duplicate into this memory: union of tags, keywords,
    /// entities, links and metadata; the longer content wins. Returns `true`
    /// when the content was replaced.
    pub fn merge_from(&mut self, other: &Memory) -> bool {
        union_into(&mut self.tags, &other.tags);
        union_into(&mut self.keywords, &other.keywords);
        for entity in &other.entities {
            if !self.entities.iter().any(|e| e.id == entity.id) {
                self.entities.push(entity.clone());
            }
        }
        for link in &other.links {
            if link != &self.id {
                self.links.insert(link.clone());
            }
        }
        self.links.remove(&other.id);
        for (k, v) in &other.metadata {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if self.context.is_empty() {
            self.context = other.context.clone();
        }
        if other.content.chars().count() > self.content.chars().count() {
            self.content = other.content.clone();
            true
        } else {
            false
        }
    }

    /// Text embedded for the atomic note: content plus its lexical metadata.
    pub fn enriched_text(&self) -> String {
        let mut parts = vec![self.content.clone()];
        if !self.context.is_empty() {
            parts.push(self.context.clone());
        }
        if !self.keywords.is_empty() {
            parts.push(self.keywords.join(" "));
        }
        if !self.tags.is_empty() {
            parts.push(self.tags.join(" "));
        }
        parts.join("\n")
    }

    /// Rough token count used by the FoA budget.
    pub fn token_estimate(&self) -> usize {
        self.content.chars().count().div_ceil(4).max(1)
    }

    /// Token set over content, keywords and tags for lexical matching.
    pub fn lexical_terms(&self) -> HashSet<String> {
        let mut terms: HashSet<String> = text::tokenize(&self.content).into_iter().collect();
        for kw in self.keywords.iter().chain(self.tags.iter()) {
            terms.extend(text::tokenize(kw));
        }
        terms
    }
}

fn union_into(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Raw observation handed to Retain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Experience {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.content.trim().is_empty() {
            return Err(ModelError::EmptyContent);
        }
        Ok(())
    }
}

/// Graph node describing a person, place, topic, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    /// Retrieval key/value pair used for graph lookup
    pub lookup_key: String,
    pub lookup_value: String,
}

impl Entity {
    pub fn new(name: &str, entity_type: &str) -> Result<Self, ModelError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelError::EmptyEntityName);
        }
        Ok(Self {
            id: Self::derive_id(name, entity_type),
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            description: String::new(),
            lookup_key: "name".to_string(),
            lookup_value: name.to_lowercase(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Deterministic id so the same entity mentioned by two memories
    /// resolves to one node.
    pub fn derive_id(name: &str, entity_type: &str) -> String {
        format!("{}:{}", entity_type, text::normalize(name))
    }
}

impl From<&EntityRef> for Entity {
    fn from(r: &EntityRef) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            entity_type: r.entity_type.clone(),
            description: String::new(),
            lookup_key: "name".to_string(),
            lookup_value: r.name.to_lowercase(),
        }
    }
}

/// Weighted edge between two entities or memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub strength: f32,
}

impl Relation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
        strength: f32,
    ) -> Result<Self, ModelError> {
        let source = source.into();
        let target = target.into();
        if source.is_empty() || target.is_empty() {
            return Err(ModelError::EmptyRelationEndpoint);
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(ModelError::StrengthOutOfRange(strength));
        }
        Ok(Self {
            source,
            target,
            relation_type: relation_type.into(),
            strength,
        })
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints.
    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.source == id {
            Some(&self.target)
        } else if self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// Session/user scoping threaded through every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Context {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Why memories should be revised during Reflect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    #[serde(default)]
    pub goal: String,
}

impl Task {
    pub fn new(description: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            goal: goal.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.description.trim().is_empty() {
            return Err(ModelError::EmptyTaskDescription);
        }
        Ok(())
    }
}

/// Which strategy produced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Graph,
    Semantic,
    Subgraph,
    Keyword,
    Fused,
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Semantic => write!(f, "semantic"),
            Self::Subgraph => write!(f, "subgraph"),
            Self::Keyword => write!(f, "keyword"),
            Self::Fused => write!(f, "fused"),
        }
    }
}

/// One scored hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub memory: Memory,
    pub score: f64,
    pub method: RetrievalMethod,
}

impl RetrievalResult {
    pub fn new(memory: Memory, score: f64, method: RetrievalMethod) -> Self {
        Self {
            memory,
            score,
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_has_id_and_foa_layer() {
        let m = Memory::new("likes espresso", MemoryType::UserProfile);
        assert!(!m.id.is_empty());
        assert_eq!(m.layer, MemoryLayer::Foa);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn empty_content_is_invalid() {
        let m = Memory::new("   ", MemoryType::Episodic);
        assert_eq!(m.validate(), Err(ModelError::EmptyContent));
    }

    #[test]
    fn self_link_is_refused() {
        let mut m = Memory::new("a", MemoryType::Episodic);
        let own = m.id.clone();
        assert!(m.add_link(&own).is_err());
        let other = MemoryId::new();
        assert!(m.add_link(&other).unwrap());
        assert!(!m.add_link(&other).unwrap());
    }

    #[test]
    fn merge_keeps_longer_content_and_unions_tags() {
        let mut a = Memory::new("coffee", MemoryType::UserProfile).with_tags(&["drink"]);
        let b = Memory::new("coffee every morning", MemoryType::UserProfile)
            .with_tags(&["drink", "morning"]);
        assert!(a.merge_from(&b));
        assert_eq!(a.content, "coffee every morning");
        assert_eq!(a.tags, vec!["drink", "morning"]);
    }

    #[test]
    fn merge_never_links_to_self_or_absorbed() {
        let mut a = Memory::new("one", MemoryType::Episodic);
        let mut b = Memory::new("one two", MemoryType::Episodic);
        b.links.insert(a.id.clone());
        a.links.insert(b.id.clone());
        a.merge_from(&b);
        assert!(a.validate().is_ok());
        assert!(!a.links.contains(&b.id));
    }

    #[test]
    fn enriched_text_includes_metadata() {
        let mut m = Memory::new("content", MemoryType::Semantic);
        m.context = "ctx".into();
        m.keywords = vec!["kw".into()];
        m.tags = vec!["tag".into()];
        assert_eq!(m.enriched_text(), "content\nctx\nkw\ntag");
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(Memory::new("abcde", MemoryType::Episodic).token_estimate(), 2);
        assert_eq!(Memory::new("a", MemoryType::Episodic).token_estimate(), 1);
    }

    #[test]
    fn entity_ids_are_deterministic() {
        let a = Entity::new("Alice  Smith", "person").unwrap();
        let b = Entity::new("alice smith", "person").unwrap();
        assert_eq!(a.id, b.id);
        assert!(Entity::new(" ", "person").is_err());
    }

    #[test]
    fn relation_strength_is_bounded() {
        assert!(Relation::new("a", "b", "knows", 0.5).is_ok());
        assert_eq!(
            Relation::new("a", "b", "knows", 1.5),
            Err(ModelError::StrengthOutOfRange(1.5))
        );
        assert_eq!(
            Relation::new("", "b", "knows", 0.5),
            Err(ModelError::EmptyRelationEndpoint)
        );
    }

    #[test]
    fn memory_type_parses_loosely() {
        assert_eq!("user-profile".parse::<MemoryType>(), Ok(MemoryType::UserProfile));
        assert_eq!("Episodic".parse::<MemoryType>(), Ok(MemoryType::Episodic));
        assert!("dream".parse::<MemoryType>().is_err());
    }

    #[test]
    fn memory_serde_roundtrip() {
        let mut m = Memory::new("roundtrip", MemoryType::Observation).with_session("s1");
        m.links.insert(MemoryId::from("other"));
        let json = serde_json::to_string(&m).unwrap();
        let back: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        assert!(json.contains("\"layer\":\"foa\""));
    }
}

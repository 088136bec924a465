//! Operation adapter over an injected [`ContentAnalyzer`]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::analysis::{ContentAnalyzer, LESSON_TAG};
use crate::config::OperationConfig;
use crate::error::{AdapterError, AdapterResult, ConfigError};
use crate::model::{Context, Experience, Memory, MemoryType, Task};
use crate::traits::{Adapter, Availability, OperationAdapter, ReflectOutcome};

const NAME: &str = "operation";

/// Metadata key that forces the memory type of a retained experience.
pub const MEMORY_TYPE_KEY: &str = "memory_type";
/// Metadata key listing the ids a reflected lesson was derived from.
pub const DERIVED_FROM_KEY: &str = "derived_from";

pub struct AnalyzerOperation {
    analyzer: Arc<dyn ContentAnalyzer>,
    max_chars: usize,
    available: Availability,
}

impl AnalyzerOperation {
    pub fn new(config: &OperationConfig, analyzer: Arc<dyn ContentAnalyzer>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            analyzer,
            max_chars: config.max_chars,
            available: Availability::default(),
        })
    }

    /// Toggle liveness. While unavailable every call fails with `NotAvailable`.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    fn memory_type_override(experience: &Experience) -> AdapterResult<Option<MemoryType>> {
        match experience.metadata.get(MEMORY_TYPE_KEY) {
            None => Ok(None),
            Some(serde_json::Value::String(raw)) => raw
                .parse()
                .map(Some)
                .map_err(|e: String| AdapterError::invalid_input(NAME, e)),
            Some(other) => Err(AdapterError::invalid_input(
                NAME,
                format!("{MEMORY_TYPE_KEY} must be a string, got {other}"),
            )),
        }
    }

    async fn analyzed_memory(
        &self,
        content: &str,
        memory_type: Option<MemoryType>,
        context: &Context,
    ) -> AdapterResult<Memory> {
        let analysis = self.analyzer.analyze(content, self.max_chars).await?;
        let memory_type = memory_type
            .or(analysis.memory_type)
            .unwrap_or(MemoryType::Episodic);

        let mut memory = Memory::new(content, memory_type);
        memory.keywords = analysis.keywords;
        memory.context = analysis.context;
        memory.tags = analysis.tags;
        memory.entities = analysis.entities;
        memory.session_id = context.session_id.clone();
        if let Some(user) = &context.user_id {
            memory.metadata.insert("user_id".to_string(), json!(user));
        }
        Ok(memory)
    }
}

impl Adapter for AnalyzerOperation {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.available.get()
    }
}

#[async_trait]
impl OperationAdapter for AnalyzerOperation {
    #[instrument(skip_all, fields(analyzer = self.analyzer.name()))]
    async fn retain(&self, experience: &Experience, context: &Context) -> AdapterResult<Memory> {
        self.available.ensure(NAME)?;
        experience
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;
        let forced = Self::memory_type_override(experience)?;

        let mut memory = self
            .analyzed_memory(&experience.content, forced, context)
            .await?;
        memory.timestamp = experience.timestamp;
        for (k, v) in &experience.metadata {
            if k != MEMORY_TYPE_KEY {
                memory.metadata.insert(k.clone(), v.clone());
            }
        }
        debug!(memory_type = %memory.memory_type, keywords = memory.keywords.len(), "analyzed experience");
        Ok(memory)
    }

    #[instrument(skip_all, fields(analyzer = self.analyzer.name(), memories = memories.len()))]
    async fn reflect(
        &self,
        memories: &[Memory],
        task: &Task,
        context: &Context,
    ) -> AdapterResult<ReflectOutcome> {
        self.available.ensure(NAME)?;
        task.validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;
        if memories.is_empty() {
            return Err(AdapterError::invalid_input(NAME, "nothing to reflect on"));
        }

        let revision = self.analyzer.revise(memories, task).await?;

        let mut updated = Vec::with_capacity(revision.revised.len());
        for revised in revision.revised {
            if memories.iter().any(|m| m.id == revised.id) {
                updated.push(revised);
            } else {
                warn!(memory_id = %revised.id, "analyzer revised an unknown memory, dropped");
            }
        }

        let derived_from: Vec<String> = memories.iter().map(|m| m.id.to_string()).collect();
        let mut created = Vec::with_capacity(revision.lessons.len());
        for lesson in revision.lessons {
            if lesson.trim().is_empty() {
                continue;
            }
            let mut memory = self
                .analyzed_memory(&lesson, Some(MemoryType::Experience), context)
                .await?;
            if !memory.tags.iter().any(|t| t == LESSON_TAG) {
                memory.tags.push(LESSON_TAG.to_string());
            }
            memory
                .metadata
                .insert(DERIVED_FROM_KEY.to_string(), json!(derived_from));
            created.push(memory);
        }

        Ok(ReflectOutcome { updated, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::KeywordAnalyzer;
    use crate::model::MemoryLayer;

    fn operation() -> AnalyzerOperation {
        AnalyzerOperation::new(&OperationConfig::default(), Arc::new(KeywordAnalyzer::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn retain_classifies_and_scopes_to_session() {
        let op = operation();
        let ctx = Context::session("s1").with_user("u1");
        let m = op
            .retain(&Experience::new("User prefers coffee in the morning"), &ctx)
            .await
            .unwrap();
        assert_eq!(m.content, "User prefers coffee in the morning");
        assert_eq!(m.memory_type, MemoryType::UserProfile);
        assert_eq!(m.layer, MemoryLayer::Foa);
        assert_eq!(m.session_id.as_deref(), Some("s1"));
        assert_eq!(m.metadata.get("user_id"), Some(&json!("u1")));
        assert!(m.keywords.contains(&"coffee".to_string()));
    }

    #[tokio::test]
    async fn metadata_override_wins() {
        let op = operation();
        let exp = Experience::new("User prefers tea").with_metadata(MEMORY_TYPE_KEY, json!("semantic"));
        let m = op.retain(&exp, &Context::default()).await.unwrap();
        assert_eq!(m.memory_type, MemoryType::Semantic);
        assert!(!m.metadata.contains_key(MEMORY_TYPE_KEY));
    }

    #[tokio::test]
    async fn unknown_override_is_invalid_input() {
        let op = operation();
        let exp = Experience::new("x").with_metadata(MEMORY_TYPE_KEY, json!("dream"));
        let err = op.retain(&exp, &Context::default()).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn empty_experience_is_rejected() {
        let op = operation();
        let err = op
            .retain(&Experience::new("   "), &Context::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn reflect_creates_lesson_with_provenance() {
        let op = operation();
        let memories = vec![
            Memory::new("Deploy failed on Friday.", MemoryType::Episodic),
            Memory::new("Rollback took an hour.", MemoryType::Episodic),
        ];
        let out = op
            .reflect(&memories, &Task::new("plan the release", ""), &Context::session("s1"))
            .await
            .unwrap();

        assert_eq!(out.updated.len(), 2);
        assert_eq!(out.created.len(), 1);
        let lesson = &out.created[0];
        assert_eq!(lesson.memory_type, MemoryType::Experience);
        assert!(lesson.tags.contains(&LESSON_TAG.to_string()));
        let derived = lesson.metadata.get(DERIVED_FROM_KEY).unwrap();
        assert_eq!(derived.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reflect_requires_memories_and_task() {
        let op = operation();
        let m = vec![Memory::new("a", MemoryType::Episodic)];
        assert!(op
            .reflect(&[], &Task::new("t", ""), &Context::default())
            .await
            .is_err());
        assert!(op
            .reflect(&m, &Task::new(" ", ""), &Context::default())
            .await
            .is_err());
    }
}

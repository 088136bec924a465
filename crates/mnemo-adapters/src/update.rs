//! Consolidation planning ("sleep update")
//!
//! A [`ConsolidationPolicy`] decides where a single memory belongs;
//! [`PolicyUpdate`] applies it to a batch of candidates and folds exact
//! duplicates together.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;
use crate::model::{Memory, MemoryLayer};
use crate::text;
use crate::traits::{Adapter, Availability, ConsolidationPlan, PlannedMemory, UpdateAdapter};

const NAME: &str = "update";

/// Pure placement rule. Returns the tier a memory should move to, or `None`
/// to leave it where it is.
pub trait ConsolidationPolicy: Send + Sync {
    fn target_layer(&self, memory: &Memory, now: DateTime<Utc>) -> Option<MemoryLayer>;
}

/// Promote on access count and age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessAgePolicy {
    /// FoA memories at least this old move to DA
    #[serde(with = "secs")]
    pub foa_promote_after: Duration,
    /// FoA memories retrieved at least this often move to DA
    pub foa_promote_retrievals: u64,
    /// Memories retrieved at least this often (and old enough) move to LTM
    pub ltm_promote_retrievals: u64,
    #[serde(with = "secs")]
    pub ltm_min_age: Duration,
}

impl Default for AccessAgePolicy {
    fn default() -> Self {
        Self {
            foa_promote_after: Duration::from_secs(15 * 60),
            foa_promote_retrievals: 2,
            ltm_promote_retrievals: 5,
            ltm_min_age: Duration::ZERO,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

fn age(memory: &Memory, now: DateTime<Utc>) -> Duration {
    (now - memory.timestamp).to_std().unwrap_or(Duration::ZERO)
}

impl ConsolidationPolicy for AccessAgePolicy {
    fn target_layer(&self, memory: &Memory, now: DateTime<Utc>) -> Option<MemoryLayer> {
        let age = age(memory, now);
        let target = match memory.layer {
            MemoryLayer::Ltm => return None,
            _ if memory.retrieval_count >= self.ltm_promote_retrievals
                && age >= self.ltm_min_age =>
            {
                MemoryLayer::Ltm
            }
            MemoryLayer::Foa
                if age >= self.foa_promote_after
                    || memory.retrieval_count >= self.foa_promote_retrievals =>
            {
                MemoryLayer::Da
            }
            _ => return None,
        };
        (target != memory.layer).then_some(target)
    }
}

/// Update adapter driven by a [`ConsolidationPolicy`].
pub struct PolicyUpdate<P> {
    policy: P,
    available: Availability,
}

impl<P: ConsolidationPolicy> PolicyUpdate<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            available: Availability::default(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Toggle liveness. While unavailable every call fails with `NotAvailable`.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }
}

/// Survivor of a duplicate group: most retrieved, then most durable tier,
/// then oldest, then smallest id.
fn pick_survivor(group: &[Memory]) -> usize {
    let mut best = 0;
    for (idx, m) in group.iter().enumerate().skip(1) {
        let b = &group[best];
        let better = m
            .retrieval_count
            .cmp(&b.retrieval_count)
            .then_with(|| m.layer.cmp(&b.layer))
            .then_with(|| b.timestamp.cmp(&m.timestamp))
            .then_with(|| b.id.cmp(&m.id));
        if better.is_gt() {
            best = idx;
        }
    }
    best
}

impl<P: ConsolidationPolicy> Adapter for PolicyUpdate<P> {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.available.get()
    }
}

#[async_trait]
impl<P: ConsolidationPolicy> UpdateAdapter for PolicyUpdate<P> {
    async fn consolidate(
        &self,
        candidates: Vec<Memory>,
        now: DateTime<Utc>,
    ) -> AdapterResult<ConsolidationPlan> {
        self.available.ensure(NAME)?;

        let mut groups: BTreeMap<String, Vec<Memory>> = BTreeMap::new();
        for memory in candidates {
            groups
                .entry(text::normalize(&memory.content))
                .or_default()
                .push(memory);
        }

        let mut plan = ConsolidationPlan::default();
        for (_, mut group) in groups {
            let survivor_idx = pick_survivor(&group);
            let mut survivor = group.swap_remove(survivor_idx);
            let previous_layer = survivor.layer;
            let merged = !group.is_empty();
            for other in &group {
                survivor.merge_from(other);
                survivor.retrieval_count += other.retrieval_count;
                plan.absorbed.push((other.id.clone(), other.layer));
            }

            if let Some(target) = self.policy.target_layer(&survivor, now) {
                survivor.layer = target;
            }
            if merged || survivor.layer != previous_layer {
                plan.entries.push(PlannedMemory {
                    memory: survivor,
                    previous_layer,
                });
            }
        }
        plan.entries.sort_by(|a, b| a.memory.id.cmp(&b.memory.id));
        plan.absorbed.sort();
        Ok(plan)
    }
}

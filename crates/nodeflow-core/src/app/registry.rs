//! StepRegistry - step ID → handler の対応表
//!
//! provider ごとに 1 つ。起動時に明示的な登録リストで埋め、以後は読み取り専用。
//!
//! # 使用例
//! ```ignore
//! let mut registry = StepRegistry::new("resource-pool");
//! registry.register(steps::APPLY_INSTANCES, Arc::new(ApplyInstancesStep::new(..)))?;
//!
//! let handler = registry.get(&StepId::from(steps::APPLY_INSTANCES));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::accessor::StepContext;
use crate::domain::StepId;
use crate::error::FlowError;

/// Executes one step of one task.
///
/// Reads `ctx.step()` params and `ctx.common()`, performs the side effect and
/// writes derived values back with `ctx.set_common*`. Common-parameter writes
/// are persisted whether or not the handler succeeds.
///
/// Handlers must tolerate being invoked again for a step that was Running when
/// the process died: persist remote order IDs (`ctx.save()`) before waiting on
/// them, and reuse them when present.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), FlowError>;
}

pub struct StepRegistry {
    provider: String,
    handlers: HashMap<StepId, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn register(
        &mut self,
        step_id: impl Into<StepId>,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), FlowError> {
        let step_id = step_id.into();
        if self.handlers.contains_key(&step_id) {
            return Err(FlowError::config(format!(
                "step '{step_id}' is already registered for provider '{}'",
                self.provider
            )));
        }
        self.handlers.insert(step_id, handler);
        Ok(())
    }

    pub fn get(&self, step_id: &StepId) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_id).cloned()
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.handlers.contains_key(step_id)
    }

    /// Registered step IDs, sorted.
    pub fn step_ids(&self) -> Vec<StepId> {
        let mut ids: Vec<StepId> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every ID in `step_ids` that has no handler.
    pub fn missing<'a>(&self, step_ids: impl IntoIterator<Item = &'a StepId>) -> Vec<StepId> {
        step_ids
            .into_iter()
            .filter(|id| !self.contains(id))
            .cloned()
            .collect()
    }
}

/// All providers' step tables, keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistries {
    tables: HashMap<String, Arc<StepRegistry>>,
}

impl ProviderRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry: Arc<StepRegistry>) -> Result<(), FlowError> {
        let provider = registry.provider().to_string();
        if self.tables.contains_key(&provider) {
            return Err(FlowError::config(format!(
                "provider '{provider}' is already registered"
            )));
        }
        self.tables.insert(provider, registry);
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Option<Arc<StepRegistry>> {
        self.tables.get(provider).cloned()
    }

    /// Resolve a handler. A miss is a wiring defect, not a task failure.
    pub fn handler(&self, provider: &str, step_id: &StepId) -> Result<Arc<dyn StepHandler>, FlowError> {
        let registry = self
            .tables
            .get(provider)
            .ok_or_else(|| FlowError::config(format!("no step table for provider '{provider}'")))?;
        registry.get(step_id).ok_or_else(|| {
            FlowError::config(format!(
                "step '{step_id}' is not registered for provider '{provider}'"
            ))
        })
    }
}

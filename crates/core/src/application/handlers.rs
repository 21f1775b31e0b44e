// Handler Registry - task type to handler, fixed at worker startup

use crate::domain::TaskType;
use crate::port::TaskHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable map of task handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn resolve(&self, task: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered task types, sorted
    pub fn task_types(&self) -> Vec<&TaskType> {
        let mut types: Vec<&TaskType> = self.handlers.keys().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }
}

/// Builder for `HandlerRegistry`
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for `task`; a later registration replaces an earlier one
    pub fn register(mut self, task: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

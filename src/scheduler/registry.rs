//! Registry of task types known to the engine.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{TaskDescriptor, TaskId};
use crate::tasks::TaskBody;

/// A descriptor paired with the body that runs it.
#[derive(Clone)]
pub struct RegisteredTask {
    pub descriptor: TaskDescriptor,
    pub body: Arc<dyn TaskBody>,
}

/// Task types registered at startup, kept in registration order.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, RegisteredTask>,
    order: Vec<TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type.
    ///
    /// Idempotent: a second registration for the same identifier is ignored
    /// and returns false.
    pub fn register(&mut self, descriptor: TaskDescriptor, body: Arc<dyn TaskBody>) -> bool {
        if self.tasks.contains_key(&descriptor.id) {
            tracing::debug!(task_id = %descriptor.id, "Task already registered, ignoring");
            return false;
        }
        let id = descriptor.id.clone();
        self.order.push(id.clone());
        self.tasks.insert(id, RegisteredTask { descriptor, body });
        true
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&RegisteredTask> {
        self.tasks.get(task_id)
    }

    pub fn descriptor(&self, task_id: &TaskId) -> Option<&TaskDescriptor> {
        self.tasks.get(task_id).map(|t| &t.descriptor)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Identifiers in registration order.
    pub fn ids(&self) -> &[TaskId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

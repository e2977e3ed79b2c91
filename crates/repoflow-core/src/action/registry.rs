//! Name → action lookup, read-only once the dispatcher is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::host::VcsHost;

use super::builtin::{
    CheckoutAction, MergePullRequestAction, PostCommentAction, PullRequestMetadataAction,
    RunCommandAction,
};
use super::Action;

#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in actions bound to `host`.
    pub fn with_builtins(host: Arc<dyn VcsHost>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CheckoutAction::new(host.clone())));
        registry.register(Arc::new(PostCommentAction::new(host.clone())));
        registry.register(Arc::new(RunCommandAction::new(host.clone())));
        registry.register(Arc::new(MergePullRequestAction::new(host.clone())));
        registry.register(Arc::new(PullRequestMetadataAction::new(host)));
        registry
    }

    /// Register an action under its own name, returning any action it replaced.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Option<Arc<dyn Action>> {
        self.actions.insert(action.name().to_string(), action)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

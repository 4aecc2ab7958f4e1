//! Named processors that descriptors refer to by route name.

use std::sync::Arc;

use dashmap::DashMap;

use crate::routing::Processor;

/// Processors available to deployment units, keyed by route name.
#[derive(Default)]
pub struct ProcessorCatalog {
    processors: DashMap<String, Arc<dyn Processor>>,
}

impl std::fmt::Debug for ProcessorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.processors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("ProcessorCatalog").field("routes", &names).finish()
    }
}

impl ProcessorCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `processor` available under `name`, replacing any previous one.
    /// Units already deployed keep the processor they were built with.
    pub fn register(&self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.insert(name.into(), processor);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }
}

//! Typed registry of collaborators handed to every task execution.
//!
//! The hosting application builds one [`ResolutionContext`] per job
//! invocation. Tasks look collaborators up by type, or by name and type when
//! several instances of the same type are registered (two regions, two
//! accounts). The context is frozen once built.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::TaskError;

type Entry = Arc<dyn Any + Send + Sync>;

/// Read-only collaborator registry shared across the steps of a job.
#[derive(Clone, Default)]
pub struct ResolutionContext {
    typed: HashMap<TypeId, Entry>,
    named: HashMap<(String, TypeId), Entry>,
}

impl ResolutionContext {
    pub fn builder() -> ResolutionContextBuilder {
        ResolutionContextBuilder::default()
    }

    /// A context with no collaborators, for jobs made only of self-contained tasks.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get<C: Any + Send + Sync>(&self) -> Option<Arc<C>> {
        self.typed
            .get(&TypeId::of::<C>())
            .and_then(|entry| entry.clone().downcast::<C>().ok())
    }

    pub fn get_named<C: Any + Send + Sync>(&self, name: &str) -> Option<Arc<C>> {
        self.named
            .get(&(name.to_string(), TypeId::of::<C>()))
            .and_then(|entry| entry.clone().downcast::<C>().ok())
    }

    /// Like [`get`](Self::get) but reports a missing collaborator as a system failure.
    pub fn require<C: Any + Send + Sync>(&self) -> Result<Arc<C>, TaskError> {
        self.get::<C>().ok_or_else(|| {
            TaskError::system(format!("no collaborator of type {} registered", type_name::<C>()))
        })
    }

    pub fn require_named<C: Any + Send + Sync>(&self, name: &str) -> Result<Arc<C>, TaskError> {
        self.get_named::<C>(name).ok_or_else(|| {
            TaskError::system(format!(
                "no collaborator '{name}' of type {} registered",
                type_name::<C>()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.typed.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.named.keys().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("ResolutionContext")
            .field("typed", &self.typed.len())
            .field("named", &names)
            .finish()
    }
}

/// Collects collaborators before freezing them into a [`ResolutionContext`].
#[derive(Default)]
pub struct ResolutionContextBuilder {
    inner: ResolutionContext,
}

impl ResolutionContextBuilder {
    /// Registers `value` under its type. A later registration of the same type wins.
    pub fn provide<C: Any + Send + Sync>(self, value: C) -> Self {
        self.provide_arc(Arc::new(value))
    }

    pub fn provide_arc<C: Any + Send + Sync>(mut self, value: Arc<C>) -> Self {
        self.inner.typed.insert(TypeId::of::<C>(), value);
        self
    }

    pub fn provide_named<C: Any + Send + Sync>(mut self, name: impl Into<String>, value: C) -> Self {
        self.inner
            .named
            .insert((name.into(), TypeId::of::<C>()), Arc::new(value));
        self
    }

    pub fn build(self) -> ResolutionContext {
        self.inner
    }
}

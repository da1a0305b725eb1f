//! HandlerRegistry - job type → handler.
//!
//! Built during initialization (mutable), used during runtime (immutable).
//! Handlers are either shared singletons or produced by a factory once per
//! dependency scope, i.e. once per dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::JobType;
use crate::ports::{ActivityHandler, DependencyResolver, DependencyScope};

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn ActivityHandler> + Send + Sync>;

#[derive(Clone)]
enum Registration {
    Singleton(Arc<dyn ActivityHandler>),
    Scoped(HandlerFactory),
}

/// Registration errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for job type '{0}' is already registered")]
    AlreadyRegistered(JobType),
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler instance shared by every dispatch.
    pub fn register(
        &mut self,
        job_type: impl Into<JobType>,
        handler: Arc<dyn ActivityHandler>,
    ) -> Result<(), RegistryError> {
        self.insert(job_type.into(), Registration::Singleton(handler))
    }

    /// A fresh handler per dispatch scope.
    pub fn register_scoped<F>(
        &mut self,
        job_type: impl Into<JobType>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Arc<dyn ActivityHandler> + Send + Sync + 'static,
    {
        self.insert(job_type.into(), Registration::Scoped(Arc::new(factory)))
    }

    fn insert(&mut self, job_type: JobType, registration: Registration) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&job_type) {
            return Err(RegistryError::AlreadyRegistered(job_type));
        }
        self.handlers.insert(job_type, registration);
        Ok(())
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl DependencyResolver for HandlerRegistry {
    fn begin_scope(&self) -> Box<dyn DependencyScope> {
        Box::new(RegistryScope {
            handlers: self.handlers.clone(),
            resolved: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn can_resolve(&self, job_type: &JobType) -> bool {
        self.handlers.contains_key(job_type)
    }
}

/// Scope handed out per dispatch. Scoped handlers are built on first resolve
/// and reused for the rest of the scope.
struct RegistryScope {
    handlers: HashMap<JobType, Registration>,
    resolved: std::sync::Mutex<HashMap<JobType, Arc<dyn ActivityHandler>>>,
}

impl DependencyScope for RegistryScope {
    fn resolve(&self, job_type: &JobType) -> Option<Arc<dyn ActivityHandler>> {
        match self.handlers.get(job_type)? {
            Registration::Singleton(handler) => Some(Arc::clone(handler)),
            Registration::Scoped(factory) => {
                let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
                let handler = resolved
                    .entry(job_type.clone())
                    .or_insert_with(|| factory());
                Some(Arc::clone(handler))
            }
        }
    }
}

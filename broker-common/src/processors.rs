//! Post-processor registry.
//!
//! A post-processor is a registered side-effect function keyed by feature
//! slug that turns model output into domain writes. The broker only owns the
//! contract: resolution by tag, tenant scoping, and the distinction between
//! "model succeeded" and "domain write failed". Processor internals belong to
//! the feature teams that register them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPool;
use thiserror::Error;

use crate::job::Job;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("post-processor failed: {0}")]
    Failed(String),
    #[error("domain write failed with: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not parse model output: {0}")]
    ParseOutput(#[from] serde_json::Error),
}

/// A side-effect function registered under a feature slug.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn apply(
        &self,
        pool: &PgPool,
        output: &str,
        context: &Map<String, Value>,
    ) -> Result<(), ProcessorError>;
}

/// Maps feature slugs to their registered processors. Built at startup;
/// tests construct their own with fakes.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn PostProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, feature_slug: &str, processor: Arc<dyn PostProcessor>) {
        self.processors.insert(feature_slug.to_owned(), processor);
    }

    /// `None` means no processor is registered for this tag; callers treat
    /// that as a no-op and complete normally.
    pub fn resolve(&self, feature_slug: &str) -> Option<Arc<dyn PostProcessor>> {
        self.processors.get(feature_slug).cloned()
    }
}

/// The context handed to a processor: the job's opaque context bag with
/// `tenant_id` overwritten from the job row. A tenant id smuggled in by the
/// submitter never reaches a processor.
pub fn tenant_scoped_context(job: &Job) -> Map<String, Value> {
    let mut context = job.context.0.clone();
    context.insert(
        "tenant_id".to_owned(),
        Value::String(job.tenant_id.to_string()),
    );
    if let Some(user_id) = job.user_id {
        context
            .entry("user_id".to_owned())
            .or_insert(Value::String(user_id.to_string()));
    }
    context
}

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::compiled::CompiledExpression;
use crate::error::Result;

/// Concurrent compile cache keyed by exact source text.
///
/// Entries are insert-once: when two threads race on the same source, both parse, the first
/// insert wins and every caller gets the same `Arc`.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: DashMap<String, Arc<CompiledExpression>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, source: &str) -> Result<Arc<CompiledExpression>> {
        if let Some(hit) = self.entries.get(source) {
            return Ok(Arc::clone(hit.value()));
        }
        let compiled = Arc::new(CompiledExpression::parse(source)?);
        let entry = self
            .entries
            .entry(source.to_string())
            .or_insert_with(|| {
                tracing::trace!(source, "expression compiled");
                compiled
            });
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, source: &str) -> Option<Arc<CompiledExpression>> {
        self.entries.get(source).map(|hit| Arc::clone(hit.value()))
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static GLOBAL: OnceLock<ExpressionCache> = OnceLock::new();

/// Process-wide cache shared by every compiled document.
pub fn global() -> &'static ExpressionCache {
    GLOBAL.get_or_init(ExpressionCache::new)
}

/// Compile through the process-wide cache.
pub fn compile(source: &str) -> Result<Arc<CompiledExpression>> {
    global().compile(source)
}

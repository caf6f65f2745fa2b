//! Dispatch-time command interception
//!
//! Every resolved command runs through an [`InterceptorChain`] before it
//! executes. Interceptors are synchronous and must not perform I/O.

use crate::blacklist::Action;
use std::sync::Arc;

/// Outcome of an interception check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Cancel the action without a reply
    Deny,
}

/// A check run on every command dispatch
pub trait CommandInterceptor: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Decide whether the action may proceed
    fn intercept(&self, action: &Action) -> Verdict;
}

/// Ordered list of interceptors; the first denial wins
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn CommandInterceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the end of the chain
    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run the chain, stopping at the first interceptor that denies
    #[must_use]
    pub fn check(&self, action: &Action) -> Verdict {
        if self
            .interceptors
            .iter()
            .any(|interceptor| interceptor.intercept(action) == Verdict::Deny)
        {
            Verdict::Deny
        } else {
            Verdict::Allow
        }
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|interceptor| interceptor.name()))
            .finish()
    }
}

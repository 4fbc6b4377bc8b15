//! "First success, else aggregate errors" over an ordered list of strategies.
//!
//! Used for every fallback chain in the crate: network channels (mirror →
//! direct → proxy), proxy endpoints, LaTeX archive candidates, and document
//! formats (HTML → LaTeX). Strategies are lazily polled futures, so a later
//! strategy costs nothing until every earlier one has been given up on.

use crate::error::Arxiv2MdError;
use futures::future::BoxFuture;
use std::future::Future;
use tracing::debug;

/// Result of one strategy.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The strategy produced a value; stop here.
    Success(T),
    /// The input is not something this strategy handles; try the next one.
    NotApplicable,
    /// The strategy applied but failed. Fatal errors (see
    /// [`Arxiv2MdError::is_fatal`]) stop the chain, anything else falls through.
    Failed(Arxiv2MdError),
}

impl<T> From<Result<Option<T>, Arxiv2MdError>> for Outcome<T> {
    fn from(result: Result<Option<T>, Arxiv2MdError>) -> Self {
        match result {
            Ok(Some(value)) => Outcome::Success(value),
            Ok(None) => Outcome::NotApplicable,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// A named, not-yet-started strategy.
pub struct Strategy<'a, T> {
    label: String,
    run: BoxFuture<'a, Outcome<T>>,
}

impl<'a, T> Strategy<'a, T> {
    pub fn new(label: impl Into<String>, run: impl Future<Output = Outcome<T>> + Send + 'a) -> Self {
        Self {
            label: label.into(),
            run: Box::pin(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// One strategy that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub label: String,
    /// `None` when the strategy was not applicable.
    pub detail: Option<String>,
}

/// Every strategy was tried and none succeeded.
#[derive(Debug, Default)]
pub struct Exhausted {
    pub attempts: Vec<Attempt>,
    /// Errors in attempt order, for callers that want the typed values.
    pub errors: Vec<Arxiv2MdError>,
}

impl Exhausted {
    /// `"label: detail; label: detail"` over the attempts that failed.
    ///
    /// Not-applicable strategies are listed only when nothing failed, so the
    /// message never comes out empty.
    pub fn summary(&self) -> String {
        let failed: Vec<String> = self
            .attempts
            .iter()
            .filter_map(|a| a.detail.as_ref().map(|d| format!("{}: {}", a.label, d)))
            .collect();
        if !failed.is_empty() {
            return failed.join("; ");
        }
        self.attempts
            .iter()
            .map(|a| format!("{}: not applicable", a.label))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// `true` when at least one strategy actually failed.
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Why [`first_success`] returned no value.
#[derive(Debug)]
pub enum FallbackError {
    /// A fatal error stopped the chain early.
    Fatal(Arxiv2MdError),
    /// Every strategy was tried.
    Exhausted(Exhausted),
}

/// Run `strategies` strictly in order and return the first success along
/// with the label of the strategy that produced it.
pub async fn first_success<'a, T>(
    strategies: Vec<Strategy<'a, T>>,
) -> Result<(String, T), FallbackError> {
    let mut exhausted = Exhausted::default();
    for Strategy { label, run } in strategies {
        match run.await {
            Outcome::Success(value) => return Ok((label, value)),
            Outcome::NotApplicable => {
                debug!("{}: not applicable", label);
                exhausted.attempts.push(Attempt { label, detail: None });
            }
            Outcome::Failed(e) if e.is_fatal() => return Err(FallbackError::Fatal(e)),
            Outcome::Failed(e) => {
                debug!("{}: {}", label, e);
                exhausted.attempts.push(Attempt {
                    label,
                    detail: Some(e.to_string()),
                });
                exhausted.errors.push(e);
            }
        }
    }
    Err(FallbackError::Exhausted(exhausted))
}

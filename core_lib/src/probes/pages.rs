//! Per-page error tracking for instrumented UI pages

use crate::health::{CheckCategory, CheckSpec, Probe, ProbeOutput};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub const PAGES_CHECK_NAME: &str = "pages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageErrorKind {
    /// Recorded explicitly by page code.
    Reported,
    /// Raised by a monitored page body.
    Exception,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageError {
    pub page: String,
    pub error: String,
    pub kind: PageErrorKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PageErrorTracker {
    errors: Arc<RwLock<BTreeMap<String, Vec<PageError>>>>,
}

impl PageErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, page: &str, error: impl Into<String>) {
        self.push(page, error.into(), PageErrorKind::Reported);
    }

    /// Runs a page body. Exceptions from earlier renders of the page are
    /// dropped first; a failure is recorded and handed back to the caller.
    pub fn monitor<T, F>(&self, page: &str, render: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        {
            let mut errors = self.errors.write();
            if let Some(page_errors) = errors.get_mut(page) {
                page_errors.retain(|e| e.kind == PageErrorKind::Reported);
                if page_errors.is_empty() {
                    errors.remove(page);
                }
            }
        }

        render().map_err(|err| {
            self.push(page, format!("{:#}", err), PageErrorKind::Exception);
            err
        })
    }

    fn push(&self, page: &str, error: String, kind: PageErrorKind) {
        warn!("Page '{}' error: {}", page, error);
        self.errors
            .write()
            .entry(page.to_string())
            .or_default()
            .push(PageError {
                page: page.to_string(),
                error,
                kind,
                timestamp: Utc::now(),
            });
    }

    /// Pages with at least one error, ordered by page name.
    pub fn errors(&self) -> BTreeMap<String, Vec<PageError>> {
        self.errors.read().clone()
    }

    pub fn errors_for(&self, page: &str) -> Vec<PageError> {
        self.errors.read().get(page).cloned().unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.errors.read().values().map(Vec::len).sum()
    }

    /// Clears one page, or every page when `page` is `None`.
    pub fn clear(&self, page: Option<&str>) {
        let mut errors = self.errors.write();
        match page {
            Some(page) => {
                errors.remove(page);
            }
            None => errors.clear(),
        }
    }

    /// Fails while any page has recorded errors.
    pub fn probe(&self) -> Probe {
        let tracker = self.clone();
        Probe::from_fn(move |_| {
            let errors = tracker.errors();
            let count: usize = errors.values().map(Vec::len).sum();
            let value = serde_json::json!({
                "error_count": count,
                "pages": errors.keys().collect::<Vec<_>>(),
            });

            if count == 0 {
                Ok(ProbeOutput::healthy("All pages functioning normally").with_value(value))
            } else {
                let pages: Vec<&str> = errors.keys().map(String::as_str).collect();
                Ok(ProbeOutput::unhealthy(format!("{} errors on pages: {}", count, pages.join(", "))).with_value(value))
            }
        })
    }

    pub fn spec(&self) -> CheckSpec {
        CheckSpec::new(PAGES_CHECK_NAME, self.probe()).in_category(CheckCategory::Page)
    }
}

use crate::bundle::{Eid, MetaBundle};
use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::debug;

/// Failure raised by a caller supplied selector. It aborts the scan and is
/// handed back to the caller unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Selector failed: {0}")]
pub struct SelectorError(pub String);

pub trait BundleSelector {
    /// Maximum number of accepted entries, 0 for no limit.
    fn limit(&self) -> usize {
        0
    }

    fn should_add(&self, meta: &MetaBundle) -> Result<bool, SelectorError>;
}

impl<F> BundleSelector for F
where
    F: Fn(&MetaBundle) -> Result<bool, SelectorError>,
{
    fn should_add(&self, meta: &MetaBundle) -> Result<bool, SelectorError> {
        self(meta)
    }
}

/// Accepts everything, up to `limit` entries.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllSelector {
    pub limit: usize,
}

impl AllSelector {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl BundleSelector for AllSelector {
    fn limit(&self) -> usize {
        self.limit
    }

    fn should_add(&self, _meta: &MetaBundle) -> Result<bool, SelectorError> {
        Ok(true)
    }
}

/// Bundles addressed to one endpoint.
#[derive(Clone, Debug)]
pub struct DestinationSelector {
    pub destination: Eid,
    pub limit: usize,
}

impl DestinationSelector {
    pub fn new(destination: impl Into<Eid>, limit: usize) -> Self {
        Self {
            destination: destination.into(),
            limit,
        }
    }
}

impl BundleSelector for DestinationSelector {
    fn limit(&self) -> usize {
        self.limit
    }

    fn should_add(&self, meta: &MetaBundle) -> Result<bool, SelectorError> {
        Ok(meta.destination() == &self.destination)
    }
}

/// Receives the entries accepted by a selection.
pub trait ResultSink {
    fn put(&mut self, meta: MetaBundle);
}

impl ResultSink for Vec<MetaBundle> {
    fn put(&mut self, meta: MetaBundle) {
        self.push(meta);
    }
}

impl ResultSink for VecDeque<MetaBundle> {
    fn put(&mut self, meta: MetaBundle) {
        self.push_back(meta);
    }
}

/// Hands results to a consumer on another thread.
impl ResultSink for Sender<MetaBundle> {
    fn put(&mut self, meta: MetaBundle) {
        if self.send(meta).is_err() {
            debug!("Result receiver dropped, discarding selection entry");
        }
    }
}

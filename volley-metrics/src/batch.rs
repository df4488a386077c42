use std::sync::Arc;

use crate::kind::Sample;
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;
use crate::{Error, Result};

const DEFAULT_CAPACITY: usize = 256;

/// Per-worker sample buffer.
///
/// Samples become visible to snapshots only when the batch is flushed, and a flush is applied
/// atomically with respect to [`Registry::snapshot`]. The buffer flushes itself when full and
/// when dropped.
#[derive(Debug)]
pub struct Batch {
    registry: Arc<Registry>,
    pending: Vec<(MetricId, TagSet, Sample)>,
    capacity: usize,
}

impl Batch {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_capacity(registry, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(registry: Arc<Registry>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            registry,
            pending: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push(&mut self, metric: MetricId, tags: TagSet, sample: Sample) -> Result<()> {
        self.pending.push((metric, tags, sample));
        if self.pending.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Applies every buffered sample. All samples are attempted; the first error is returned.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut first_err: Option<Error> = None;
        {
            let _shared = self.registry.shared_gate();
            for (metric, tags, sample) in self.pending.drain(..) {
                if let Err(err) = self.registry.apply(metric, &tags, sample)
                    && first_err.is_none()
                {
                    first_err = Some(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

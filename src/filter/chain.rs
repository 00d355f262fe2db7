//! Filter chain
//!
//! An ordered list of filters applied back to back. An empty chain passes
//! data through untouched. The output source rebuilds the chain whenever its
//! input format changes.

use std::sync::Arc;

use crate::audio::format::AudioFormat;
use crate::error::Result;
use crate::filter::{Filter, PreparedFilter};

/// Factory for a whole chain of filters.
#[derive(Clone, Default)]
pub struct PreparedFilterChain {
    prepared: Vec<Arc<dyn PreparedFilter>>,
}

impl PreparedFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter factory to the end of the chain.
    pub fn append(&mut self, filter: Arc<dyn PreparedFilter>) {
        self.prepared.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }

    /// Instantiate the chain for a concrete input format. Each filter's
    /// output format feeds the next filter.
    pub fn open(&self, format: AudioFormat) -> Result<FilterChain> {
        let mut filters = Vec::with_capacity(self.prepared.len());
        let mut current = format;
        for prepared in &self.prepared {
            let filter = prepared.open(current)?;
            current = filter.out_format();
            filters.push(filter);
        }
        Ok(FilterChain {
            filters,
            out_format: current,
        })
    }
}

/// An instantiated chain of filters.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    out_format: AudioFormat,
}

impl FilterChain {
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for FilterChain {
    fn out_format(&self) -> AudioFormat {
        self.out_format
    }

    fn filter(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        let mut data = src.to_vec();
        for filter in &mut self.filters {
            data = filter.filter(&data)?;
        }
        Ok(data)
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

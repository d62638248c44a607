//! Search routing between the accelerated and portable paths.

use crate::pool::accelerator::NativeAccelerator;
use crate::pool::config::AcceleratorConfig;
use crate::pool::deriver::CandidateSource;
use crate::pool::matcher::VanityPattern;
use crate::pool::search::{PortableSearch, Searcher};
use crate::pool::types::{SearchBudget, SearchOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Routes searches to the accelerator when it came up at startup, otherwise
/// to the portable loop.
#[derive(Clone, Default)]
pub struct SearchEngine {
    accelerator: Option<Arc<NativeAccelerator>>,
    portable: PortableSearch,
}

impl SearchEngine {
    /// Probe the accelerator once. A failure disables it for this engine's
    /// lifetime.
    pub fn detect(config: &AcceleratorConfig) -> Self {
        match NativeAccelerator::detect(config) {
            Ok(accelerator) => Self::with_accelerator(accelerator),
            Err(e) => {
                info!("Accelerated search unavailable ({}); using portable search loop", e);
                Self::portable()
            }
        }
    }

    /// Engine without an accelerator.
    pub fn portable() -> Self {
        Self::default()
    }

    pub fn with_accelerator(accelerator: NativeAccelerator) -> Self {
        Self {
            accelerator: Some(Arc::new(accelerator)),
            portable: PortableSearch,
        }
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerator.is_some()
    }
}

#[async_trait]
impl Searcher for SearchEngine {
    async fn search(
        &self,
        source: Arc<dyn CandidateSource>,
        pattern: &VanityPattern,
        budget: &SearchBudget,
    ) -> SearchOutcome {
        if let Some(accelerator) = &self.accelerator {
            match accelerator.search(Arc::clone(&source), pattern, budget).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    error!("Accelerated search task failed: {}; falling back to portable loop", e);
                }
            }
        }

        self.portable.search(source, pattern, budget).await
    }
}

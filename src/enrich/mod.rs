//! Enrichment chain: optional post-extraction passes over the document tree.
//!
//! Each stage runs on a working copy of the tree. The copy replaces the tree
//! only when the stage returns `Ok`; on error (or panic) the tree is left as
//! it was and `"<stage> omitted: <reason>"` is appended to its warnings. A
//! failing stage therefore never fails the document, and later stages still
//! run.
//!
//! Stages run in a fixed order: code, formula, picture classes, picture
//! descriptions, then anything appended with [`EnrichmentChain::push`].

pub mod code;
pub mod formula;
pub mod picture;

use crate::backend::vlm::VisionClient;
use crate::config::DocumentConfig;
use crate::document::DocumentTree;
use crate::error::EnrichmentError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// One enrichment stage.
///
/// `enrich` mutates the tree in place and returns how many elements it
/// changed (for logging). It must leave the tree consistent even when it
/// returns an error part-way; the chain discards the copy in that case.
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    fn enrich<'a>(
        &'a self,
        doc: &'a mut DocumentTree,
    ) -> BoxFuture<'a, Result<usize, EnrichmentError>>;
}

/// Ordered list of enabled stages.
#[derive(Clone, Default)]
pub struct EnrichmentChain {
    stages: Vec<Arc<dyn Enricher>>,
}

impl EnrichmentChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stages `config` enables. Picture descriptions need `vision`; the
    /// factory resolves one whenever that stage is on.
    pub fn from_config(config: &DocumentConfig, vision: Option<&VisionClient>) -> Self {
        let mut chain = Self::new();
        if config.enrich_code {
            chain.push(Arc::new(code::CodeEnricher));
        }
        if config.enrich_formula {
            chain.push(Arc::new(formula::FormulaEnricher));
        }
        if config.enrich_picture_classes {
            chain.push(Arc::new(picture::PictureClassifier));
        }
        if config.enrich_picture_description {
            if let Some(client) = vision {
                chain.push(Arc::new(picture::PictureDescriber::new(client.clone())));
            }
        }
        chain
    }

    /// Append a stage after the built-in ones.
    pub fn push(&mut self, stage: Arc<dyn Enricher>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every stage in order.
    pub async fn run(&self, mut doc: DocumentTree) -> DocumentTree {
        for stage in &self.stages {
            let mut working = doc.clone();
            let outcome = AssertUnwindSafe(stage.enrich(&mut working))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(EnrichmentError::new(stage.name(), "stage panicked")));

            match outcome {
                Ok(changed) => {
                    debug!("Enrichment '{}' changed {} elements", stage.name(), changed);
                    doc = working;
                }
                Err(e) => {
                    warn!("{}: {}", doc.source.file_name, e);
                    doc.warnings.push(e.to_string());
                }
            }
        }
        doc
    }
}

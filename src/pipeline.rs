//! Audit Pipeline - Single Entry Point
//!
//! Compile once, classify many. The schema is resolved before any image is
//! touched; after that every eligible image yields a report, conforming or
//! not, and nothing short of a retrieval failure stops the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{ImageRecord, ImageRetrievalError, ImageSource, PropertyBag};
use crate::report::ImageReport;
use crate::schema::{Schema, SchemaCompilationError, SchemaRegistry};
use crate::validation::{Classifier, ValidationOutcome};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Schema compilation failed: {0}")]
    SchemaCompilation(#[from] SchemaCompilationError),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Image retrieval failed: {0}")]
    ImageRetrieval(#[from] ImageRetrievalError),
}

/// Which images a run looks at.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    /// Only images with exactly this visibility, when set.
    pub visibility: Option<String>,
}

impl ImageFilter {
    pub fn admits(&self, image: &ImageRecord) -> bool {
        match &self.visibility {
            Some(wanted) => image.visibility.as_deref() == Some(wanted.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditSummary {
    pub run_id: Option<Uuid>,
    pub listed: usize,
    pub filtered: usize,
    pub ineligible: usize,
    pub conforming: usize,
    pub non_conforming: usize,
}

impl AuditSummary {
    pub fn all_conforming(&self) -> bool {
        self.non_conforming == 0
    }
}

/// The audit pipeline - single entry point for classifying a catalog
pub struct AuditPipeline<'s> {
    classifier: Classifier<'s>,
    filter: ImageFilter,
}

impl<'s> AuditPipeline<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            classifier: Classifier::new(schema),
            filter: ImageFilter::default(),
        }
    }

    /// Resolve `version` in the registry; an unknown version is fatal.
    pub fn from_registry(registry: &'s SchemaRegistry, version: &str) -> Result<Self, AuditError> {
        let schema = registry
            .get(version)
            .ok_or_else(|| AuditError::SchemaNotFound(version.to_string()))?;
        Ok(Self::new(schema))
    }

    pub fn with_filter(mut self, filter: ImageFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn schema(&self) -> &Schema {
        self.classifier.schema()
    }

    /// Classify a single bag. Eligibility is the caller's business here.
    pub fn validate_properties(&self, bag: &PropertyBag) -> ValidationOutcome {
        self.classifier.classify(bag)
    }

    /// Report for one image, or `None` when it is not subject to the schema.
    pub fn audit_image(&self, image: &ImageRecord) -> Option<ImageReport> {
        if !image.is_eligible() {
            tracing::debug!(image = %image.id, "no namespaced properties, skipping");
            return None;
        }

        let outcome = self.classifier.classify_with(&image.properties, &image.mistyped);
        tracing::debug!(
            image = %image.id,
            conforming = outcome.is_conforming(),
            defects = outcome.defects().len(),
            "classified image"
        );
        Some(ImageReport::new(image, outcome))
    }

    /// Run over every image the source yields, handing each report to `sink`
    /// in source order as soon as it is produced.
    pub fn run<S, F>(&self, source: &S, mut sink: F) -> Result<AuditSummary, AuditError>
    where
        S: ImageSource + ?Sized,
        F: FnMut(&ImageReport),
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("audit", %run_id, schema = %self.schema().version());
        let _guard = span.enter();

        let images = source.images()?;
        let mut summary = AuditSummary {
            run_id: Some(run_id),
            listed: images.len(),
            ..Default::default()
        };

        for image in &images {
            if !self.filter.admits(image) {
                summary.filtered += 1;
                continue;
            }

            match self.audit_image(image) {
                None => summary.ineligible += 1,
                Some(report) => {
                    if report.outcome.is_conforming() {
                        summary.conforming += 1;
                    } else {
                        summary.non_conforming += 1;
                    }
                    sink(&report);
                }
            }
        }

        tracing::info!(
            listed = summary.listed,
            filtered = summary.filtered,
            ineligible = summary.ineligible,
            conforming = summary.conforming,
            non_conforming = summary.non_conforming,
            "audit complete"
        );

        Ok(summary)
    }
}

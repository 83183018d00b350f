//! Wiring of the stages: normalize, reconcile, bucketize, filter, aggregate.
//!
//! A [`Pipeline`] owns the configuration and the media-code master and never
//! changes after construction. [`Pipeline::prepare`] turns one upload into an
//! immutable [`Dataset`]; filters and aggregations borrow it through a
//! [`View`], so recomputing with different settings never touches the
//! prepared rows.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;

use crate::{
    aggregate::{self, Aggregation, AggregationRequest},
    band::Bands,
    config::Config,
    filter::FilterSpec,
    reference::{ReferenceEntry, ReferenceTable},
    schema::{self, Field, FieldSet, Record, Schema},
    sheet::{LoadOptions, RawTable},
};

/// A record joined to the media-code master, with its bands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: Record,
    pub media_name: Option<String>,
    pub category: Option<String>,
    pub bands: Bands,
}

impl EnrichedRecord {
    pub fn new(record: Record, entry: Option<&ReferenceEntry>) -> Self {
        let bands = Bands::of(&record);
        Self {
            media_name: entry.and_then(|e| e.name.clone()),
            category: entry.and_then(|e| e.category.clone()),
            bands,
            record,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub schema: Schema,
    pub records: Vec<EnrichedRecord>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn fields(&self) -> &FieldSet {
        &self.schema.fields
    }

    pub fn view(&self) -> View<'_> {
        View {
            schema: &self.schema,
            rows: self.records.iter().collect(),
        }
    }
}

/// A borrowed subset of a [`Dataset`], in dataset order.
#[derive(Debug, Clone)]
pub struct View<'a> {
    schema: &'a Schema,
    rows: Vec<&'a EnrichedRecord>,
}

impl<'a> View<'a> {
    pub(crate) fn with_rows(&self, rows: Vec<&'a EnrichedRecord>) -> View<'a> {
        View {
            schema: self.schema,
            rows,
        }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn fields(&self) -> &'a FieldSet {
        &self.schema.fields
    }

    pub fn rows(&self) -> &[&'a EnrichedRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn filter(&self, spec: &FilterSpec) -> View<'a> {
        spec.apply(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub row_count: usize,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    reference: ReferenceTable,
}

impl Pipeline {
    pub fn new(config: Config, reference: ReferenceTable) -> Self {
        Self { config, reference }
    }

    /// Reads the media-code master once; every later upload reuses it.
    pub fn load(config: Config, reference_path: &Path, options: &LoadOptions<'_>) -> Result<Self> {
        let reference = ReferenceTable::load(reference_path, &config.reference, options)?;
        info!(
            "Loaded {} media code(s) from {:?}",
            reference.len(),
            reference_path
        );
        Ok(Self::new(config, reference))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reference(&self) -> &ReferenceTable {
        &self.reference
    }

    pub fn prepare(&self, raw: &RawTable) -> Result<Dataset> {
        let normalized = schema::normalize(raw, &self.config).context("Normalizing upload")?;
        if !normalized.schema.has(Field::MediaCode) {
            debug!(
                "No '{}' column; media name and category are left empty",
                self.config.columns.media_code
            );
        }
        let records = self.reference.reconcile(normalized.records);
        Ok(Dataset {
            schema: normalized.schema,
            records,
        })
    }

    /// One full recomputation over a fresh upload.
    pub fn run(
        &self,
        raw: &RawTable,
        filter: &FilterSpec,
        request: &AggregationRequest,
    ) -> Result<PipelineOutput> {
        let dataset = self.prepare(raw)?;
        let view = dataset.view().filter(filter);
        let aggregation = aggregate::aggregate(&view, request)?;
        Ok(PipelineOutput {
            row_count: view.len(),
            aggregation,
        })
    }
}

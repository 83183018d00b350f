//! Media-code master: wide-to-long reshaping and the left join.
//!
//! The master has one row per media with an identity column, a category
//! column and any number of code columns. It is melted column-major into
//! (name, category, code) entries, so every code of the first code column
//! precedes every code of the second. When a code occurs more than once the
//! earliest entry in that order wins.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::{
    config::ReferenceLayout,
    pipeline::EnrichedRecord,
    schema::{Record, clean_header},
    sheet::{LoadOptions, RawTable},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub name: Option<String>,
    pub category: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: Vec<ReferenceEntry>,
    lookup: HashMap<String, usize>,
}

impl ReferenceTable {
    pub fn load(path: &Path, layout: &ReferenceLayout, options: &LoadOptions<'_>) -> Result<Self> {
        let raw = RawTable::load(path, options)
            .with_context(|| format!("Loading media-code master {path:?}"))?;
        Self::from_wide(&raw, layout)
            .with_context(|| format!("Reading media-code master {path:?}"))
    }

    pub fn from_wide(raw: &RawTable, layout: &ReferenceLayout) -> Result<Self> {
        let headers = raw
            .headers
            .iter()
            .map(|header| clean_header(header))
            .collect::<Vec<_>>();
        let identity = headers
            .iter()
            .position(|header| layout.is_identity(header))
            .ok_or_else(|| anyhow!("Missing identity column '{}'", layout.identity))?;
        let category = headers
            .iter()
            .position(|header| header == &layout.category)
            .ok_or_else(|| anyhow!("Missing category column '{}'", layout.category))?;
        let code_columns = (0..headers.len())
            .filter(|idx| *idx != identity && *idx != category)
            .collect::<Vec<_>>();
        if code_columns.is_empty() {
            warn!("Media-code master has no code columns; no record will match");
        }
        debug!(
            "Code columns: {:?}",
            code_columns
                .iter()
                .map(|idx| headers[*idx].as_str())
                .collect::<Vec<_>>()
        );

        let mut entries = Vec::new();
        for column in &code_columns {
            for row in 0..raw.len() {
                let Some(code) = raw.cell(row, *column).to_code() else {
                    continue;
                };
                entries.push(ReferenceEntry {
                    name: raw.cell(row, identity).to_text(),
                    category: raw.cell(row, category).to_text(),
                    code,
                });
            }
        }
        Ok(Self::from_entries(entries))
    }

    /// Builds the lookup over entries already in long order.
    pub fn from_entries(entries: Vec<ReferenceEntry>) -> Self {
        let mut lookup = HashMap::with_capacity(entries.len());
        let mut shadowed = 0usize;
        for (idx, entry) in entries.iter().enumerate() {
            if lookup.contains_key(&entry.code) {
                shadowed += 1;
            } else {
                lookup.insert(entry.code.clone(), idx);
            }
        }
        if shadowed > 0 {
            warn!(
                "{shadowed} duplicate media code(s) in the master; the first entry per code is used"
            );
        }
        Self { entries, lookup }
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, code: &str) -> Option<&ReferenceEntry> {
        self.lookup.get(code).map(|idx| &self.entries[*idx])
    }

    /// Left join: every record comes back exactly once, in input order.
    pub fn reconcile(&self, records: Vec<Record>) -> Vec<EnrichedRecord> {
        let total = records.len();
        let mut matched = 0usize;
        let enriched = records
            .into_iter()
            .map(|record| {
                let entry = record.media_code.as_deref().and_then(|code| self.lookup(code));
                if entry.is_some() {
                    matched += 1;
                }
                EnrichedRecord::new(record, entry)
            })
            .collect();
        info!("Matched {matched} of {total} record(s) against the media-code master");
        enriched
    }
}

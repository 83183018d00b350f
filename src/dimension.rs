//! The categorical axes that filters, charts and pivots work over.

use std::{borrow::Cow, cmp::Ordering, collections::HashMap, fmt, str::FromStr};

use clap::ValueEnum;
use serde::Serialize;

use crate::{
    band::BandRule,
    data::format_number,
    error::PipelineError,
    pipeline::EnrichedRecord,
    schema::{Field, FieldSet},
};

/// Group label for records with no value on a dimension.
pub const BLANK: &str = "(blank)";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Dimension {
    Gender,
    AgeBand,
    IncomeBand,
    Prefecture,
    Purpose,
    LoanBand,
    FamilyStructure,
    Children,
    MortgageBand,
    EmploymentStatus,
    YearsEmployedBand,
    OtherLoans,
    MediaName,
    Category,
    ApprovalStatus,
}

impl Dimension {
    /// Chart order of the dashboard: the category axis is filter-only.
    pub const CHARTS: [Dimension; 14] = [
        Dimension::Gender,
        Dimension::AgeBand,
        Dimension::IncomeBand,
        Dimension::Prefecture,
        Dimension::Purpose,
        Dimension::LoanBand,
        Dimension::FamilyStructure,
        Dimension::Children,
        Dimension::MortgageBand,
        Dimension::EmploymentStatus,
        Dimension::YearsEmployedBand,
        Dimension::OtherLoans,
        Dimension::MediaName,
        Dimension::ApprovalStatus,
    ];

    /// Sidebar filters, in the order they are applied.
    pub const FILTERS: [Dimension; 4] = [
        Dimension::Category,
        Dimension::MediaName,
        Dimension::ApprovalStatus,
        Dimension::Gender,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Dimension::Gender => "gender",
            Dimension::AgeBand => "age_band",
            Dimension::IncomeBand => "income_band",
            Dimension::Prefecture => "prefecture",
            Dimension::Purpose => "purpose",
            Dimension::LoanBand => "loan_band",
            Dimension::FamilyStructure => "family_structure",
            Dimension::Children => "children",
            Dimension::MortgageBand => "mortgage_band",
            Dimension::EmploymentStatus => "employment_status",
            Dimension::YearsEmployedBand => "years_employed_band",
            Dimension::OtherLoans => "other_loans",
            Dimension::MediaName => "media_name",
            Dimension::Category => "category",
            Dimension::ApprovalStatus => "approval_status",
        }
    }

    pub fn band_rule(self) -> Option<BandRule> {
        match self {
            Dimension::AgeBand => Some(BandRule::Age),
            Dimension::IncomeBand => Some(BandRule::Income),
            Dimension::LoanBand => Some(BandRule::LoanAmount),
            Dimension::MortgageBand => Some(BandRule::MortgagePayment),
            Dimension::YearsEmployedBand => Some(BandRule::YearsEmployed),
            _ => None,
        }
    }

    /// The upload column this dimension is derived from. `None` means the
    /// dimension always exists: approval status defaults to `NULL`, and
    /// media name and category are synthesized as null without a code column.
    pub fn source(self) -> Option<Field> {
        if let Some(rule) = self.band_rule() {
            return Some(rule.source());
        }
        match self {
            Dimension::Gender => Some(Field::Gender),
            Dimension::Prefecture => Some(Field::Prefecture),
            Dimension::Purpose => Some(Field::Purpose),
            Dimension::FamilyStructure => Some(Field::FamilyStructure),
            Dimension::Children => Some(Field::Children),
            Dimension::EmploymentStatus => Some(Field::EmploymentStatus),
            Dimension::OtherLoans => Some(Field::OtherLoans),
            _ => None,
        }
    }

    pub fn is_available(self, fields: &FieldSet) -> bool {
        self.source().is_none_or(|field| fields.contains(field))
    }

    pub fn available(fields: &FieldSet) -> Vec<Dimension> {
        Self::value_variants()
            .iter()
            .copied()
            .filter(|dimension| dimension.is_available(fields))
            .collect()
    }

    pub fn ensure_available(self, fields: &FieldSet) -> Result<(), PipelineError> {
        if self.is_available(fields) {
            Ok(())
        } else {
            Err(PipelineError::DimensionUnavailable {
                requested: self.key().to_string(),
                available: Self::available(fields)
                    .into_iter()
                    .map(|dimension| dimension.key().to_string())
                    .collect(),
            })
        }
    }

    pub fn value(self, row: &EnrichedRecord) -> Option<Cow<'_, str>> {
        if let Some(rule) = self.band_rule() {
            return Some(Cow::Borrowed(row.bands.get(rule)));
        }
        let record = &row.record;
        let text = match self {
            Dimension::Gender => record.gender.label(),
            Dimension::Prefecture => record.prefecture.as_deref(),
            Dimension::Purpose => record.purpose.as_deref(),
            Dimension::FamilyStructure => record.family_structure.as_deref(),
            Dimension::Children => record.children.as_deref(),
            Dimension::EmploymentStatus => record.employment_status.as_deref(),
            Dimension::OtherLoans => {
                return record.other_loans.map(|count| Cow::Owned(format_number(count)));
            }
            Dimension::MediaName => row.media_name.as_deref(),
            Dimension::Category => row.category.as_deref(),
            Dimension::ApprovalStatus => Some(record.approval_status.as_str()),
            _ => None,
        };
        text.map(Cow::Borrowed)
    }

    /// Like [`Dimension::value`] with nulls folded into [`BLANK`].
    pub fn group_label(self, row: &EnrichedRecord) -> Cow<'_, str> {
        self.value(row).unwrap_or(Cow::Borrowed(BLANK))
    }

    /// Declared band labels, `None` for free-text dimensions.
    pub fn declared_labels(self) -> Option<Vec<&'static str>> {
        self.band_rule().map(BandRule::labels)
    }

    /// Label ordering for this dimension. Build it once per sort.
    pub fn label_order(self) -> LabelOrder {
        LabelOrder {
            declared: self
                .declared_labels()
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(pos, label)| (label, pos))
                .collect(),
        }
    }

    pub fn sort_labels<S: AsRef<str>>(self, labels: &mut [S]) {
        let order = self.label_order();
        labels.sort_by(|a, b| order.compare(a.as_ref(), b.as_ref()));
    }
}

/// Declared labels first, then the rest lexicographically, then [`BLANK`].
#[derive(Debug, Clone, Default)]
pub struct LabelOrder {
    declared: HashMap<&'static str, usize>,
}

impl LabelOrder {
    fn rank(&self, label: &str) -> (u8, usize) {
        if label == BLANK {
            (2, 0)
        } else if let Some(pos) = self.declared.get(label) {
            (0, *pos)
        } else {
            (1, 0)
        }
    }

    pub fn compare(&self, left: &str, right: &str) -> Ordering {
        self.rank(left)
            .cmp(&self.rank(right))
            .then_with(|| left.cmp(right))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Dimension {
    type Err = PipelineError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        <Dimension as ValueEnum>::from_str(token.trim(), true).map_err(|_| {
            PipelineError::UnknownDimension {
                token: token.to_string(),
                known: Self::value_variants()
                    .iter()
                    .map(|dimension| dimension.key().to_string())
                    .collect(),
            }
        })
    }
}

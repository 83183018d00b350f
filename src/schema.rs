//! Header cleaning, field resolution and value coercion.
//!
//! The normalizer is the only place that asks whether a column exists. It
//! resolves every known [`Field`] against the cleaned headers once, records
//! the result in a [`FieldSet`], and builds typed [`Record`]s. Later stages
//! consult the field set instead of probing headers.
//!
//! Coercion never fails: a numeric or date cell that cannot be parsed becomes
//! `None`, and the number of such cells is reported at debug level.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

use crate::{
    config::{Config, GenderTokens},
    data::RawCell,
    error::PipelineError,
    sheet::RawTable,
};

pub const NULL_STATUS: &str = "NULL";

/// Columns the pipeline understands. Anything else in the upload is carried
/// through to exports untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Age,
    Income,
    DesiredLoan,
    MortgagePayment,
    YearsEmployed,
    OtherLoans,
    Gender,
    ApplicationDate,
    ApprovalStatus,
    MediaCode,
    DisbursementCurrent,
    DisbursementNext,
    DisbursementFollowing,
    Prefecture,
    Purpose,
    FamilyStructure,
    Children,
    EmploymentStatus,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::Age,
        Field::Income,
        Field::DesiredLoan,
        Field::MortgagePayment,
        Field::YearsEmployed,
        Field::OtherLoans,
        Field::Gender,
        Field::ApplicationDate,
        Field::ApprovalStatus,
        Field::MediaCode,
        Field::DisbursementCurrent,
        Field::DisbursementNext,
        Field::DisbursementFollowing,
        Field::Prefecture,
        Field::Purpose,
        Field::FamilyStructure,
        Field::Children,
        Field::EmploymentStatus,
    ];

    pub const DISBURSEMENTS: [Field; 3] = [
        Field::DisbursementCurrent,
        Field::DisbursementNext,
        Field::DisbursementFollowing,
    ];
}

/// Which known fields the upload actually carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldSet(BTreeSet<Field>);

impl FieldSet {
    pub fn contains(&self, field: Field) -> bool {
        self.0.contains(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Cleaned source headers in upload order, duplicates included.
    pub headers: Vec<String>,
    pub fields: FieldSet,
    positions: BTreeMap<Field, usize>,
}

impl Schema {
    pub fn resolve(headers: Vec<String>, config: &Config) -> Self {
        let mut positions = BTreeMap::new();
        for field in Field::ALL {
            let wanted = config.columns.header(field);
            if let Some(idx) = headers.iter().position(|header| header == wanted) {
                positions.insert(field, idx);
            }
        }
        let fields = positions.keys().copied().collect();
        Self {
            headers,
            fields,
            positions,
        }
    }

    pub fn has(&self, field: Field) -> bool {
        self.fields.contains(field)
    }

    pub fn position(&self, field: Field) -> Option<usize> {
        self.positions.get(&field).copied()
    }
}

/// Strips surrounding whitespace and every ideographic space, no-break
/// space and byte order mark from a header.
pub fn clean_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\u{3000}' | '\u{a0}' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other(String),
    Unknown,
}

impl Gender {
    pub fn label(&self) -> Option<&str> {
        match self {
            Gender::Male => Some("male"),
            Gender::Female => Some("female"),
            Gender::Other(raw) => Some(raw.as_str()),
            Gender::Unknown => None,
        }
    }
}

/// Pulls the gender token out of cells such as `0001_男性`.
#[derive(Debug, Clone)]
pub struct GenderMatcher {
    tokens: GenderTokens,
    pattern: Regex,
}

impl GenderMatcher {
    pub fn new(tokens: &GenderTokens) -> Result<Self> {
        let pattern = Regex::new(&format!(
            "_({}|{})",
            regex::escape(&tokens.male),
            regex::escape(&tokens.female)
        ))
        .context("Building gender token pattern")?;
        Ok(Self {
            tokens: tokens.clone(),
            pattern,
        })
    }

    pub fn classify(&self, cell: &RawCell) -> Gender {
        let Some(text) = cell.to_text() else {
            return Gender::Unknown;
        };
        let token = self
            .pattern
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or(text);
        if token == self.tokens.male {
            Gender::Male
        } else if token == self.tokens.female {
            Gender::Female
        } else {
            Gender::Other(token)
        }
    }
}

/// One loan application with coerced fields. `source` keeps the display
/// form of every upload cell, aligned with [`Schema::headers`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub age: Option<f64>,
    pub income: Option<f64>,
    pub desired_loan: Option<f64>,
    pub mortgage_payment: Option<f64>,
    pub years_employed: Option<f64>,
    pub other_loans: Option<f64>,
    pub gender: Gender,
    pub application_date: Option<NaiveDate>,
    pub approval_status: String,
    pub media_code: Option<String>,
    pub disbursements: [f64; 3],
    pub total_amount: f64,
    pub prefecture: Option<String>,
    pub purpose: Option<String>,
    pub family_structure: Option<String>,
    pub children: Option<String>,
    pub employment_status: Option<String>,
    #[serde(skip)]
    pub source: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub schema: Schema,
    pub records: Vec<Record>,
}

pub fn normalize(raw: &RawTable, config: &Config) -> Result<Normalized> {
    let headers = raw
        .headers
        .iter()
        .map(|header| clean_header(header))
        .collect::<Vec<_>>();
    report_duplicate_headers(&headers);

    let schema = Schema::resolve(headers, config);
    if !Field::DISBURSEMENTS.iter().any(|field| schema.has(*field)) {
        return Err(PipelineError::MissingAmountColumns {
            expected: Field::DISBURSEMENTS
                .iter()
                .map(|field| config.columns.header(*field).to_string())
                .collect(),
        }
        .into());
    }
    debug!(
        "Resolved fields: {:?}",
        schema.fields.iter().collect::<Vec<_>>()
    );

    let gender = GenderMatcher::new(&config.gender)?;
    let mut unparsed: BTreeMap<Field, usize> = BTreeMap::new();
    let records = raw
        .rows
        .iter()
        .map(|row| build_record(&schema, &gender, row, &mut unparsed))
        .collect::<Vec<_>>();

    for (field, count) in &unparsed {
        debug!(
            "{count} cell(s) in '{}' could not be coerced and were treated as empty",
            config.columns.header(*field)
        );
    }
    Ok(Normalized { schema, records })
}

fn report_duplicate_headers(headers: &[String]) {
    let mut seen = HashSet::new();
    let duplicates = headers
        .iter()
        .filter(|header| !seen.insert(header.as_str()))
        .collect::<BTreeSet<_>>();
    if !duplicates.is_empty() {
        warn!(
            "Duplicate column header(s) {:?}; the first occurrence is used",
            duplicates
        );
    }
}

fn build_record(
    schema: &Schema,
    gender: &GenderMatcher,
    row: &[RawCell],
    unparsed: &mut BTreeMap<Field, usize>,
) -> Record {
    let cell = |field: Field| schema.position(field).and_then(|idx| row.get(idx));
    let mut number = |field: Field| -> Option<f64> {
        let raw = cell(field)?;
        let value = raw.to_number();
        if value.is_none() && !raw.is_empty() {
            *unparsed.entry(field).or_insert(0) += 1;
        }
        value
    };

    let age = number(Field::Age);
    let income = number(Field::Income);
    let desired_loan = number(Field::DesiredLoan);
    let mortgage_payment = number(Field::MortgagePayment);
    let years_employed = number(Field::YearsEmployed);
    let other_loans = number(Field::OtherLoans);
    let disbursements = Field::DISBURSEMENTS.map(|field| number(field).unwrap_or(0.0));

    let application_date = cell(Field::ApplicationDate).and_then(|raw| {
        let date = raw.to_date();
        if date.is_none() && !raw.is_empty() {
            *unparsed.entry(Field::ApplicationDate).or_insert(0) += 1;
        }
        date
    });
    let text = |field: Field| cell(field).and_then(RawCell::to_text);

    Record {
        age,
        income,
        desired_loan,
        mortgage_payment,
        years_employed,
        other_loans,
        gender: cell(Field::Gender).map_or(Gender::Unknown, |raw| gender.classify(raw)),
        application_date,
        approval_status: text(Field::ApprovalStatus).unwrap_or_else(|| NULL_STATUS.to_string()),
        media_code: cell(Field::MediaCode).and_then(RawCell::to_code),
        total_amount: disbursements.iter().sum(),
        disbursements,
        prefecture: text(Field::Prefecture),
        purpose: text(Field::Purpose),
        family_structure: text(Field::FamilyStructure),
        children: text(Field::Children),
        employment_status: text(Field::EmploymentStatus),
        source: schema
            .headers
            .iter()
            .enumerate()
            .map(|(idx, _)| row.get(idx).map(RawCell::as_display).unwrap_or_default())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> RawCell {
        RawCell::Text(value.to_string())
    }

    fn table(headers: &[&str], rows: Vec<Vec<RawCell>>) -> RawTable {
        RawTable::new(headers.iter().map(|h| h.to_string()).collect(), rows)
    }

    #[test]
    fn clean_header_strips_wide_and_nbsp_spaces() {
        assert_eq!(clean_header("  年収\u{3000}"), "年収");
        assert_eq!(clean_header("取扱金額\u{a0}_申込当月 "), "取扱金額_申込当月");
        assert_eq!(clean_header("\u{feff}媒体コード"), "媒体コード");
    }

    #[test]
    fn total_amount_sums_present_disbursements() {
        let raw = table(
            &["取扱金額_申込当月", "取扱金額_申込翌月末", "取扱金額_申込翌々月末"],
            vec![vec![text("100"), text("0"), text("50")]],
        );
        let normalized = normalize(&raw, &Config::default()).expect("normalize");
        assert_eq!(normalized.records[0].total_amount, 150.0);
    }

    #[test]
    fn absent_disbursement_columns_count_as_zero() {
        let raw = table(
            &["取扱金額_申込当月", "年収"],
            vec![vec![text("120"), text("800")], vec![RawCell::Empty, text("x")]],
        );
        let normalized = normalize(&raw, &Config::default()).expect("normalize");
        assert_eq!(normalized.records[0].total_amount, 120.0);
        assert_eq!(normalized.records[1].total_amount, 0.0);
        assert_eq!(normalized.records[1].income, None);
        assert!(!normalized.schema.has(Field::DisbursementNext));
    }

    #[test]
    fn missing_every_disbursement_column_is_reported() {
        let raw = table(&["年収"], vec![vec![text("800")]]);
        let err = normalize(&raw, &Config::default()).expect_err("must fail");
        let domain = err
            .downcast_ref::<PipelineError>()
            .expect("pipeline error");
        assert!(matches!(domain, PipelineError::MissingAmountColumns { .. }));
    }

    #[test]
    fn approval_status_defaults_to_null_sentinel() {
        let raw = table(
            &["取扱金額_申込当月", "承認区分"],
            vec![vec![text("1"), text("承認")], vec![text("1"), RawCell::Empty]],
        );
        let normalized = normalize(&raw, &Config::default()).expect("normalize");
        assert_eq!(normalized.records[0].approval_status, "承認");
        assert_eq!(normalized.records[1].approval_status, NULL_STATUS);

        let without = table(&["取扱金額_申込当月"], vec![vec![text("1")]]);
        let normalized = normalize(&without, &Config::default()).expect("normalize");
        assert_eq!(normalized.records[0].approval_status, NULL_STATUS);
    }

    #[test]
    fn gender_token_is_extracted_from_prefixed_codes() {
        let matcher = GenderMatcher::new(&GenderTokens::default()).expect("matcher");
        assert_eq!(matcher.classify(&text("0001_男性")), Gender::Male);
        assert_eq!(matcher.classify(&text("女性")), Gender::Female);
        assert_eq!(
            matcher.classify(&text("回答なし")),
            Gender::Other("回答なし".into())
        );
        assert_eq!(matcher.classify(&RawCell::Empty), Gender::Unknown);
    }

    #[test]
    fn duplicate_headers_resolve_to_first_occurrence() {
        let raw = table(
            &["取扱金額_申込当月", "年収", "年収 "],
            vec![vec![text("1"), text("450"), text("9999")]],
        );
        let normalized = normalize(&raw, &Config::default()).expect("normalize");
        assert_eq!(normalized.schema.position(Field::Income), Some(1));
        assert_eq!(normalized.records[0].income, Some(450.0));
        assert_eq!(normalized.records[0].source, vec!["1", "450", "9999"]);
    }

    #[test]
    fn unparseable_dates_become_none() {
        let raw = table(
            &["取扱金額_申込当月", "申込日"],
            vec![
                vec![text("1"), text("2024-01-15")],
                vec![text("1"), text("someday")],
            ],
        );
        let normalized = normalize(&raw, &Config::default()).expect("normalize");
        assert_eq!(
            normalized.records[0].application_date,
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(normalized.records[1].application_date, None);
    }
}

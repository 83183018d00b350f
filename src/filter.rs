use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;

use crate::{
    dimension::Dimension,
    error::PipelineError,
    pipeline::View,
    schema::Field,
};

/// Selection token that disables a categorical filter.
pub const ALL: &str = "ALL";

/// Inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_reversed(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection(BTreeSet<String>);

impl Selection {
    pub fn is_all(&self) -> bool {
        self.0.is_empty() || self.0.contains(ALL)
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        self.is_all() || value.is_some_and(|v| self.0.contains(v))
    }
}

/// Everything the sidebar can narrow by. Immutable once built; applying it
/// returns a new view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSpec {
    pub date_range: Option<DateRange>,
    pub selections: BTreeMap<Dimension, Selection>,
}

impl FilterSpec {
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Adds values to the selection for `dimension`. Repeating a dimension
    /// widens its selection.
    pub fn select<I, S>(mut self, dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections
            .entry(dimension)
            .or_default()
            .0
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn is_noop(&self) -> bool {
        self.date_range.is_none() && self.selections.values().all(Selection::is_all)
    }

    pub fn apply<'a>(&self, view: &View<'a>) -> View<'a> {
        let fields = view.fields();
        let date_range = self
            .date_range
            .filter(|_| fields.contains(Field::ApplicationDate));
        if let Some(range) = date_range
            && range.is_reversed()
        {
            warn!(
                "Date range {} to {} is reversed; no rows match",
                range.start, range.end
            );
            return view.with_rows(Vec::new());
        }
        let active = self
            .selections
            .iter()
            .filter(|(dimension, selection)| {
                !selection.is_all() && dimension.is_available(fields)
            })
            .collect::<Vec<_>>();

        let rows = view
            .rows()
            .iter()
            .copied()
            .filter(|row| {
                date_range.is_none_or(|range| {
                    row.record
                        .application_date
                        .is_some_and(|date| range.contains(date))
                })
            })
            .filter(|row| {
                active
                    .iter()
                    .all(|(dimension, selection)| selection.matches(dimension.value(row).as_deref()))
            })
            .collect::<Vec<_>>();
        info!("{} of {} row(s) match the filter", rows.len(), view.len());
        view.with_rows(rows)
    }
}

/// Parses `dimension=value[,value...]`. Values may be quoted to keep commas.
pub fn parse_selection(expr: &str) -> Result<(Dimension, Vec<String>), PipelineError> {
    let (left, right) = expr
        .split_once('=')
        .ok_or_else(|| PipelineError::InvalidSelection(expr.to_string()))?;
    let dimension = left.parse::<Dimension>()?;
    let values = split_values(right)
        .map_err(|cause| PipelineError::MalformedSelection {
            expr: expr.to_string(),
            cause,
        })?
        .into_iter()
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>();
    if values.is_empty() {
        return Err(PipelineError::InvalidSelection(expr.to_string()));
    }
    Ok((dimension, values))
}

fn split_values(raw: &str) -> Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());
    let mut values = Vec::new();
    for record in reader.records() {
        values.extend(record?.iter().map(str::to_string));
    }
    Ok(values)
}

/// Filter-widget options: `ALL` followed by the distinct non-null values.
pub fn choices(view: &View<'_>, dimension: Dimension) -> Vec<String> {
    let mut values = view
        .rows()
        .iter()
        .filter_map(|row| dimension.value(row).map(|v| v.into_owned()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    dimension.sort_labels(&mut values);
    std::iter::once(ALL.to_string()).chain(values).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionChoices {
    pub dimension: Dimension,
    pub values: Vec<String>,
}

/// What the sidebar offers for the current view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub row_count: usize,
    pub date_bounds: Option<DateRange>,
    pub choices: Vec<DimensionChoices>,
}

pub fn options(view: &View<'_>) -> FilterOptions {
    FilterOptions {
        row_count: view.len(),
        date_bounds: date_bounds(view),
        choices: Dimension::FILTERS
            .into_iter()
            .filter(|dimension| dimension.is_available(view.fields()))
            .map(|dimension| DimensionChoices {
                dimension,
                values: choices(view, dimension),
            })
            .collect(),
    }
}

/// Earliest and latest application date, the default date range.
pub fn date_bounds(view: &View<'_>) -> Option<DateRange> {
    let mut dates = view
        .rows()
        .iter()
        .filter_map(|row| row.record.application_date);
    let first = dates.next()?;
    let (start, end) = dates.fold((first, first), |(lo, hi), date| (lo.min(date), hi.max(date)));
    Some(DateRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_range_is_inclusive_and_drops_null_dates() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default().with_date_range(DateRange::new(
            date(2024, 1, 1),
            date(2024, 1, 31),
        ));
        let view = dataset.view().filter(&spec);
        let dates = view
            .rows()
            .iter()
            .map(|row| row.record.application_date)
            .collect::<Vec<_>>();
        assert_eq!(
            dates,
            vec![
                Some(date(2024, 1, 15)),
                Some(date(2024, 1, 20)),
                Some(date(2024, 1, 31))
            ]
        );
    }

    #[test]
    fn reversed_range_yields_no_rows() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default().with_date_range(DateRange::new(
            date(2024, 2, 1),
            date(2024, 1, 1),
        ));
        assert!(dataset.view().filter(&spec).is_empty());
    }

    #[test]
    fn all_token_and_empty_selection_are_noops() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default()
            .select(Dimension::Category, [ALL, "web"])
            .select(Dimension::Gender, Vec::<String>::new());
        assert!(spec.is_noop());
        assert_eq!(dataset.view().filter(&spec).len(), dataset.len());
    }

    #[test]
    fn null_values_never_match_a_selection() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default().select(Dimension::Category, ["web", "tv"]);
        let view = dataset.view().filter(&spec);
        assert_eq!(view.len(), 4);
        assert!(view.rows().iter().all(|row| row.category.is_some()));
    }

    #[test]
    fn absent_source_column_makes_selection_vacuous() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default().select(Dimension::Purpose, ["住宅"]);
        assert_eq!(dataset.view().filter(&spec).len(), dataset.len());
    }

    #[test]
    fn selections_are_conjunctive() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default()
            .select(Dimension::MediaName, ["Alpha", "Beta"])
            .select(Dimension::ApprovalStatus, ["承認"])
            .select(Dimension::Gender, ["female"]);
        let view = dataset.view().filter(&spec);
        assert_eq!(view.len(), 1);
        assert_eq!(view.rows()[0].record.age, Some(55.0));
    }

    #[test]
    fn parse_selection_accepts_quoted_values() {
        let (dimension, values) =
            parse_selection("media_name=Alpha,\"Beta, Inc\"").expect("parse selection");
        assert_eq!(dimension, Dimension::MediaName);
        assert_eq!(values, vec!["Alpha", "Beta, Inc"]);
        assert!(matches!(
            parse_selection("media_name"),
            Err(PipelineError::InvalidSelection(_))
        ));
        assert!(matches!(
            parse_selection("colour=red"),
            Err(PipelineError::UnknownDimension { .. })
        ));
    }

    #[test]
    fn parse_selection_reports_unreadable_values() {
        let err = parse_selection("media_name=Alpha,Beta\nGamma")
            .expect_err("ragged value lines");
        assert!(matches!(err, PipelineError::MalformedSelection { .. }));
        assert!(err.to_string().contains("media_name=Alpha"));
    }

    #[test]
    fn choices_list_all_then_sorted_values() {
        let dataset = fixtures::dataset();
        let view = dataset.view();
        assert_eq!(choices(&view, Dimension::MediaName), vec![ALL, "Alpha", "Beta"]);
        assert_eq!(
            choices(&view, Dimension::IncomeBand),
            vec![ALL, "0-499", "500-999", "1000+", "unknown"]
        );
    }

    #[test]
    fn date_bounds_skip_null_dates() {
        let dataset = fixtures::dataset();
        assert_eq!(
            date_bounds(&dataset.view()),
            Some(DateRange::new(date(2024, 1, 15), date(2024, 2, 1)))
        );
        let spec = FilterSpec::default().select(Dimension::MediaName, ["nobody"]);
        assert_eq!(date_bounds(&dataset.view().filter(&spec)), None);
    }

    #[test]
    fn options_follow_sidebar_order() {
        let dataset = fixtures::dataset();
        let options = options(&dataset.view());
        assert_eq!(options.row_count, 5);
        let order = options
            .choices
            .iter()
            .map(|c| c.dimension)
            .collect::<Vec<_>>();
        assert_eq!(order, Dimension::FILTERS.to_vec());
        assert_eq!(options.choices[0].values, vec![ALL, "tv", "web"]);
    }

    fn spec_strategy() -> impl Strategy<Value = FilterSpec> {
        let names = proptest::sample::subsequence(vec![ALL, "Alpha", "Beta", "nobody"], 0..=3);
        let statuses = proptest::sample::subsequence(vec!["承認", "否認", "NULL"], 0..=2);
        let window = proptest::option::of((0u32..40, 0u32..40));
        (names, statuses, window).prop_map(|(names, statuses, window)| {
            let mut spec = FilterSpec::default()
                .select(Dimension::MediaName, names)
                .select(Dimension::ApprovalStatus, statuses);
            if let Some((from, len)) = window {
                let start = date(2024, 1, 1) + chrono::Days::new(u64::from(from));
                spec = spec.with_date_range(DateRange::new(start, start + chrono::Days::new(u64::from(len))));
            }
            spec
        })
    }

    proptest! {
        #[test]
        fn filtering_is_idempotent(spec in spec_strategy()) {
            let dataset = fixtures::dataset();
            let once = dataset.view().filter(&spec);
            let twice = once.filter(&spec);
            prop_assert_eq!(once.rows(), twice.rows());
        }
    }
}

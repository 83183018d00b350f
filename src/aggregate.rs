//! Chart data, one-way summaries, cross-tabulations and approval rates.
//!
//! Every aggregation runs over a filtered [`View`] and returns a fresh value.
//! Nulls group under `(blank)` in summaries and cross-tabs, so group counts
//! always add up to the number of filtered rows.

use std::collections::HashMap;

use anyhow::Result;
use clap::ValueEnum;
use itertools::Itertools;
use serde::Serialize;

use crate::{
    dimension::Dimension,
    pipeline::{EnrichedRecord, View},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Number of applications.
    #[default]
    Count,
    /// Sum of total handled amount.
    Amount,
}

impl Metric {
    pub fn key(self) -> &'static str {
        match self {
            Metric::Count => "count",
            Metric::Amount => "amount",
        }
    }

    fn measure(self, row: &EnrichedRecord) -> f64 {
        match self {
            Metric::Count => 1.0,
            Metric::Amount => row.record.total_amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregationRequest {
    pub metric: Metric,
    pub rows: Dimension,
    pub columns: Option<Dimension>,
    pub normalize: bool,
}

impl AggregationRequest {
    pub fn one_way(rows: Dimension, metric: Metric) -> Self {
        Self {
            metric,
            rows,
            columns: None,
            normalize: false,
        }
    }

    pub fn by_columns(mut self, columns: Dimension) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn normalized(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    Summary(Summary),
    CrossTab(CrossTab),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub dimension: Dimension,
    pub metric: Metric,
    pub groups: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub label: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossTab {
    pub rows: Dimension,
    pub columns: Dimension,
    pub metric: Metric,
    pub normalized: bool,
    pub column_labels: Vec<String>,
    pub cells: Vec<CrossTabRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossTabRow {
    pub label: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub dimension: Dimension,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub label: String,
    pub count: usize,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRow {
    pub media_name: String,
    pub applications: usize,
    pub approved: usize,
    pub rate: f64,
}

/// Rounds to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent_of(part: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        round2(part / total * 100.0)
    }
}

pub fn aggregate(view: &View<'_>, request: &AggregationRequest) -> Result<Aggregation> {
    Ok(match request.columns {
        None => Aggregation::Summary(summarize(
            view,
            request.rows,
            request.metric,
            request.normalize,
        )?),
        Some(columns) => Aggregation::CrossTab(cross_tab(
            view,
            request.rows,
            columns,
            request.metric,
            request.normalize,
        )?),
    })
}

pub fn summarize(
    view: &View<'_>,
    dimension: Dimension,
    metric: Metric,
    normalize: bool,
) -> Result<Summary> {
    dimension.ensure_available(view.fields())?;
    let mut totals: HashMap<String, f64> = HashMap::new();
    for row in view.rows() {
        *totals
            .entry(dimension.group_label(row).into_owned())
            .or_insert(0.0) += metric.measure(row);
    }
    let grand_total: f64 = totals.values().sum();
    let order = dimension.label_order();
    let groups = totals
        .into_iter()
        .sorted_by(|(a, _), (b, _)| order.compare(a, b))
        .map(|(label, value)| SummaryRow {
            percent: normalize.then(|| percent_of(value, grand_total)),
            label,
            value,
        })
        .collect();
    Ok(Summary {
        dimension,
        metric,
        groups,
    })
}

pub fn cross_tab(
    view: &View<'_>,
    rows: Dimension,
    columns: Dimension,
    metric: Metric,
    normalize: bool,
) -> Result<CrossTab> {
    rows.ensure_available(view.fields())?;
    columns.ensure_available(view.fields())?;

    let mut grid: HashMap<(String, String), f64> = HashMap::new();
    for row in view.rows() {
        let key = (
            rows.group_label(row).into_owned(),
            columns.group_label(row).into_owned(),
        );
        *grid.entry(key).or_insert(0.0) += metric.measure(row);
    }
    let row_order = rows.label_order();
    let column_order = columns.label_order();
    let row_labels = grid
        .keys()
        .map(|(r, _)| r.clone())
        .unique()
        .sorted_by(|a, b| row_order.compare(a, b))
        .collect::<Vec<_>>();
    let column_labels = grid
        .keys()
        .map(|(_, c)| c.clone())
        .unique()
        .sorted_by(|a, b| column_order.compare(a, b))
        .collect::<Vec<_>>();

    let cells = row_labels
        .into_iter()
        .map(|label| {
            let raw = column_labels
                .iter()
                .map(|column| {
                    grid.get(&(label.clone(), column.clone()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect::<Vec<_>>();
            let values = if normalize {
                let total: f64 = raw.iter().sum();
                raw.iter().map(|value| percent_of(*value, total)).collect()
            } else {
                raw
            };
            CrossTabRow { label, values }
        })
        .collect();

    Ok(CrossTab {
        rows,
        columns,
        metric,
        normalized: normalize,
        column_labels,
        cells,
    })
}

/// Count and amount per label for one chart. Declared bands appear even
/// when empty; rows with no value are left out, as charts do not plot them.
pub fn breakdown(view: &View<'_>, dimension: Dimension) -> Result<Breakdown> {
    dimension.ensure_available(view.fields())?;
    let mut observed: HashMap<String, (usize, f64)> = HashMap::new();
    for row in view.rows() {
        if let Some(label) = dimension.value(row) {
            let slot = observed.entry(label.into_owned()).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += row.record.total_amount;
        }
    }
    for label in dimension.declared_labels().unwrap_or_default() {
        observed.entry(label.to_string()).or_insert((0, 0.0));
    }
    let order = dimension.label_order();
    let bars = observed
        .into_iter()
        .sorted_by(|(a, _), (b, _)| order.compare(a, b))
        .map(|(label, (count, amount))| Bar {
            label,
            count,
            amount,
        })
        .collect();
    Ok(Breakdown { dimension, bars })
}

/// Chart dimensions that have a source column and at least one value.
pub fn chart_dimensions(view: &View<'_>) -> Vec<Dimension> {
    Dimension::CHARTS
        .into_iter()
        .filter(|dimension| dimension.is_available(view.fields()))
        .filter(|dimension| view.rows().iter().any(|row| dimension.value(row).is_some()))
        .collect()
}

/// Applications, approvals and approval rate per media name, highest rate
/// first. Equal rates keep media-name order.
pub fn approval_summary(view: &View<'_>, approved_token: &str) -> Vec<ApprovalRow> {
    let mut groups: HashMap<String, (usize, usize)> = HashMap::new();
    for row in view.rows() {
        let slot = groups
            .entry(Dimension::MediaName.group_label(row).into_owned())
            .or_insert((0, 0));
        slot.0 += 1;
        if row.record.approval_status == approved_token {
            slot.1 += 1;
        }
    }
    let order = Dimension::MediaName.label_order();
    let mut rows = groups
        .into_iter()
        .sorted_by(|(a, _), (b, _)| order.compare(a, b))
        .map(|(media_name, (applications, approved))| ApprovalRow {
            media_name,
            applications,
            approved,
            rate: percent_of(approved as f64, applications as f64),
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| b.rate.total_cmp(&a.rate));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        data::RawCell,
        dimension::BLANK,
        filter::FilterSpec,
        pipeline::{Pipeline, fixtures},
        reference::ReferenceTable,
        sheet::RawTable,
    };
    use proptest::prelude::*;

    #[test]
    fn income_bands_count_one_each() {
        let raw = RawTable::new(
            vec!["年収".into(), "取扱金額_申込当月".into()],
            [Some(450.0), Some(750.0), Some(1500.0), None]
                .into_iter()
                .map(|income| {
                    vec![
                        income.map_or(RawCell::Empty, RawCell::Number),
                        RawCell::Number(1.0),
                    ]
                })
                .collect(),
        );
        let pipeline = Pipeline::new(Config::default(), ReferenceTable::default());
        let dataset = pipeline.prepare(&raw).expect("prepare");
        let summary = summarize(&dataset.view(), Dimension::IncomeBand, Metric::Count, false)
            .expect("summarize");
        let pairs = summary
            .groups
            .iter()
            .map(|g| (g.label.as_str(), g.value))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![("0-499", 1.0), ("500-999", 1.0), ("1000+", 1.0), ("unknown", 1.0)]
        );
    }

    #[test]
    fn summary_groups_nulls_and_adds_shares() {
        let dataset = fixtures::dataset();
        let summary =
            summarize(&dataset.view(), Dimension::MediaName, Metric::Amount, true).expect("sum");
        let rows = summary
            .groups
            .iter()
            .map(|g| (g.label.as_str(), g.value, g.percent))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![
                ("Alpha", 350.0, Some(85.37)),
                ("Beta", 60.0, Some(14.63)),
                (BLANK, 0.0, Some(0.0)),
            ]
        );
    }

    #[test]
    fn zero_total_shares_are_zero() {
        let dataset = fixtures::dataset();
        let spec = FilterSpec::default().select(Dimension::ApprovalStatus, ["NULL"]);
        let view = dataset.view().filter(&spec);
        let summary = summarize(&view, Dimension::Gender, Metric::Amount, true).expect("sum");
        assert_eq!(summary.groups.len(), 1);
        assert_eq!(summary.groups[0].percent, Some(0.0));
    }

    #[test]
    fn cross_tab_fills_missing_combinations_with_zero() {
        let dataset = fixtures::dataset();
        let table = cross_tab(
            &dataset.view(),
            Dimension::Gender,
            Dimension::ApprovalStatus,
            Metric::Count,
            false,
        )
        .expect("cross tab");
        assert_eq!(table.column_labels, vec!["NULL", "否認", "承認"]);
        let female = table.cells.iter().find(|r| r.label == "female").unwrap();
        assert_eq!(female.values, vec![0.0, 1.0, 1.0]);
        let male = table.cells.iter().find(|r| r.label == "male").unwrap();
        assert_eq!(male.values, vec![0.0, 0.0, 2.0]);
        assert_eq!(table.cells.last().unwrap().label, BLANK);
    }

    #[test]
    fn row_normalized_cross_tab_sums_to_hundred() {
        let dataset = fixtures::dataset();
        let table = cross_tab(
            &dataset.view(),
            Dimension::MediaName,
            Dimension::LoanBand,
            Metric::Amount,
            true,
        )
        .expect("cross tab");
        for row in &table.cells {
            let total: f64 = row.values.iter().sum();
            if row.label == BLANK {
                assert_eq!(total, 0.0);
            } else {
                assert!((total - 100.0).abs() <= 0.01, "{} sums to {total}", row.label);
            }
        }
    }

    #[test]
    fn unavailable_dimension_is_a_caller_error() {
        let dataset = fixtures::dataset();
        let err = summarize(&dataset.view(), Dimension::Purpose, Metric::Count, false)
            .expect_err("purpose column is absent");
        assert!(err.to_string().contains("purpose"));
    }

    #[test]
    fn breakdown_pads_declared_bands() {
        let dataset = fixtures::dataset();
        let chart = breakdown(&dataset.view(), Dimension::IncomeBand).expect("breakdown");
        let bars = chart
            .bars
            .iter()
            .map(|b| (b.label.as_str(), b.count, b.amount))
            .collect::<Vec<_>>();
        assert_eq!(
            bars,
            vec![
                ("0-499", 1, 150.0),
                ("500-999", 1, 30.0),
                ("1000+", 1, 200.0),
                ("unknown", 2, 30.0),
            ]
        );
        let ages = breakdown(&dataset.view(), Dimension::AgeBand).expect("ages");
        assert_eq!(ages.bars.len(), 11);
        assert_eq!(ages.bars[0].count, 0);
    }

    #[test]
    fn chart_dimensions_skip_absent_and_empty_columns() {
        let dataset = fixtures::dataset();
        let dimensions = chart_dimensions(&dataset.view());
        assert!(dimensions.contains(&Dimension::IncomeBand));
        assert!(dimensions.contains(&Dimension::MediaName));
        assert!(!dimensions.contains(&Dimension::Purpose));
        assert!(!dimensions.contains(&Dimension::Category));

        let spec = FilterSpec::default().select(Dimension::MediaName, ["nobody"]);
        let empty = dataset.view().filter(&spec);
        assert!(!chart_dimensions(&empty).contains(&Dimension::MediaName));
    }

    #[test]
    fn approval_rates_sort_descending_with_stable_ties() {
        let dataset = fixtures::dataset();
        let summary = approval_summary(&dataset.view(), "承認");
        let rows = summary
            .iter()
            .map(|r| (r.media_name.as_str(), r.applications, r.approved, r.rate))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![
                ("Alpha", 2, 2, 100.0),
                ("Beta", 2, 1, 50.0),
                (BLANK, 1, 0, 0.0),
            ]
        );
    }

    #[test]
    fn round2_matches_two_decimal_display() {
        assert_eq!(round2(33.33333), 33.33);
        assert_eq!(round2(66.66666), 66.67);
        assert_eq!(percent_of(1.0, 0.0), 0.0);
    }

    proptest! {
        #[test]
        fn summary_counts_conserve_rows(
            statuses in proptest::collection::vec(proptest::option::of("[ab]"), 0..40)
        ) {
            let raw = RawTable::new(
                vec!["承認区分".into(), "取扱金額_申込当月".into()],
                statuses
                    .iter()
                    .map(|status| {
                        vec![
                            status.clone().map_or(RawCell::Empty, RawCell::Text),
                            RawCell::Number(1.0),
                        ]
                    })
                    .collect(),
            );
            let pipeline = Pipeline::new(Config::default(), ReferenceTable::default());
            let dataset = pipeline.prepare(&raw).expect("prepare");
            let summary = summarize(&dataset.view(), Dimension::ApprovalStatus, Metric::Count, false)
                .expect("summarize");
            let total: f64 = summary.groups.iter().map(|g| g.value).sum();
            prop_assert_eq!(total as usize, statuses.len());
        }
    }
}

//! Turning results into header/row grids and writing them out.
//!
//! Every command builds a [`Report`]: a grid for CSV and table output plus a
//! JSON document. Typed results serialize themselves; row exports fall back
//! to one JSON object per grid row.

use std::io::Write;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::info;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    aggregate::{Aggregation, ApprovalRow, Breakdown, CrossTab, Summary},
    band::BandRule,
    config::Config,
    data::{format_number, format_percent},
    filter::FilterOptions,
    io_utils::{self, WriterOptions},
    pipeline::View,
    schema::{Field, Record},
    table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Csv,
    Table,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn to_json_records(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object = self
                        .headers
                        .iter()
                        .zip(row)
                        .map(|(header, cell)| (header.clone(), Value::String(cell.clone())))
                        .collect::<Map<_, _>>();
                    Value::Object(object)
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub grid: Grid,
    pub json: Value,
}

impl Report {
    pub fn new<T: Serialize + ?Sized>(grid: Grid, payload: &T) -> Result<Self> {
        let json = serde_json::to_value(payload).context("Serializing result to JSON")?;
        Ok(Self { grid, json })
    }

    pub fn from_grid(grid: Grid) -> Self {
        let json = grid.to_json_records();
        Self { grid, json }
    }

    pub fn write(&self, format: OutputFormat, options: &WriterOptions<'_>) -> Result<()> {
        match format {
            OutputFormat::Csv => {
                let mut writer = io_utils::open_csv_writer(options)?;
                writer
                    .write_record(&self.grid.headers)
                    .context("Writing CSV headers")?;
                for row in &self.grid.rows {
                    writer.write_record(row).context("Writing CSV row")?;
                }
                writer.flush().context("Flushing CSV output")?;
            }
            OutputFormat::Table => {
                let mut writer = io_utils::open_output(options)?;
                let rendered = table::render_table(&self.grid.headers, &self.grid.rows);
                writer
                    .write_all(rendered.as_bytes())
                    .context("Writing table output")?;
                writer.flush().context("Flushing table output")?;
            }
            OutputFormat::Json => {
                let mut writer = io_utils::open_output(options)?;
                serde_json::to_writer_pretty(&mut writer, &self.json)
                    .context("Writing JSON output")?;
                writeln!(writer).context("Writing JSON output")?;
                writer.flush().context("Flushing JSON output")?;
            }
        }
        match options.path {
            Some(path) if !io_utils::is_dash(path) => {
                info!("Wrote {} row(s) to {:?}", self.grid.rows.len(), path);
            }
            _ => {}
        }
        Ok(())
    }
}

const BAND_COLUMNS: [(BandRule, &str); 5] = [
    (BandRule::Age, "age_band"),
    (BandRule::Income, "income_band"),
    (BandRule::LoanAmount, "loan_band"),
    (BandRule::MortgagePayment, "mortgage_band"),
    (BandRule::YearsEmployed, "years_employed_band"),
];

/// Enriched rows: code, media name and category first, then the remaining
/// upload columns, then the derived total and bands. The code column carries
/// the uploaded cell as written. Upload columns that share a name with the
/// joined reference columns get an `_upload` suffix.
pub fn rows_grid(view: &View<'_>, config: &Config) -> Grid {
    let schema = view.schema();
    let code_position = schema.position(Field::MediaCode);
    let kept = (0..schema.headers.len())
        .filter(|idx| Some(*idx) != code_position)
        .collect::<Vec<_>>();

    let mut headers = vec![
        config.columns.media_code.clone(),
        config.reference.identity.clone(),
        config.reference.category.clone(),
    ];
    let joined = headers.clone();
    headers.extend(kept.iter().map(|idx| {
        let header = &schema.headers[*idx];
        if joined.contains(header) {
            format!("{header}_upload")
        } else {
            header.clone()
        }
    }));
    headers.push("total_amount".to_string());
    headers.extend(BAND_COLUMNS.iter().map(|(_, name)| name.to_string()));

    let mut grid = Grid::new(headers);
    for row in view.rows() {
        let record = &row.record;
        let mut cells = vec![
            code_position
                .map(|idx| source_cell(record, idx).trim().to_string())
                .unwrap_or_default(),
            row.media_name.clone().unwrap_or_default(),
            row.category.clone().unwrap_or_default(),
        ];
        cells.extend(kept.iter().map(|idx| source_cell(record, *idx)));
        cells.push(format_number(record.total_amount));
        cells.extend(
            BAND_COLUMNS
                .iter()
                .map(|(rule, _)| row.bands.get(*rule).to_string()),
        );
        grid.push(cells);
    }
    grid
}

fn source_cell(record: &Record, idx: usize) -> String {
    record.source.get(idx).cloned().unwrap_or_default()
}

pub fn summary_grid(summary: &Summary) -> Grid {
    let with_percent = summary.groups.iter().any(|group| group.percent.is_some());
    let mut headers = vec![
        summary.dimension.key().to_string(),
        summary.metric.key().to_string(),
    ];
    if with_percent {
        headers.push("percent".to_string());
    }
    let mut grid = Grid::new(headers);
    for group in &summary.groups {
        let mut cells = vec![group.label.clone(), format_number(group.value)];
        if let Some(percent) = group.percent {
            cells.push(format_percent(percent));
        }
        grid.push(cells);
    }
    grid
}

pub fn cross_tab_grid(table: &CrossTab) -> Grid {
    let mut headers = vec![format!("{}\\{}", table.rows.key(), table.columns.key())];
    headers.extend(table.column_labels.iter().cloned());
    let mut grid = Grid::new(headers);
    for row in &table.cells {
        let mut cells = vec![row.label.clone()];
        cells.extend(row.values.iter().map(|value| {
            if table.normalized {
                format_percent(*value)
            } else {
                format_number(*value)
            }
        }));
        grid.push(cells);
    }
    grid
}

pub fn aggregation_grid(aggregation: &Aggregation) -> Grid {
    match aggregation {
        Aggregation::Summary(summary) => summary_grid(summary),
        Aggregation::CrossTab(table) => cross_tab_grid(table),
    }
}

/// Chart data in long form, one line per (dimension, label).
pub fn breakdown_grid(charts: &[Breakdown]) -> Grid {
    let mut grid = Grid::new(
        ["dimension", "label", "count", "amount"]
            .map(String::from)
            .to_vec(),
    );
    for chart in charts {
        for bar in &chart.bars {
            grid.push(vec![
                chart.dimension.key().to_string(),
                bar.label.clone(),
                bar.count.to_string(),
                format_number(bar.amount),
            ]);
        }
    }
    grid
}

pub fn approval_grid(rows: &[ApprovalRow], config: &Config) -> Grid {
    let mut grid = Grid::new(vec![
        config.reference.identity.clone(),
        "applications".to_string(),
        "approved".to_string(),
        "approval_rate".to_string(),
    ]);
    for row in rows {
        grid.push(vec![
            row.media_name.clone(),
            row.applications.to_string(),
            row.approved.to_string(),
            format_percent(row.rate),
        ]);
    }
    grid
}

pub fn options_grid(options: &FilterOptions) -> Grid {
    let mut grid = Grid::new(vec!["option".to_string(), "value".to_string()]);
    grid.push(vec!["row_count".to_string(), options.row_count.to_string()]);
    if let Some(range) = options.date_bounds {
        grid.push(vec!["date_from".to_string(), range.start.to_string()]);
        grid.push(vec!["date_to".to_string(), range.end.to_string()]);
    }
    for choice in &options.choices {
        for value in &choice.values {
            grid.push(vec![choice.dimension.key().to_string(), value.clone()]);
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::{self, Metric},
        data::RawCell,
        dimension::Dimension,
        pipeline::{Pipeline, fixtures},
        reference::{ReferenceEntry, ReferenceTable},
        sheet::RawTable,
    };

    #[test]
    fn rows_grid_leads_with_reference_columns() {
        let dataset = fixtures::dataset();
        let grid = rows_grid(&dataset.view(), &Config::default());
        assert_eq!(&grid.headers[..4], &["媒体コード", "媒体名", "カテゴリ", "申込日"]);
        assert!(!grid.headers[3..].contains(&"媒体コード".to_string()));
        assert_eq!(grid.headers.last().map(String::as_str), Some("years_employed_band"));
        assert_eq!(grid.rows.len(), 5);
        let first = &grid.rows[0];
        assert_eq!(&first[..4], &["101", "Alpha", "web", "2024-01-15"]);
        let total_idx = grid.headers.iter().position(|h| h == "total_amount").unwrap();
        assert_eq!(first[total_idx], "150");
        assert_eq!(first[total_idx + 2], "0-499");
    }

    #[test]
    fn rows_grid_keeps_uploaded_code_and_renames_clashing_columns() {
        let raw = RawTable::new(
            ["媒体コード", "媒体名", "取扱金額_申込当月"]
                .map(String::from)
                .to_vec(),
            vec![vec![
                RawCell::Text("0012".into()),
                RawCell::Text("typed by hand".into()),
                RawCell::Number(5.0),
            ]],
        );
        let reference = ReferenceTable::from_entries(vec![ReferenceEntry {
            name: Some("Alpha".into()),
            category: Some("web".into()),
            code: "12".into(),
        }]);
        let dataset = Pipeline::new(Config::default(), reference)
            .prepare(&raw)
            .expect("prepare");
        let grid = rows_grid(&dataset.view(), &Config::default());
        assert_eq!(
            &grid.headers[..4],
            &["媒体コード", "媒体名", "カテゴリ", "媒体名_upload"]
        );
        assert_eq!(&grid.rows[0][..4], &["0012", "", "", "typed by hand"]);
    }

    #[test]
    fn summary_grid_adds_percent_column_when_normalized() {
        let dataset = fixtures::dataset();
        let summary = aggregate::summarize(&dataset.view(), Dimension::MediaName, Metric::Amount, true)
            .expect("summary");
        let grid = summary_grid(&summary);
        assert_eq!(grid.headers, vec!["media_name", "amount", "percent"]);
        assert_eq!(grid.rows[0], vec!["Alpha", "350", "85.37"]);
        assert_eq!(grid.rows[2], vec!["(blank)", "0", "0.00"]);
    }

    #[test]
    fn cross_tab_grid_uses_column_labels_as_headers() {
        let dataset = fixtures::dataset();
        let table = aggregate::cross_tab(
            &dataset.view(),
            Dimension::Gender,
            Dimension::ApprovalStatus,
            Metric::Count,
            true,
        )
        .expect("cross tab");
        let grid = cross_tab_grid(&table);
        assert_eq!(grid.headers, vec!["gender\\approval_status", "NULL", "否認", "承認"]);
        assert_eq!(grid.rows[0], vec!["female", "0.00", "50.00", "50.00"]);
    }

    #[test]
    fn csv_output_round_trips_headers_and_values() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("approval.csv");
        let dataset = fixtures::dataset();
        let rows = aggregate::approval_summary(&dataset.view(), "承認");
        let report = Report::new(approval_grid(&rows, &Config::default()), &rows).expect("report");
        let options = WriterOptions {
            path: Some(&path),
            delimiter: b',',
            encoding: encoding_rs::UTF_8,
            bom: true,
        };
        report.write(OutputFormat::Csv, &options).expect("write csv");

        let bytes = std::fs::read(&path).expect("read csv");
        assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
        let mut reader = csv::Reader::from_reader(&bytes[3..]);
        let headers = reader.headers().expect("headers").clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["媒体名", "applications", "approved", "approval_rate"]
        );
        let first = reader.records().next().expect("row").expect("record");
        assert_eq!(first.iter().collect::<Vec<_>>(), vec!["Alpha", "2", "2", "100.00"]);
    }

    #[test]
    fn grid_json_uses_headers_as_keys() {
        let mut grid = Grid::new(vec!["a".into(), "b".into()]);
        grid.push(vec!["1".into(), "x".into()]);
        let report = Report::from_grid(grid);
        assert_eq!(report.json, serde_json::json!([{ "a": "1", "b": "x" }]));
    }
}

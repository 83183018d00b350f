//! Subcommand handlers: load, filter, aggregate, report.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    aggregate::{self, AggregationRequest},
    cli::{
        ApprovalArgs, ChartArgs, FilterArgs, InputArgs, OptionsArgs, OutputArgs, PivotArgs,
        RowsArgs,
    },
    config::Config,
    dimension::Dimension,
    filter::{self, DateRange, FilterSpec},
    io_utils::{self, WriterOptions},
    pipeline::{Dataset, Pipeline, View},
    printable_delimiter,
    report::{self, Report},
    sheet::{LoadOptions, RawTable},
};

/// A loaded pipeline plus one prepared upload.
struct Session {
    pipeline: Pipeline,
    dataset: Dataset,
}

impl Session {
    fn open(config_path: Option<&Path>, args: &InputArgs) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
        let reference_path = args
            .reference
            .clone()
            .unwrap_or_else(|| config.reference_path.clone());
        let reference_options = LoadOptions {
            sheet: args.reference_sheet.as_deref(),
            delimiter: None,
            encoding,
        };
        let pipeline = Pipeline::load(config, &reference_path, &reference_options)?;

        let input_options = LoadOptions {
            sheet: args.sheet.as_deref(),
            delimiter: args.delimiter,
            encoding,
        };
        info!(
            "Reading '{}' with delimiter '{}'",
            args.input.display(),
            printable_delimiter(io_utils::resolve_input_delimiter(&args.input, args.delimiter))
        );
        let raw = RawTable::load(&args.input, &input_options)
            .with_context(|| format!("Loading applicant sheet {:?}", args.input))?;
        let dataset = pipeline.prepare(&raw)?;
        Ok(Self { pipeline, dataset })
    }

    fn config(&self) -> &Config {
        self.pipeline.config()
    }

    fn filtered(&self, args: &FilterArgs) -> View<'_> {
        let view = self.dataset.view();
        let spec = filter_spec(args, &view);
        let filtered = view.filter(&spec);
        if filtered.is_empty() {
            warn!("No data matches the current filters");
        }
        filtered
    }
}

fn filter_spec(args: &FilterArgs, view: &View<'_>) -> FilterSpec {
    let mut spec = FilterSpec::default();
    if args.from.is_some() || args.to.is_some() {
        let bounds = filter::date_bounds(view);
        let start = args.from.or(bounds.map(|b| b.start)).or(args.to);
        let end = args.to.or(bounds.map(|b| b.end)).or(args.from);
        if let (Some(start), Some(end)) = (start, end) {
            spec = spec.with_date_range(DateRange::new(start, end));
        }
    }
    for (dimension, values) in [
        (Dimension::Category, &args.category),
        (Dimension::MediaName, &args.media),
        (Dimension::ApprovalStatus, &args.approval),
        (Dimension::Gender, &args.gender),
    ] {
        if !values.is_empty() {
            spec = spec.select(dimension, values.iter().cloned());
        }
    }
    for (dimension, values) in &args.selections {
        spec = spec.select(*dimension, values.iter().cloned());
    }
    spec
}

fn emit(report: &Report, args: &OutputArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    let options = WriterOptions {
        path: args.output.as_deref(),
        delimiter: io_utils::resolve_output_delimiter(args.output.as_deref(), args.output_delimiter),
        encoding,
        bom: args.bom,
    };
    report.write(args.format, &options)
}

pub fn rows(config: Option<&Path>, args: &RowsArgs) -> Result<()> {
    let session = Session::open(config, &args.input)?;
    let view = session.filtered(&args.filter);
    let report = Report::from_grid(report::rows_grid(&view, session.config()));
    emit(&report, &args.output)
}

pub fn chart(config: Option<&Path>, args: &ChartArgs) -> Result<()> {
    let session = Session::open(config, &args.input)?;
    let view = session.filtered(&args.filter);
    let dimensions = if args.dimensions.is_empty() {
        aggregate::chart_dimensions(&view)
    } else {
        args.dimensions.clone()
    };
    let charts = dimensions
        .into_iter()
        .map(|dimension| aggregate::breakdown(&view, dimension))
        .collect::<Result<Vec<_>>>()?;
    let report = Report::new(report::breakdown_grid(&charts), &charts)?;
    emit(&report, &args.output)
}

pub fn pivot(config: Option<&Path>, args: &PivotArgs) -> Result<()> {
    let session = Session::open(config, &args.input)?;
    let view = session.filtered(&args.filter);
    let mut request = AggregationRequest::one_way(args.row_dimension, args.value)
        .normalized(args.percent);
    if let Some(columns) = args.column_dimension {
        request = request.by_columns(columns);
    }
    let aggregation = aggregate::aggregate(&view, &request)?;
    let report = Report::new(report::aggregation_grid(&aggregation), &aggregation)?;
    emit(&report, &args.output)
}

pub fn approval(config: Option<&Path>, args: &ApprovalArgs) -> Result<()> {
    let session = Session::open(config, &args.input)?;
    let view = session.filtered(&args.filter);
    let rows = aggregate::approval_summary(&view, &session.config().approved_status);
    let report = Report::new(report::approval_grid(&rows, session.config()), &rows)?;
    emit(&report, &args.output)
}

pub fn options(config: Option<&Path>, args: &OptionsArgs) -> Result<()> {
    let session = Session::open(config, &args.input)?;
    let view = session.filtered(&args.filter);
    let options = filter::options(&view);
    let report = Report::new(report::options_grid(&options), &options)?;
    emit(&report, &args.output)
}

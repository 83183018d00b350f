use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::{
    aggregate::Metric, data::parse_naive_date, dimension::Dimension, filter::parse_selection,
    report::OutputFormat,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Bucket, reconcile and cross-tabulate loan application spreadsheets",
    long_about = None
)]
pub struct Cli {
    /// YAML file overriding column names, reference layout and tokens
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Export the filtered rows joined to the media-code master
    Rows(RowsArgs),
    /// Count and total amount per band for each chart dimension
    Chart(ChartArgs),
    /// One-way summary or two-way cross-tabulation
    Pivot(PivotArgs),
    /// Approval rate per media name, highest first
    Approval(ApprovalArgs),
    /// Row count, date bounds and filter choices for the current filters
    Options(OptionsArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Applicant sheet (.xlsx, .xls, .xlsm, .xlsb, .ods, .csv, .tsv or - for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Media-code master (defaults to the configured reference path)
    #[arg(short = 'r', long = "reference")]
    pub reference: Option<PathBuf>,
    /// Worksheet of the applicant workbook, by 0-based index or name
    #[arg(long)]
    pub sheet: Option<String>,
    /// Worksheet of the media-code master, by 0-based index or name
    #[arg(long = "reference-sheet")]
    pub reference_sheet: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of delimited inputs (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    /// First application date to keep (inclusive)
    #[arg(long, value_parser = parse_date)]
    pub from: Option<NaiveDate>,
    /// Last application date to keep (inclusive)
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,
    /// Categorical selection such as `prefecture=東京都,大阪府`
    #[arg(long = "select", action = clap::ArgAction::Append, value_parser = parse_select)]
    pub selections: Vec<(Dimension, Vec<String>)>,
    /// Keep only these categories
    #[arg(long, value_delimiter = ',', action = clap::ArgAction::Append)]
    pub category: Vec<String>,
    /// Keep only these media names
    #[arg(long, value_delimiter = ',', action = clap::ArgAction::Append)]
    pub media: Vec<String>,
    /// Keep only these approval statuses
    #[arg(long, value_delimiter = ',', action = clap::ArgAction::Append)]
    pub approval: Vec<String>,
    /// Keep only these genders (`male`, `female`, or the raw cell text)
    #[arg(long, value_delimiter = ',', action = clap::ArgAction::Append)]
    pub gender: Vec<String>,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,
    /// CSV delimiter for output (defaults from the output extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for output (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Prefix UTF-8 output with a byte order mark for spreadsheet tools
    #[arg(long)]
    pub bom: bool,
}

#[derive(Debug, Args)]
pub struct RowsArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub filter: FilterArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ChartArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub filter: FilterArgs,
    #[command(flatten)]
    pub output: OutputArgs,
    /// Chart only these dimensions (every populated chart dimension if omitted)
    #[arg(short = 'd', long = "dimension", value_enum, action = clap::ArgAction::Append)]
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Args)]
pub struct PivotArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub filter: FilterArgs,
    #[command(flatten)]
    pub output: OutputArgs,
    /// Row dimension
    #[arg(long = "rows", value_enum)]
    pub row_dimension: Dimension,
    /// Column dimension for a cross-tabulation
    #[arg(long = "columns", value_enum)]
    pub column_dimension: Option<Dimension>,
    /// Measure per cell
    #[arg(long, value_enum, default_value_t = Metric::Count)]
    pub value: Metric,
    /// Show each cell as a percentage of its row total
    #[arg(long)]
    pub percent: bool,
}

#[derive(Debug, Args)]
pub struct ApprovalArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub filter: FilterArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct OptionsArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub filter: FilterArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    parse_naive_date(value.trim()).map_err(|err| err.to_string())
}

fn parse_select(value: &str) -> Result<(Dimension, Vec<String>), String> {
    parse_selection(value).map_err(|err| err.to_string())
}

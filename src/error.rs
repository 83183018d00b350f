use thiserror::Error;

/// Domain errors a user can act on. I/O and parse failures travel as
/// `anyhow::Error` with context instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input sheet has no header row")]
    EmptySheet,
    #[error(
        "none of the disbursement columns are present in the input (expected one of: {})",
        .expected.join(", ")
    )]
    MissingAmountColumns { expected: Vec<String> },
    #[error(
        "dimension '{requested}' is not available in this dataset (available: {})",
        .available.join(", ")
    )]
    DimensionUnavailable {
        requested: String,
        available: Vec<String>,
    },
    #[error("unknown dimension '{token}' (known: {})", .known.join(", "))]
    UnknownDimension { token: String, known: Vec<String> },
    #[error("invalid selection '{0}': expected dimension=value[,value...]")]
    InvalidSelection(String),
    #[error("could not read the values of selection '{expr}': {cause}")]
    MalformedSelection { expr: String, cause: csv::Error },
}

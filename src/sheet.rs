//! Loading uploads and reference masters into an untyped grid.
//!
//! Spreadsheets (`xlsx`, `xlsm`, `xlsb`, `xls`, `ods`) are read eagerly with
//! `calamine`; delimited text goes through the CSV reader in [`io_utils`].
//! The first row is always the header row.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use calamine::{Data, DataType, Reader, open_workbook_auto};
use encoding_rs::Encoding;
use log::{debug, info};

use crate::{data::RawCell, error::PipelineError, io_utils};

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions<'a> {
    /// Worksheet by 0-based index or by name; first sheet when `None`.
    pub sheet: Option<&'a str>,
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self {
            sheet: None,
            delimiter: None,
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<RawCell>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> &RawCell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&RawCell::Empty)
    }

    pub fn load(path: &Path, options: &LoadOptions<'_>) -> Result<Self> {
        let table = if is_spreadsheet(path) {
            Self::from_workbook(path, options.sheet)?
        } else {
            Self::from_delimited(path, options)?
        };
        info!(
            "Loaded {} row(s) x {} column(s) from {:?}",
            table.len(),
            table.headers.len(),
            path
        );
        Ok(table)
    }

    pub fn from_workbook(path: &Path, sheet: Option<&str>) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|err| anyhow!("Opening workbook {path:?}: {err}"))?;
        let sheet_names = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(anyhow!("Workbook {path:?} has no worksheets"));
        }
        let range = match sheet {
            Some(selector) => match selector.parse::<usize>() {
                Ok(idx) => workbook
                    .worksheet_range_at(idx)
                    .ok_or_else(|| anyhow!("No worksheet at index {idx} in {path:?}"))?
                    .map_err(|err| anyhow!("Reading worksheet {idx} of {path:?}: {err}"))?,
                Err(_) => workbook
                    .worksheet_range(selector)
                    .map_err(|err| anyhow!("Reading worksheet '{selector}' of {path:?}: {err}"))?,
            },
            None => workbook
                .worksheet_range_at(0)
                .ok_or_else(|| anyhow!("No first worksheet in {path:?}"))?
                .map_err(|err| anyhow!("Reading first worksheet of {path:?}: {err}"))?,
        };
        debug!("Worksheets in {:?}: {:?}", path, sheet_names);

        let mut rows = range.rows();
        let header_row = rows.next().ok_or(PipelineError::EmptySheet)?;
        let headers = header_row
            .iter()
            .enumerate()
            .map(|(idx, cell)| header_text(idx, cell))
            .collect::<Vec<_>>();
        let width = headers.len();
        let body = rows
            .map(|row| {
                let mut cells = row.iter().map(cell_from_excel).collect::<Vec<_>>();
                cells.resize(width, RawCell::Empty);
                cells
            })
            .collect();
        Ok(Self::new(headers, body))
    }

    pub fn from_delimited(path: &Path, options: &LoadOptions<'_>) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        let headers = io_utils::reader_headers(&mut reader, options.encoding)
            .with_context(|| format!("Reading headers from {path:?}"))?;
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(PipelineError::EmptySheet.into());
        }
        let width = headers.len();
        let mut rows = Vec::new();
        for (row_idx, record) in reader.byte_records().enumerate() {
            let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
            let decoded = io_utils::decode_record(&record, options.encoding)
                .with_context(|| format!("Decoding row {}", row_idx + 2))?;
            let mut cells = decoded
                .into_iter()
                .map(|field| {
                    if field.is_empty() {
                        RawCell::Empty
                    } else {
                        RawCell::Text(field)
                    }
                })
                .collect::<Vec<_>>();
            cells.resize(width, RawCell::Empty);
            rows.push(cells);
        }
        Ok(Self::new(headers, rows))
    }
}

pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn header_text(idx: usize, cell: &Data) -> String {
    let text = cell.as_string().unwrap_or_else(|| cell.to_string());
    if text.trim().is_empty() {
        format!("column_{}", idx + 1)
    } else {
        text
    }
}

fn cell_from_excel(cell: &Data) -> RawCell {
    match cell {
        Data::Empty | Data::Error(_) => RawCell::Empty,
        Data::String(s) => RawCell::Text(s.clone()),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Float(f) => RawCell::Number(*f),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(RawCell::DateTime)
            .unwrap_or_else(|| RawCell::Text(cell.to_string())),
        Data::DurationIso(s) => RawCell::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn spreadsheet_detection_is_case_insensitive() {
        assert!(is_spreadsheet(Path::new("upload.XLSX")));
        assert!(is_spreadsheet(Path::new("master.xls")));
        assert!(!is_spreadsheet(Path::new("upload.csv")));
        assert!(!is_spreadsheet(Path::new("-")));
    }

    #[test]
    fn excel_cells_map_to_raw_cells() {
        assert_eq!(cell_from_excel(&Data::Int(7)), RawCell::Number(7.0));
        assert_eq!(
            cell_from_excel(&Data::String("abc".into())),
            RawCell::Text("abc".into())
        );
        assert_eq!(cell_from_excel(&Data::Empty), RawCell::Empty);
    }

    #[test]
    fn delimited_rows_are_padded_to_header_width() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("upload.csv");
        let mut file = std::fs::File::create(&path).expect("create csv");
        writeln!(file, "a,b,c").unwrap();
        writeln!(file, "1,,3").unwrap();
        writeln!(file, "4").unwrap();
        drop(file);

        let table = RawTable::load(&path, &LoadOptions::default()).expect("load csv");
        assert_eq!(table.headers, vec!["a", "b", "c"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 1), &RawCell::Empty);
        assert_eq!(table.cell(1, 0), &RawCell::Text("4".into()));
        assert_eq!(table.cell(1, 2), &RawCell::Empty);
    }

    #[test]
    fn utf8_bom_is_stripped_from_first_header() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bom.csv");
        std::fs::write(&path, b"\xEF\xBB\xBFid,name\n1,x\n").expect("write csv");
        let table = RawTable::load(&path, &LoadOptions::default()).expect("load csv");
        assert_eq!(table.headers[0], "id");
    }
}

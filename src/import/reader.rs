//! Blocking tabular readers. Called from `spawn_blocking` one chunk at a time.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::{ByteRecord, ReaderBuilder};

use super::columns::{normalize_heading, POSITIONAL_HEADINGS};
use crate::error::ImportError;

/// One data row; `None` marks an empty or undecodable cell.
pub type RawRow = Vec<Option<String>>;

enum Source {
    Csv {
        rdr: csv::Reader<BufReader<File>>,
        record: ByteRecord,
    },
    // calamine materialises the sheet; rows are still handed out in chunks.
    Sheet {
        rows: std::vec::IntoIter<RawRow>,
    },
}

pub struct TabularReader {
    file_name: String,
    source: Source,
}

fn decode_cell(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn sheet_cell(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn positional_headers() -> Vec<String> {
    POSITIONAL_HEADINGS.iter().map(|h| h.to_string()).collect()
}

#[derive(Clone, Copy)]
enum Format {
    Csv,
    Sheet,
}

fn format_of(path: &Path) -> Option<Format> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" | "txt" => Some(Format::Csv),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Format::Sheet),
        _ => None,
    }
}

impl TabularReader {
    /// Opens `path` and returns the normalised header alongside the reader.
    pub fn open(
        path: &Path,
        file_name: &str,
        heading_row: bool,
    ) -> Result<(Vec<String>, Self), ImportError> {
        let parse_err = |msg: String| ImportError::parse(file_name, msg);
        let format = format_of(path).ok_or_else(|| {
            parse_err(format!(
                "unsupported file type {:?}",
                path.extension().unwrap_or_default()
            ))
        })?;

        let (headers, source) = match format {
            Format::Csv => {
                let file = File::open(path).map_err(|e| parse_err(format!("open: {e}")))?;
                let mut rdr = ReaderBuilder::new()
                    .has_headers(heading_row)
                    .flexible(true)
                    .trim(csv::Trim::None)
                    .from_reader(BufReader::with_capacity(1 << 20, file));
                let headers = if heading_row {
                    rdr.byte_headers()
                        .map_err(|e| parse_err(format!("header: {e}")))?
                        .iter()
                        .map(|h| normalize_heading(&String::from_utf8_lossy(h)))
                        .collect()
                } else {
                    positional_headers()
                };
                (
                    headers,
                    Source::Csv {
                        rdr,
                        record: ByteRecord::new(),
                    },
                )
            }
            Format::Sheet => {
                let mut workbook =
                    open_workbook_auto(path).map_err(|e| parse_err(format!("open: {e}")))?;
                let range = workbook
                    .worksheet_range_at(0)
                    .ok_or_else(|| parse_err("workbook has no sheets".to_string()))?
                    .map_err(|e| parse_err(format!("sheet: {e}")))?;
                let mut rows = range
                    .rows()
                    .map(|cells| cells.iter().map(sheet_cell).collect::<RawRow>());
                let headers = if heading_row {
                    rows.next()
                        .ok_or_else(|| parse_err("sheet is empty".to_string()))?
                        .into_iter()
                        .map(|h| normalize_heading(h.as_deref().unwrap_or_default()))
                        .collect()
                } else {
                    positional_headers()
                };
                let rest: Vec<RawRow> = rows.collect();
                (
                    headers,
                    Source::Sheet {
                        rows: rest.into_iter(),
                    },
                )
            }
        };

        Ok((
            headers,
            Self {
                file_name: file_name.to_string(),
                source,
            },
        ))
    }

    /// Up to `max` rows. Fewer than `max` means the source is exhausted.
    pub fn read_chunk(&mut self, max: usize) -> Result<Vec<RawRow>, ImportError> {
        let mut out = Vec::with_capacity(max.min(4096));
        match &mut self.source {
            Source::Csv { rdr, record } => {
                while out.len() < max {
                    let more = rdr.read_byte_record(record).map_err(|e| {
                        ImportError::parse(&self.file_name, format!("read failed: {e}"))
                    })?;
                    if !more {
                        break;
                    }
                    out.push(record.iter().map(decode_cell).collect());
                }
            }
            Source::Sheet { rows } => out.extend(rows.by_ref().take(max)),
        }
        Ok(out)
    }
}

//! Comma-separated tables with a single header row.
//!
//! Batch files, the merged dataset, the work-item list, the failure log and the
//! reports all share this format, so the reader and writer live together.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::mem::take;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::util::{ensure_parent, write_atomic};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
    }

    /// Data cell at `row`/`col`, counting rows after the header.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .map(String::as_str)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_row(&mut buf, &self.headers);
        for row in &self.rows {
            push_row(&mut buf, row);
        }
        buf
    }
}

pub fn headers_of(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

/// Quote- and CRLF-tolerant parser. Blank lines are dropped.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() == 1 && row[0].is_empty() {
                    row.clear();
                } else {
                    rows.push(take(&mut row));
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

pub fn parse_table(text: &str) -> Table {
    let mut rows = parse_rows(text).into_iter();
    let headers = rows.next().unwrap_or_default();
    Table {
        headers,
        rows: rows.collect(),
    }
}

pub fn read_table(path: &Path) -> Result<Table> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_table(&text))
}

/// Header row only, without reading the body. Header cells never span lines.
pub fn read_headers(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut line = String::new();
    BufReader::new(file)
        .read_line(&mut line)
        .with_context(|| format!("failed to read header of {}", path.display()))?;
    Ok(parse_rows(&line).into_iter().next().unwrap_or_default())
}

/// Replaces `path` with the full table.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    write_atomic(path, &table.to_bytes())
}

/// Appends rows, writing `headers` first when the file does not exist yet.
/// An existing file must carry the same header.
pub fn append_rows(path: &Path, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
    if path.exists() {
        let existing = read_headers(path)?;
        if existing != headers {
            bail!(
                "refusing to append to {}: header mismatch (found {:?})",
                path.display(),
                existing
            );
        }
    } else {
        ensure_parent(path)?;
    }

    let write_header = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    let mut out = BufWriter::new(file);

    let mut buf = Vec::new();
    if write_header {
        push_row(&mut buf, headers);
    }
    for row in rows {
        push_row(&mut buf, row);
    }

    out.write_all(&buf)
        .with_context(|| format!("failed to append to {}", path.display()))?;
    out.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    out.get_ref()
        .sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;

    Ok(())
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn push_row(buf: &mut Vec<u8>, row: &[String]) {
    for (idx, cell) in row.iter().enumerate() {
        if idx > 0 {
            buf.push(b',');
        }
        if needs_quotes(cell) {
            buf.push(b'"');
            buf.extend_from_slice(cell.replace('"', "\"\"").as_bytes());
            buf.push(b'"');
        } else {
            buf.extend_from_slice(cell.as_bytes());
        }
    }
    buf.push(b'\n');
}

//! io_utils
//! Reading and writing the delimited tables exchanged with lab processing jobs
//! and the specimen registry.
#![deny(missing_docs)]

use anyhow::{Context, Result};
use csv::StringRecord;
use itertools::Itertools;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Errors raised before any row is read.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// The file extension does not map to a known delimiter.
    #[error("Unrecognized file type '{extension}' for {path:?}; expected one of txt, tsv or csv")]
    UnrecognizedFileType {
        /// Offending path.
        path: PathBuf,
        /// Extension found, empty if there is none.
        extension: String,
    },
}

/// Field separator of a tabular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Tab separated (`.txt`, `.tsv`).
    Tab,
    /// Comma separated (`.csv`).
    Comma,
}

impl Delimiter {
    /// Pick the delimiter from the file extension.
    pub fn for_path(path: &Path) -> Result<Delimiter, TableError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "txt" | "tsv" => Ok(Delimiter::Tab),
            "csv" => Ok(Delimiter::Comma),
            _ => Err(TableError::UnrecognizedFileType {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Comma => b',',
        }
    }
}

/// An in-memory delimited table with a header row.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<StringRecord>,
    col_map: HashMap<String, usize>,
}

impl Table {
    /// Read `path`, choosing the delimiter from its extension. Header names are trimmed.
    pub fn read(path: &Path) -> Result<Table> {
        let delimiter = Delimiter::for_path(path)?;
        Self::read_with(path, delimiter, false)
    }

    /// Like [`Table::read`], but header names are also lowercased, as lab
    /// outputs do not agree on capitalization.
    pub fn read_normalized(path: &Path) -> Result<Table> {
        let delimiter = Delimiter::for_path(path)?;
        Self::read_with(path, delimiter, true)
    }

    /// Read `path` with an explicit delimiter.
    pub fn read_with(path: &Path, delimiter: Delimiter, lowercase_headers: bool) -> Result<Table> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter.as_byte())
            .from_reader(BufReader::new(file));

        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| path.display().to_string())?
            .iter()
            .map(|h| {
                let h = h.trim();
                if lowercase_headers {
                    h.to_lowercase()
                } else {
                    h.to_string()
                }
            })
            .collect();

        let rows: Vec<StringRecord> = rdr
            .records()
            .try_collect()
            .with_context(|| format!("Error reading rows of {}", path.display()))?;

        let col_map = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();

        Ok(Table {
            path: path.to_path_buf(),
            headers,
            rows,
            col_map,
        })
    }

    /// The file this table was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header names in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True if a column named `name` exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.col_map.contains_key(name)
    }

    /// Return the first of `candidates` present in the header.
    pub fn find_column<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates.iter().copied().find(|c| self.has_column(c))
    }

    /// Trimmed value at (`row`, `col`). None for a missing column or an empty cell.
    pub fn get(&self, row: usize, col: &str) -> Option<&str> {
        let i = *self.col_map.get(col)?;
        let v = self.rows.get(row)?.get(i)?.trim();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }

    /// Non-empty values of column `col`, or None if the column does not exist.
    pub fn column_values<'a>(&'a self, col: &str) -> Option<impl Iterator<Item = &'a str> + 'a> {
        let i = *self.col_map.get(col)?;
        Some(
            self.rows
                .iter()
                .filter_map(move |r| r.get(i).map(str::trim).filter(|v| !v.is_empty())),
        )
    }
}

/// Write a table with a header row. Missing values are written as empty cells.
pub fn write_table<H, R>(path: &Path, headers: &[H], rows: R) -> Result<()>
where
    H: AsRef<str>,
    R: IntoIterator<Item = Vec<Option<String>>>,
{
    let delimiter = Delimiter::for_path(path)?;
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter.as_byte())
        .from_writer(BufWriter::new(file));
    wtr.write_record(headers.iter().map(AsRef::as_ref))?;
    for row in rows {
        wtr.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
    }
    let mut inner = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    inner.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_for_path() {
        assert_eq!(Delimiter::for_path(Path::new("a/b.txt")).unwrap(), Delimiter::Tab);
        assert_eq!(Delimiter::for_path(Path::new("a/b.CSV")).unwrap(), Delimiter::Comma);
        assert!(matches!(
            Delimiter::for_path(Path::new("a/b.xlsx")),
            Err(TableError::UnrecognizedFileType { .. })
        ));
        assert!(Delimiter::for_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_read_normalized_tab() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "Guspec\tPTID\tresult\nA1\t100\t3.2\nA2\t101\t\n")?;

        let table = Table::read_normalized(&path)?;
        assert_eq!(table.headers(), &["guspec", "ptid", "result"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "guspec"), Some("A1"));
        assert_eq!(table.get(1, "result"), None);
        assert_eq!(table.find_column(&["guspec_core", "guspec"]), Some("guspec"));
        let ids: Vec<_> = table.column_values("guspec").unwrap().collect();
        assert_eq!(ids, vec!["A1", "A2"]);
        assert!(table.column_values("missing").is_none());
        Ok(())
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.csv");
        write_table(
            &path,
            &["a", "b"],
            vec![
                vec![Some("1".to_string()), None],
                vec![Some("2".to_string()), Some("x,y".to_string())],
            ],
        )?;
        let table = Table::read(&path)?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "b"), None);
        assert_eq!(table.get(1, "b"), Some("x,y"));
        Ok(())
    }
}

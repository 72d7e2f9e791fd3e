use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{LoadError, WriteError};

/// Row-oriented table loaded from a delimited text file.
///
/// Column order is whatever the header row said and never changes; new
/// columns only ever get appended. Empty fields load as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// Borrowed view of one row, addressed by column name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    headers: &'a [String],
    values: &'a [Option<String>],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.values.get(idx)?.as_deref()
    }

    /// Missing, or only whitespace.
    pub fn is_blank(&self, column: &str) -> bool {
        self.get(column).map_or(true, |v| v.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl TextEncoding {
    fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "ISO-8859-1",
        }
    }
}

impl Dataset {
    #[cfg(test)]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, None);
                r
            })
            .collect();
        Dataset { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            headers: &self.headers,
            values,
        })
    }

    #[cfg(test)]
    pub fn get(&self, index: usize, column: &str) -> Option<&str> {
        self.row(index)?.get(column)
    }

    /// Index of `column`, appending it (all values missing) if absent.
    pub fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(idx) = self.column_index(column) {
            return idx;
        }
        self.headers.push(column.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.headers.len() - 1
    }

    /// Overwrite one cell. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, column: usize, value: Option<String>) {
        if let Some(cell) = self.rows.get_mut(index).and_then(|r| r.get_mut(column)) {
            *cell = value;
        }
    }

    /// Rewrite every value of `column` in place. No-op when the column is absent.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> bool
    where
        F: FnMut(Option<&str>) -> Option<String>,
    {
        let Some(idx) = self.column_index(column) else {
            return false;
        };
        for row in &mut self.rows {
            row[idx] = f(row[idx].as_deref());
        }
        true
    }

    pub fn require_columns(&self, path: &Path, columns: &[&str]) -> Result<(), LoadError> {
        match columns.iter().find(|c| self.column_index(c).is_none()) {
            Some(missing) => Err(LoadError::MissingColumn {
                path: path.to_path_buf(),
                column: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Read a delimited file, trying UTF-8 first and ISO-8859-1 second.
    pub fn load(path: &Path) -> Result<Dataset, LoadError> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            _ => LoadError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let (text, encoding) = decode(bytes);
        if encoding != TextEncoding::Utf8 {
            warn!("UTF-8 decoding failed for {:?}, fell back to {}", path, encoding.label());
        }

        let dataset = parse(path, &text, delimiter_for(path))?;
        info!(
            "Loaded {} rows from {:?} using {}",
            dataset.len(),
            path,
            encoding.label()
        );
        Ok(dataset)
    }

    /// Write the whole table to `path`, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), WriteError> {
        let encode_err = |source| WriteError::Encode {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter_for(path))
            .from_writer(Vec::new());
        if !self.headers.is_empty() {
            writer.write_record(&self.headers).map_err(encode_err)?;
        }
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))
                .map_err(encode_err)?;
        }
        let bytes = writer.into_inner().map_err(|e| WriteError::Io {
            path: path.to_path_buf(),
            source: e.into_error(),
        })?;

        replace_file(path, &bytes).map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn decode(bytes: Vec<u8>) -> (String, TextEncoding) {
    match String::from_utf8(bytes) {
        Ok(mut text) => {
            if text.starts_with('\u{feff}') {
                text.remove(0);
            }
            (text, TextEncoding::Utf8)
        }
        // Every byte is a valid ISO-8859-1 code point, mapped 1:1 onto U+0000..U+00FF.
        Err(e) => (
            e.into_bytes().into_iter().map(char::from).collect(),
            TextEncoding::Latin1,
        ),
    }
}

/// Short records are padded with missing values; longer ones are an error.
fn parse(path: &Path, text: &str, delimiter: u8) -> Result<Dataset, LoadError> {
    let parse_err = |source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let width = headers.len();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_err)?;
        if record.len() > width {
            return Err(LoadError::TooManyFields {
                path: path.to_path_buf(),
                line: record.position().map_or(0, |p| p.line()),
                found: record.len(),
                expected: width,
            });
        }
        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|field| (!field.is_empty()).then(|| field.to_string()))
            .collect();
        row.resize(width, None);
        rows.push(row);
    }
    Ok(Dataset { headers, rows })
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

/// Replace `path` with `contents` via a synced sibling temp file and a rename,
/// so readers see either the old file or the new one.
pub fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp = temp_path(path);
    let result = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result?;
    sync_parent(path)
}

/// Persist the directory entry written by the rename.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// `.{name}.{pid}.tmp` next to the original.
fn temp_path(original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    original.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

//! Staged CSV files fed to the warehouse bulk load.
//!
//! Files follow the PostgreSQL `COPY ... (format csv)` conventions: every non-null value is
//! quoted with embedded quotes doubled, and `NULL` is an empty unquoted field.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::TableRow;

/// A CSV file being written into the staging directory.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl StagingFile {
    /// Creates a uniquely named file for `table` inside `directory`.
    pub async fn create(directory: &Path, table: &str) -> SyncResult<StagingFile> {
        tokio::fs::create_dir_all(directory).await?;

        let path = directory.join(format!("tiersync-{table}-{}.csv", Uuid::new_v4()));
        let file = File::create(&path).await?;
        debug!(path = %path.display(), "created staging file");

        Ok(StagingFile {
            path,
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, rows: &[TableRow]) -> SyncResult<()> {
        let mut buffer = String::new();
        for row in rows {
            encode_record(row, &mut buffer);
        }

        self.writer.write_all(buffer.as_bytes()).await?;
        self.rows += rows.len() as u64;

        Ok(())
    }

    /// Flushes the file and returns its path and the number of rows written.
    pub async fn finish(mut self) -> SyncResult<(PathBuf, u64)> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;

        Ok((self.path, self.rows))
    }
}

/// Deletes a staged file. Failures are logged, the file is left to the operator.
pub async fn remove_staging_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %err, "failed to remove staging file");
    }
}

/// Appends one record, newline terminated, to `buffer`.
pub fn encode_record(row: &TableRow, buffer: &mut String) {
    for (index, value) in row.values.iter().enumerate() {
        if index > 0 {
            buffer.push(',');
        }

        if let Some(text) = value.to_text() {
            buffer.push('"');
            buffer.push_str(&text.replace('"', "\"\""));
            buffer.push('"');
        }
    }
    buffer.push('\n');
}

/// Parses CSV text into records. Unquoted empty fields are `None`.
pub fn parse_records(text: &str) -> SyncResult<Vec<Vec<Option<String>>>> {
    let mut records = Vec::new();
    let mut record: Vec<Option<String>> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                quoted = true;
                in_quotes = true;
            }
            ',' => record.push(take_field(&mut field, &mut quoted)),
            '\n' => {
                record.push(take_field(&mut field, &mut quoted));
                records.push(std::mem::take(&mut record));
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            other => {
                if quoted {
                    bail!(
                        ErrorKind::DeserializationError,
                        "Malformed staging file",
                        format!("unexpected character '{other}' after a quoted field")
                    );
                }
                field.push(other);
            }
        }
    }

    if in_quotes {
        bail!(
            ErrorKind::DeserializationError,
            "Malformed staging file",
            "unterminated quoted field"
        );
    }

    if !field.is_empty() || quoted || !record.is_empty() {
        record.push(take_field(&mut field, &mut quoted));
        records.push(record);
    }

    Ok(records)
}

fn take_field(field: &mut String, quoted: &mut bool) -> Option<String> {
    let value = std::mem::take(field);
    let was_quoted = std::mem::replace(quoted, false);

    if value.is_empty() && !was_quoted {
        None
    } else {
        Some(value)
    }
}

/// Reads a staged file back into records. `None` marks a NULL field.
pub async fn read_staging_file(path: &Path) -> SyncResult<Vec<Vec<Option<String>>>> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_records(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    #[test]
    fn encodes_nulls_and_quotes() {
        let row = TableRow::new(vec![
            Cell::I64(1),
            Cell::Null,
            Cell::String("say \"hi\", bye".to_string()),
            Cell::String(String::new()),
        ]);
        let mut buffer = String::new();
        encode_record(&row, &mut buffer);
        assert_eq!(buffer, "\"1\",,\"say \"\"hi\"\", bye\",\"\"\n");
    }

    #[test]
    fn parses_what_it_encodes() {
        let rows = vec![
            TableRow::new(vec![Cell::I64(1), Cell::String("a\nb".to_string())]),
            TableRow::new(vec![Cell::Null, Cell::String(String::new())]),
        ];
        let mut buffer = String::new();
        for row in &rows {
            encode_record(row, &mut buffer);
        }

        let records = parse_records(&buffer).unwrap();
        assert_eq!(
            records,
            vec![
                vec![Some("1".to_string()), Some("a\nb".to_string())],
                vec![None, Some(String::new())],
            ]
        );
    }

    #[test]
    fn rejects_unterminated_quotes() {
        assert!(parse_records("\"abc").is_err());
    }

    #[tokio::test]
    async fn staging_file_round_trip() {
        let directory = std::env::temp_dir().join("tiersync-csv-test");
        let mut file = StagingFile::create(&directory, "patient").await.unwrap();
        file.append(&[TableRow::new(vec![Cell::I64(7), Cell::Bool(true)])])
            .await
            .unwrap();
        let (path, rows) = file.finish().await.unwrap();
        assert_eq!(rows, 1);

        let records = read_staging_file(&path).await.unwrap();
        assert_eq!(records, vec![vec![Some("7".to_string()), Some("true".to_string())]]);

        remove_staging_file(&path).await;
        assert!(!path.exists());
    }
}

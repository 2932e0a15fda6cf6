use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DataError, Result, TokenizationError};

/// One input document: field name to content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(field: &str, text: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.insert(field, Value::String(text.into()));
        record
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_owned(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusFormat {
    /// One JSON object per line.
    JsonLines,
    /// One document per non-empty line, stored under the text field.
    Text,
}

impl CorpusFormat {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("jsonl") | Some("ndjson") | Some("json") => CorpusFormat::JsonLines,
            _ => CorpusFormat::Text,
        }
    }
}

/// Ordered list of corpus files.
///
/// Records are yielded file by file, line by line, so the record order is
/// fully determined by the file list.
#[derive(Clone, Debug)]
pub struct CorpusFiles {
    files: Vec<PathBuf>,
    text_field: String,
}

impl CorpusFiles {
    pub fn new(files: Vec<PathBuf>, text_field: impl Into<String>) -> Result<Self> {
        if files.is_empty() {
            return Err(DataError::InvalidConfig(
                "expected at least one corpus file".into(),
            ));
        }

        let text_field = text_field.into();
        if text_field.is_empty() {
            return Err(DataError::InvalidConfig(
                "text field name must not be empty".into(),
            ));
        }

        log::debug!("corpus with {} file(s), text field '{}'", files.len(), text_field);
        Ok(Self { files, text_field })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn stream(&self) -> RecordStream {
        RecordStream {
            files: self.files.clone(),
            text_field: self.text_field.clone(),
            next_file: 0,
            current: None,
        }
    }
}

struct OpenFile {
    path: PathBuf,
    format: CorpusFormat,
    reader: BufReader<File>,
    line_no: usize,
}

impl OpenFile {
    /// Next raw line without its terminator, or `None` at end of file.
    fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }
}

pub struct RecordStream {
    files: Vec<PathBuf>,
    text_field: String,
    next_file: usize,
    current: Option<OpenFile>,
}

impl RecordStream {
    fn advance_file(&mut self) -> Result<bool> {
        let Some(path) = self.files.get(self.next_file).cloned() else {
            return Ok(false);
        };
        self.next_file += 1;

        log::info!(
            "reading corpus file {} of {}: {}",
            self.next_file,
            self.files.len(),
            path.display()
        );

        // Skipping an unreadable file would change the token stream silently.
        let file = File::open(&path)?;
        self.current = Some(OpenFile {
            format: CorpusFormat::detect(&path),
            path,
            reader: BufReader::new(file),
            line_no: 0,
        });
        Ok(true)
    }

    fn parse(&self, open: &OpenFile, line: String) -> Result<RawRecord> {
        match open.format {
            CorpusFormat::Text => Ok(RawRecord::from_text(&self.text_field, line)),
            CorpusFormat::JsonLines => {
                let fields: Map<String, Value> =
                    serde_json::from_str(&line).map_err(|source| DataError::Record {
                        path: open.path.clone(),
                        line: open.line_no,
                        source,
                    })?;
                Ok(RawRecord::from(fields))
            }
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(mut open) = self.current.take() {
                let bytes = match open.next_line() {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => continue,
                    Err(err) => {
                        self.current = Some(open);
                        return Some(Err(err.into()));
                    }
                };
                let item = match String::from_utf8(bytes) {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(self.parse(&open, line)),
                    Err(_) => Some(Err(TokenizationError::InvalidUtf8 {
                        path: open.path.clone(),
                        line: open.line_no,
                    }
                    .into())),
                };
                self.current = Some(open);
                match item {
                    Some(item) => return Some(item),
                    None => continue,
                }
            }

            match self.advance_file() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_files_in_order_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.jsonl");
        let second = dir.path().join("b.txt");
        fs::write(&first, "{\"text\": \"one\", \"id\": 1}\n\n{\"text\": \"two\"}\n").unwrap();
        fs::write(&second, "three\n   \nfour\n").unwrap();

        let corpus = CorpusFiles::new(vec![first, second], "text").unwrap();
        let texts: Vec<_> = corpus
            .stream()
            .map(|record| {
                record
                    .unwrap()
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap()
                    .to_owned()
            })
            .collect();

        assert_eq!(texts, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn malformed_json_names_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"text\": \"ok\"}\n{not json}\n").unwrap();

        let corpus = CorpusFiles::new(vec![path.clone()], "text").unwrap();
        let mut stream = corpus.stream();
        assert!(stream.next().unwrap().is_ok());
        match stream.next().unwrap() {
            Err(DataError::Record { path: p, line, .. }) => {
                assert_eq!(p, path);
                assert_eq!(line, 2);
            }
            other => panic!("expected record error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_names_file_and_line_and_keeps_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.txt");
        fs::write(&path, b"good line\r\nbad \xff\xfe line\nlast\n").unwrap();

        let corpus = CorpusFiles::new(vec![path.clone()], "text").unwrap();
        let mut stream = corpus.stream();

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.get("text").and_then(Value::as_str), Some("good line"));

        match stream.next().unwrap() {
            Err(DataError::Tokenization(TokenizationError::InvalidUtf8 { path: p, line })) => {
                assert_eq!(p, path);
                assert_eq!(line, 2);
            }
            other => panic!("expected invalid UTF-8 error, got {other:?}"),
        }

        let last = stream.next().unwrap().unwrap();
        assert_eq!(last.get("text").and_then(Value::as_str), Some("last"));
        assert!(stream.next().is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = CorpusFiles::new(vec![dir.path().join("absent.txt")], "text").unwrap();
        let first = corpus.stream().next().unwrap();
        assert!(matches!(first, Err(DataError::Io(_))));
    }

    #[test]
    fn rejects_empty_file_list() {
        assert!(matches!(
            CorpusFiles::new(Vec::new(), "text"),
            Err(DataError::InvalidConfig(_))
        ));
    }
}

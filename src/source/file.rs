use crate::core::{Fields, PipelineError, Record, RecordSource, RecordStream, Result};
use crate::source::attach_selector;
use async_trait::async_trait;
use futures::Stream;
use futures::stream::StreamExt;
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens `path` and yields its non-blank lines.
async fn data_lines(path: &Path) -> Result<LineStream> {
    let file = File::open(path).await?;
    let lines = LinesStream::new(BufReader::new(file).lines());
    Ok(Box::pin(lines.filter_map(|line| async move {
        match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(line)),
            Err(e) => Some(Err(PipelineError::Io(e))),
        }
    })))
}

async fn count_data_lines(path: &Path) -> Result<usize> {
    let mut lines = data_lines(path).await?;
    let mut count = 0;
    while let Some(line) = lines.next().await {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Delimited text file with a header row.
///
/// Rows are addressed by their position among non-blank data lines, so
/// `read_from(n)` is stable across calls as long as the file is unchanged.
/// Quoted fields are supported within a line but may not span lines.
pub struct CsvSource {
    file_path: PathBuf,
    has_header: bool,
    delimiter: u8,
    infer_types: bool,
    selector_fields: Vec<String>,
}

impl CsvSource {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            has_header: true,
            delimiter: b',',
            infer_types: true,
            selector_fields: Vec::new(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Keep every value as a string instead of detecting numbers and booleans.
    pub fn with_type_inference(mut self, infer_types: bool) -> Self {
        self.infer_types = infer_types;
        self
    }

    /// Columns copied into each record's selector, for update and delete.
    pub fn with_selector_fields(mut self, fields: Vec<String>) -> Self {
        self.selector_fields = fields;
        self
    }

    pub async fn headers(&self) -> Result<Vec<String>> {
        let mut lines = data_lines(&self.file_path).await?;
        let first_line = match lines.next().await {
            Some(line) => line?,
            None => {
                return Err(PipelineError::Source(anyhow::anyhow!(
                    "Empty CSV file: {}",
                    self.file_path.display()
                )));
            }
        };

        let values = split_row(&first_line, self.delimiter)?;
        if self.has_header {
            Ok(values.into_iter().map(|s| s.trim().to_string()).collect())
        } else {
            Ok((0..values.len()).map(|i| format!("column_{}", i)).collect())
        }
    }
}

#[async_trait]
impl RecordSource for CsvSource {
    async fn count_records(&self) -> Result<usize> {
        let lines = count_data_lines(&self.file_path).await?;
        Ok(if self.has_header {
            lines.saturating_sub(1)
        } else {
            lines
        })
    }

    async fn read_from(&self, offset: usize) -> Result<RecordStream> {
        let field_names = self.headers().await?;
        let delimiter = self.delimiter;
        let infer_types = self.infer_types;
        let selector_fields = self.selector_fields.clone();
        let skip = offset + usize::from(self.has_header);

        let stream = data_lines(&self.file_path)
            .await?
            .skip(skip)
            .map(move |line| -> Result<Record> {
                let values = split_row(&line?, delimiter)?;
                let data: Fields = field_names
                    .iter()
                    .zip(values)
                    .map(|(name, value)| {
                        let value = if infer_types {
                            infer_value(value.trim())
                        } else {
                            Value::String(value.trim().to_string())
                        };
                        (name.clone(), value)
                    })
                    .collect();
                Ok(attach_selector(Record::with_data(data), &selector_fields))
            });

        Ok(Box::pin(stream))
    }
}

fn split_row(line: &str, delimiter: u8) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(row) => Ok(row?.iter().map(str::to_string).collect()),
        None => Ok(Vec::new()),
    }
}

/// Empty -> null, then integer, float, boolean, falling back to string.
fn infer_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match raw {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// One JSON object per line.
pub struct JsonLinesSource {
    file_path: PathBuf,
    selector_fields: Vec<String>,
}

impl JsonLinesSource {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            selector_fields: Vec::new(),
        }
    }

    pub fn with_selector_fields(mut self, fields: Vec<String>) -> Self {
        self.selector_fields = fields;
        self
    }
}

#[async_trait]
impl RecordSource for JsonLinesSource {
    async fn count_records(&self) -> Result<usize> {
        count_data_lines(&self.file_path).await
    }

    async fn read_from(&self, offset: usize) -> Result<RecordStream> {
        let selector_fields = self.selector_fields.clone();
        let stream = data_lines(&self.file_path)
            .await?
            .skip(offset)
            .map(move |line| -> Result<Record> {
                match serde_json::from_str::<Value>(&line?)? {
                    Value::Object(data) => {
                        Ok(attach_selector(Record::with_data(data), &selector_fields))
                    }
                    _ => Err(PipelineError::Source(anyhow::anyhow!(
                        "Line is not a JSON object"
                    ))),
                }
            });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    async fn collect(stream: RecordStream) -> Vec<Record> {
        stream.map(|r| r.unwrap()).collect().await
    }

    #[tokio::test]
    async fn csv_counts_and_seeks_by_offset() {
        let file = write_file(concat!(
            "Name,Age,Billing Amount,Insured\n",
            "Ada,36,120.5,true\n\n",
            "Bob,,7,false\n",
            "\"Lee, C\",52,0.25,no\n",
        ));
        let source = CsvSource::new(file.path());

        assert_eq!(source.count_records().await.unwrap(), 3);
        assert_eq!(
            source.headers().await.unwrap(),
            vec!["Name", "Age", "Billing Amount", "Insured"]
        );

        let all = collect(source.read_from(0).await.unwrap()).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].get_field("Age"), Some(&json!(36)));
        assert_eq!(all[0].get_field("Billing Amount"), Some(&json!(120.5)));
        assert_eq!(all[0].get_field("Insured"), Some(&json!(true)));
        assert_eq!(all[1].get_field("Age"), Some(&Value::Null));
        assert_eq!(all[2].get_field("Name"), Some(&json!("Lee, C")));
        assert_eq!(all[2].get_field("Insured"), Some(&json!("no")));

        let tail = collect(source.read_from(2).await.unwrap()).await;
        assert_eq!(tail, all[2..].to_vec());
    }

    #[tokio::test]
    async fn csv_without_header_and_custom_delimiter() {
        let file = write_file("a;1\nb;2\n");
        let source = CsvSource::new(file.path())
            .with_header(false)
            .with_delimiter(b';')
            .with_type_inference(false)
            .with_selector_fields(vec!["column_0".to_string()]);

        assert_eq!(source.count_records().await.unwrap(), 2);
        let records = collect(source.read_from(1).await.unwrap()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_field("column_1"), Some(&json!("2")));
        assert_eq!(records[0].selector().unwrap()["column_0"], json!("b"));
    }

    #[tokio::test]
    async fn empty_csv_is_a_source_error() {
        let file = write_file("");
        let source = CsvSource::new(file.path());
        assert_eq!(source.count_records().await.unwrap(), 0);
        assert!(matches!(
            source.headers().await,
            Err(PipelineError::Source(_))
        ));
    }

    #[tokio::test]
    async fn json_lines_rejects_non_objects() {
        let file = write_file("{\"id\": 1}\n[1, 2]\n{\"id\": 3}\n");
        let source = JsonLinesSource::new(file.path());

        assert_eq!(source.count_records().await.unwrap(), 3);
        let results: Vec<Result<Record>> = source.read_from(1).await.unwrap().collect().await;
        assert!(matches!(results[0], Err(PipelineError::Source(_))));
        assert_eq!(
            results[1].as_ref().unwrap().get_field("id"),
            Some(&json!(3))
        );
    }
}

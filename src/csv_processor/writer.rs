use crate::csv_processor::columns::{columns_from_first, resolve_columns, ColumnDiscovery};
use crate::csv_processor::delimiter::{resolve_delimiter, Delimiter};
use crate::csv_processor::projector::project;
use crate::record::Record;
use crate::utils::{sanitize_cell, CsvTranslatorError, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub delimiter: Option<Delimiter>,
    /// Authoritative column list. `None` or empty means discover.
    pub columns: Option<Vec<String>>,
    /// Only consulted by write streams without `columns`.
    pub discovery: ColumnDiscovery,
    /// Quote-prefix cells that start like a spreadsheet formula.
    pub sanitize_formulas: bool,
}

impl WriteOptions {
    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_discovery(mut self, discovery: ColumnDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_sanitized_formulas(mut self) -> Self {
        self.sanitize_formulas = true;
        self
    }

    fn explicit_columns(&self) -> Option<&[String]> {
        self.columns.as_deref().filter(|c| !c.is_empty())
    }
}

fn csv_writer<W: Write>(destination: W, delimiter: Delimiter) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(delimiter.as_byte())
        .has_headers(false)
        .from_writer(destination)
}

// A table without columns has no header and no rows.
fn write_header<W: Write>(writer: &mut csv::Writer<W>, columns: &[String]) -> Result<()> {
    if columns.is_empty() {
        return Ok(());
    }
    writer
        .write_record(columns)
        .map_err(CsvTranslatorError::from_write)
}

fn write_row<W: Write>(
    writer: &mut csv::Writer<W>,
    record: &Record,
    columns: &[String],
    sanitize: bool,
) -> Result<()> {
    if columns.is_empty() {
        return Ok(());
    }
    let values = project(record, columns);
    let written = if sanitize {
        writer.write_record(values.iter().map(|v| sanitize_cell(v)))
    } else {
        writer.write_record(&values)
    };
    written.map_err(CsvTranslatorError::from_write)
}

/// Serialises a batch into memory: header, then one projected row per record.
pub fn encode_records(
    records: &[Record],
    delimiter: Delimiter,
    options: &WriteOptions,
) -> Result<Vec<u8>> {
    let columns = resolve_columns(records, options.explicit_columns());
    tracing::debug!(columns = ?columns, %delimiter, rows = records.len(), "Resolved batch columns");

    let mut writer = csv_writer(Vec::new(), delimiter);
    write_header(&mut writer, &columns)?;
    for record in records {
        write_row(&mut writer, record, &columns, options.sanitize_formulas)?;
    }
    writer
        .into_inner()
        .map_err(|e| CsvTranslatorError::IoError(e.into_error()))
}

/// Replaces `path` with `bytes` via a temporary file in the same directory,
/// so the destination is either fully written or left as it was.
pub fn persist_atomically(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(bytes)?;
    temp_file.flush()?;
    temp_file
        .persist(path)
        .map_err(|e| CsvTranslatorError::IoError(e.error))?;
    Ok(())
}

/// Writes a whole batch to `path`, replacing any existing content.
pub fn write_all(path: impl AsRef<Path>, records: &[Record], options: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    let delimiter = resolve_delimiter(path, options.delimiter);
    let bytes = encode_records(records, delimiter, options)?;
    persist_atomically(path, &bytes)?;
    tracing::info!(path = %path.display(), rows = records.len(), bytes = bytes.len(), "Wrote records");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Waiting for the first record to fix the columns.
    Open,
    Buffering,
    Streaming,
    Flushed,
}

enum Mode {
    AwaitingFirst,
    Buffering(Vec<Record>),
    Streaming(Vec<String>),
    Flushed,
}

/// Push-based record sink. The sub-mode is chosen once, at construction:
/// explicit columns stream immediately, otherwise `ColumnDiscovery` decides
/// between buffering until `end` and committing to the first record.
pub struct RecordSink<W: Write> {
    writer: Option<csv::Writer<W>>,
    mode: Mode,
    sanitize: bool,
    rows_written: usize,
}

impl<W: Write> RecordSink<W> {
    pub fn new(destination: W, delimiter: Delimiter, options: &WriteOptions) -> Result<Self> {
        let mut writer = csv_writer(destination, delimiter);

        let mode = match options.explicit_columns() {
            Some(columns) => {
                write_header(&mut writer, columns)?;
                Mode::Streaming(columns.to_vec())
            }
            None => match options.discovery {
                ColumnDiscovery::Buffered => Mode::Buffering(Vec::new()),
                ColumnDiscovery::FirstRecord => Mode::AwaitingFirst,
            },
        };

        Ok(Self {
            writer: Some(writer),
            mode,
            sanitize: options.sanitize_formulas,
            rows_written: 0,
        })
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Err(CsvTranslatorError::closed_stream("write")),
        };

        match &mut self.mode {
            Mode::Flushed => return Err(CsvTranslatorError::closed_stream("write")),
            Mode::Buffering(held) => {
                held.push(record.clone());
                return Ok(());
            }
            Mode::AwaitingFirst => {
                let columns = columns_from_first(record);
                tracing::debug!(columns = ?columns, "Columns fixed by first record");
                write_header(writer, &columns)?;
                write_row(writer, record, &columns, self.sanitize)?;
                self.mode = Mode::Streaming(columns);
            }
            Mode::Streaming(columns) => {
                write_row(writer, record, columns, self.sanitize)?;
            }
        }

        self.rows_written += 1;
        Ok(())
    }

    /// Signals end of input: buffered records are written under the
    /// discovered columns, the destination is flushed and closed.
    pub fn end(&mut self) -> Result<usize> {
        self.finalize()?;
        Ok(self.rows_written)
    }

    /// Like [`RecordSink::end`], but hands the destination back.
    pub fn finish(mut self) -> Result<W> {
        self.finalize()
    }

    pub fn state(&self) -> SinkState {
        match self.mode {
            Mode::AwaitingFirst => SinkState::Open,
            Mode::Buffering(_) => SinkState::Buffering,
            Mode::Streaming(_) => SinkState::Streaming,
            Mode::Flushed => SinkState::Flushed,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn finalize(&mut self) -> Result<W> {
        let mode = std::mem::replace(&mut self.mode, Mode::Flushed);
        let mut writer = match (&mode, self.writer.take()) {
            (Mode::Flushed, _) | (_, None) => return Err(CsvTranslatorError::closed_stream("end")),
            (_, Some(writer)) => writer,
        };

        if let Mode::Buffering(held) = mode {
            let columns = resolve_columns(&held, None);
            tracing::debug!(columns = ?columns, rows = held.len(), "Flushing buffered records");
            write_header(&mut writer, &columns)?;
            for record in &held {
                write_row(&mut writer, record, &columns, self.sanitize)?;
                self.rows_written += 1;
            }
        }

        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| CsvTranslatorError::IoError(e.into_error()))
    }
}

impl RecordSink<File> {
    pub fn create(path: impl AsRef<Path>, options: &WriteOptions) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = resolve_delimiter(path, options.delimiter);
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), %delimiter, "Opened record sink");
        Self::new(file, delimiter, options)
    }
}

enum SinkCommand {
    Write(Record),
    End,
}

/// Async handle over a [`RecordSink`] running on a blocking worker. The
/// channel is bounded, so `write` waits while the worker is behind.
pub struct AsyncRecordSink {
    tx: Option<mpsc::Sender<SinkCommand>>,
    worker: Option<JoinHandle<Result<usize>>>,
}

impl AsyncRecordSink {
    pub fn spawn<W>(mut sink: RecordSink<W>, capacity: usize) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<SinkCommand>(capacity.max(1));

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    SinkCommand::Write(record) => {
                        if let Err(e) = sink.write(&record) {
                            tracing::error!("Failed to write record: {}", e);
                            return Err(e);
                        }
                    }
                    SinkCommand::End => return sink.end(),
                }
            }
            tracing::warn!(
                rows_written = sink.rows_written(),
                "Record sink dropped before end of input"
            );
            Err(CsvTranslatorError::ChannelClosed)
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub async fn write(&mut self, record: Record) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| CsvTranslatorError::closed_stream("write"))?;

        if tx.send(SinkCommand::Write(record)).await.is_err() {
            self.tx = None;
            return match self.join_worker().await {
                Err(e) => Err(e),
                Ok(_) => Err(CsvTranslatorError::ChannelClosed),
            };
        }
        Ok(())
    }

    /// Signals end of input and waits for the worker to flush and close the
    /// destination. Returns the number of rows written.
    pub async fn end(&mut self) -> Result<usize> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| CsvTranslatorError::closed_stream("end"))?;

        // A failed send means the worker already stopped; its result says why.
        let _ = tx.send(SinkCommand::End).await;
        drop(tx);
        self.join_worker().await
    }

    pub fn is_flushed(&self) -> bool {
        self.tx.is_none()
    }

    async fn join_worker(&mut self) -> Result<usize> {
        match self.worker.take() {
            Some(worker) => worker
                .await
                .map_err(|e| CsvTranslatorError::TaskFailed(e.to_string()))?,
            None => Err(CsvTranslatorError::closed_stream("end")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_processor::reader::{read_all, ReadOptions};
    use std::fs;
    use tempfile::TempDir;

    fn encode(records: &[Record], options: &WriteOptions) -> String {
        let bytes = encode_records(records, Delimiter::COMMA, options).expect("encode");
        String::from_utf8(bytes).expect("utf8")
    }

    fn sink_output(records: &[Record], options: &WriteOptions) -> String {
        let mut sink = RecordSink::new(Vec::new(), Delimiter::COMMA, options).expect("sink");
        for record in records {
            sink.write(record).expect("write");
        }
        String::from_utf8(sink.finish().expect("finish")).expect("utf8")
    }

    #[test]
    fn test_encode_union_columns() {
        let records = vec![Record::from([("a", "1")]), Record::from([("a", "3"), ("b", "4")])];
        assert_eq!(encode(&records, &WriteOptions::default()), "a,b\n1,\n3,4\n");
    }

    #[test]
    fn test_encode_restricted_columns() {
        let records = vec![Record::from([("a", "1"), ("b", "2")]), Record::from([("a", "3")])];
        let options = WriteOptions::default().with_columns(["a"]);
        assert_eq!(encode(&records, &options), "a\n1\n3\n");
    }

    #[test]
    fn test_encode_quotes_delimiters() {
        let records = vec![Record::from([("a", "x,y"), ("b", "plain")])];
        assert_eq!(encode(&records, &WriteOptions::default()), "a,b\n\"x,y\",plain\n");
    }

    #[test]
    fn test_encode_empty_batch() {
        assert_eq!(encode(&[], &WriteOptions::default()), "");
        let options = WriteOptions::default().with_columns(["a", "b"]);
        assert_eq!(encode(&[], &options), "a,b\n");
    }

    #[test]
    fn test_encode_sanitized() {
        let records = vec![Record::from([("f", "=1+1")])];
        let options = WriteOptions::default().with_sanitized_formulas();
        assert_eq!(encode(&records, &options), "f\n'=1+1\n");
    }

    #[test]
    fn test_sink_buffered_discovers_union() {
        let records = vec![
            Record::from([("a", "1"), ("b", "2")]),
            Record::from([("a", "3"), ("c", "4")]),
        ];
        assert_eq!(sink_output(&records, &WriteOptions::default()), "a,b,c\n1,2,\n3,,4\n");
    }

    #[test]
    fn test_sink_first_record_drops_late_columns() {
        let records = vec![
            Record::from([("a", "1"), ("b", "2")]),
            Record::from([("a", "3"), ("c", "4")]),
        ];
        let options = WriteOptions::default().with_discovery(ColumnDiscovery::FirstRecord);
        assert_eq!(sink_output(&records, &options), "a,b\n1,2\n3,\n");
    }

    #[test]
    fn test_sink_explicit_columns_stream() {
        let options = WriteOptions::default().with_columns(["a", "c"]);
        let mut sink = RecordSink::new(Vec::new(), Delimiter::COMMA, &options).unwrap();
        assert_eq!(sink.state(), SinkState::Streaming);

        sink.write(&Record::from([("a", "1"), ("b", "2")])).unwrap();
        sink.write(&Record::from([("a", "3"), ("c", "4")])).unwrap();
        assert_eq!(sink.rows_written(), 2);

        let out = String::from_utf8(sink.finish().unwrap()).unwrap();
        assert_eq!(out, "a,c\n1,\n3,4\n");
    }

    #[test]
    fn test_sink_states() {
        let mut sink = RecordSink::new(Vec::new(), Delimiter::COMMA, &WriteOptions::default()).unwrap();
        assert_eq!(sink.state(), SinkState::Buffering);
        sink.write(&Record::from([("a", "1")])).unwrap();
        assert_eq!(sink.rows_written(), 0);

        assert_eq!(sink.end().unwrap(), 1);
        assert_eq!(sink.state(), SinkState::Flushed);

        let err = sink.write(&Record::from([("a", "2")])).unwrap_err();
        assert!(matches!(err, CsvTranslatorError::StateError(_)));
        assert!(matches!(sink.end(), Err(CsvTranslatorError::StateError(_))));
    }

    #[test]
    fn test_sink_first_record_state() {
        let options = WriteOptions::default().with_discovery(ColumnDiscovery::FirstRecord);
        let mut sink = RecordSink::new(Vec::new(), Delimiter::TAB, &options).unwrap();
        assert_eq!(sink.state(), SinkState::Open);
        sink.write(&Record::from([("a", "1"), ("b", "2")])).unwrap();
        assert_eq!(sink.state(), SinkState::Streaming);
        assert_eq!(String::from_utf8(sink.finish().unwrap()).unwrap(), "a\tb\n1\t2\n");
    }

    #[test]
    fn test_write_all_replaces_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("out.tsv");
        fs::write(&path, "OLD_CONTENT").unwrap();

        let records = vec![Record::from([("a", "1"), ("b", "2")])];
        write_all(&path, &records, &WriteOptions::default()).expect("write");

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\tb\n1\t2\n");
        assert_eq!(read_all(&path, &ReadOptions::default()).unwrap(), records);

        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temporary file should not linger");
    }

    #[test]
    fn test_write_all_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("out.csv");
        let err = write_all(&path, &[Record::from([("a", "1")])], &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, CsvTranslatorError::IoError(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_all_failed_persist_keeps_destination() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.csv");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep.txt"), "KEEP").unwrap();

        let err = write_all(&path, &[Record::from([("a", "1")])], &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, CsvTranslatorError::IoError(_)));

        assert!(path.is_dir());
        assert_eq!(fs::read_to_string(path.join("keep.txt")).unwrap(), "KEEP");
        assert_eq!(fs::read_dir(&path).unwrap().count(), 1);
        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temporary file should not linger");
    }

    struct DiskFull;

    impl Write for DiskFull {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    fn is_disk_full(err: &CsvTranslatorError) -> bool {
        matches!(err, CsvTranslatorError::IoError(e) if e.to_string() == "disk full")
    }

    #[tokio::test]
    async fn test_async_sink_worker_failure_reported_by_write() {
        let options = WriteOptions::default().with_columns(["a", "b"]);
        let sink = RecordSink::new(DiskFull, Delimiter::COMMA, &options).unwrap();
        let mut sink = AsyncRecordSink::spawn(sink, 4);

        let mut failure = None;
        for i in 0..100_000 {
            let record = Record::from([("a", i.to_string()), ("b", "padding".to_string())]);
            if let Err(e) = sink.write(record).await {
                failure = Some(e);
                break;
            }
        }
        let err = failure.expect("write should report the worker failure");
        assert!(is_disk_full(&err), "unexpected error: {:?}", err);

        match sink.end().await {
            Err(CsvTranslatorError::StateError(message)) => assert!(message.contains("closed")),
            other => panic!("expected StateError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_async_sink_worker_failure_reported_by_end() {
        let sink = RecordSink::new(DiskFull, Delimiter::COMMA, &WriteOptions::default()).unwrap();
        let mut sink = AsyncRecordSink::spawn(sink, 4);

        sink.write(Record::from([("a", "1")])).await.unwrap();
        sink.write(Record::from([("a", "2")])).await.unwrap();

        let err = sink.end().await.unwrap_err();
        assert!(is_disk_full(&err), "unexpected error: {:?}", err);
    }

    #[tokio::test]
    async fn test_async_sink_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stream.csv");

        let sink = RecordSink::create(&path, &WriteOptions::default()).unwrap();
        let mut sink = AsyncRecordSink::spawn(sink, 1);
        sink.write(Record::from([("a", "1"), ("b", "2")])).await.unwrap();
        sink.write(Record::from([("a", "3")])).await.unwrap();
        assert_eq!(sink.end().await.unwrap(), 2);
        assert!(sink.is_flushed());

        let err = sink.write(Record::from([("a", "5")])).await.unwrap_err();
        assert!(matches!(err, CsvTranslatorError::StateError(_)));

        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b\n1,2\n3,\n");
    }
}

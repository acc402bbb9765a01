use crate::csv_processor::delimiter::{resolve_delimiter, Delimiter};
use crate::csv_processor::projector::record_from_row;
use crate::record::Record;
use crate::utils::{CsvTranslatorError, Result};
use csv::{StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub delimiter: Option<Delimiter>,
}

impl ReadOptions {
    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Open,
    Streaming,
    Closed,
}

/// Pull-based record source over any byte reader. The first line is the
/// header; every later non-blank line becomes a record keyed by it.
pub struct RecordReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    row: StringRecord,
    state: ReadState,
}

impl<R: Read> RecordReader<R> {
    pub fn new(source: R, delimiter: Delimiter) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(delimiter.as_byte())
            .has_headers(true)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);
        Self {
            reader,
            headers: Vec::new(),
            row: StringRecord::new(),
            state: ReadState::Open,
        }
    }

    /// Column list from the header line. Reads it if the stream is still open.
    pub fn headers(&mut self) -> Result<&[String]> {
        if self.state == ReadState::Open {
            self.open()?;
        }
        Ok(&self.headers)
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    fn open(&mut self) -> Result<()> {
        let headers = self
            .reader
            .headers()
            .map(|h| h.iter().map(str::to_string).collect::<Vec<_>>());
        match headers {
            Ok(headers) => {
                self.headers = headers;
                self.state = ReadState::Streaming;
                Ok(())
            }
            Err(e) => {
                self.state = ReadState::Closed;
                Err(CsvTranslatorError::from_read(e))
            }
        }
    }

    fn is_blank_row(&self) -> bool {
        self.headers.len() > 1 && self.row.len() == 1 && self.row[0].is_empty()
    }

    fn fail(&mut self, err: CsvTranslatorError) -> Option<Result<Record>> {
        self.state = ReadState::Closed;
        Some(Err(err))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                ReadState::Closed => return None,
                ReadState::Open => {
                    if let Err(e) = self.open() {
                        return Some(Err(e));
                    }
                }
                ReadState::Streaming => match self.reader.read_record(&mut self.row) {
                    Ok(true) => {
                        if self.is_blank_row() {
                            continue;
                        }
                        if self.row.len() != self.headers.len() {
                            let line = self.row.position().map(|p| p.line()).unwrap_or(0);
                            let err = CsvTranslatorError::RowLengthMismatch {
                                line,
                                expected: self.headers.len(),
                                got: self.row.len(),
                            };
                            return self.fail(err);
                        }
                        return Some(Ok(record_from_row(&self.headers, self.row.iter())));
                    }
                    Ok(false) => {
                        self.state = ReadState::Closed;
                        return None;
                    }
                    Err(e) => return self.fail(CsvTranslatorError::from_read(e)),
                },
            }
        }
    }
}

pub fn open_reader(path: impl AsRef<Path>, options: &ReadOptions) -> Result<RecordReader<File>> {
    let path = path.as_ref();
    let delimiter = resolve_delimiter(path, options.delimiter);
    let file = File::open(path)?;
    tracing::debug!(path = %path.display(), %delimiter, "Opened record reader");
    Ok(RecordReader::new(file, delimiter))
}

/// Reads a whole file into memory.
pub fn read_all(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let records = open_reader(path, options)?.collect::<Result<Vec<_>>>()?;
    tracing::info!(path = %path.display(), rows = records.len(), "Read records");
    Ok(records)
}

/// Async record source. Parsing runs on a blocking worker that feeds a
/// bounded channel, so a consumer that stops pulling also stops the parser.
pub struct RecordStream {
    rx: mpsc::Receiver<Result<Record>>,
    worker: Option<JoinHandle<()>>,
    state: ReadState,
}

impl RecordStream {
    pub fn spawn<R>(source: R, delimiter: Delimiter, capacity: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<Record>>(capacity.max(1));

        let worker = tokio::task::spawn_blocking(move || {
            for item in RecordReader::new(source, delimiter) {
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() {
                    tracing::debug!("Record stream consumer went away");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Self {
            rx,
            worker: Some(worker),
            state: ReadState::Open,
        }
    }

    /// Next record, `None` once the stream is closed. An error is delivered
    /// once and closes the stream.
    pub async fn next(&mut self) -> Option<Result<Record>> {
        if self.state == ReadState::Closed {
            return None;
        }

        match self.rx.recv().await {
            Some(Ok(record)) => {
                self.state = ReadState::Streaming;
                Some(Ok(record))
            }
            Some(Err(e)) => {
                self.close();
                Some(Err(e))
            }
            None => {
                self.state = ReadState::Closed;
                let worker = self.worker.take()?;
                match worker.await {
                    Ok(()) => None,
                    Err(e) => Some(Err(CsvTranslatorError::TaskFailed(e.to_string()))),
                }
            }
        }
    }

    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(item) = self.next().await {
            records.push(item?);
        }
        Ok(records)
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    fn close(&mut self) {
        self.state = ReadState::Closed;
        self.rx.close();
    }
}

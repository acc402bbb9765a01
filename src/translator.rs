use crate::csv_processor::{
    encode_records, persist_atomically, read_all, resolve_delimiter, AsyncRecordSink, ReadOptions,
    RecordSink, RecordStream, WriteOptions,
};
use crate::record::Record;
use crate::utils::{CsvTranslatorError, Result, TranslatorSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument;

/// Entry point for batch and streaming translation. Cheap to clone; holds no
/// per-call state, every call takes its own options.
#[derive(Debug, Clone, Default)]
pub struct CsvTranslator {
    settings: TranslatorSettings,
}

impl CsvTranslator {
    pub fn new(settings: TranslatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TranslatorSettings {
        &self.settings
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn read(&self, path: impl AsRef<Path>, options: &ReadOptions) -> Result<Vec<Record>> {
        let path = path.as_ref().to_path_buf();
        let options = options.clone();
        tokio::task::spawn_blocking(move || read_all(&path, &options))
            .await
            .map_err(|e| CsvTranslatorError::TaskFailed(e.to_string()))?
    }

    /// Encodes on the calling task, then swaps the file in on a blocking
    /// worker. An existing destination is only replaced by complete output.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), rows = records.len()))]
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        records: &[Record],
        options: &WriteOptions,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let delimiter = resolve_delimiter(&path, options.delimiter);
        let bytes = encode_records(records, delimiter, options)?;
        let size = bytes.len();

        tokio::task::spawn_blocking(move || persist_atomically(&path, &bytes))
            .await
            .map_err(|e| CsvTranslatorError::TaskFailed(e.to_string()))??;

        tracing::info!(bytes = size, "Wrote records");
        Ok(())
    }

    pub async fn create_read_stream(
        &self,
        path: impl AsRef<Path>,
        options: &ReadOptions,
    ) -> Result<RecordStream> {
        let path = path.as_ref();
        let delimiter = resolve_delimiter(path, options.delimiter);
        let file = tokio::fs::File::open(path).await?.into_std().await;
        tracing::debug!(path = %path.display(), %delimiter, "Opened read stream");
        Ok(RecordStream::spawn(
            file,
            delimiter,
            self.settings.channel_capacity,
        ))
    }

    pub async fn create_write_stream(
        &self,
        path: impl AsRef<Path>,
        options: &WriteOptions,
    ) -> Result<AsyncRecordSink> {
        let path = path.as_ref();
        let delimiter = resolve_delimiter(path, options.delimiter);
        let file = tokio::fs::File::create(path).await?.into_std().await;
        let sink = RecordSink::new(file, delimiter, options)?;
        tracing::debug!(path = %path.display(), %delimiter, mode = ?sink.state(), "Opened write stream");
        Ok(AsyncRecordSink::spawn(sink, self.settings.channel_capacity))
    }

    /// Writes every `(destination, records)` pair concurrently. Pairs with no
    /// records are skipped without touching the destination.
    ///
    /// Destinations must be distinct. All writes run to completion; the first
    /// failure to complete is returned and successful files are kept.
    #[instrument(skip_all, fields(pairs = pairs.len()))]
    pub async fn write_many(
        &self,
        pairs: Vec<(PathBuf, Vec<Record>)>,
        options: &WriteOptions,
    ) -> Result<()> {
        let limiter = match self.settings.max_concurrent_writes {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let mut tasks = JoinSet::new();
        for (destination, records) in pairs {
            if records.is_empty() {
                tracing::debug!(path = %destination.display(), "Skipping empty record set");
                continue;
            }

            let translator = self.clone();
            let options = options.clone();
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => Some(
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| CsvTranslatorError::TaskFailed(e.to_string()))?,
                    ),
                    None => None,
                };
                translator
                    .write(&destination, &records, &options)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(path = %destination.display(), error = %e, "Write failed")
                    })
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| CsvTranslatorError::TaskFailed(e.to_string()))
                .and_then(|result| result);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

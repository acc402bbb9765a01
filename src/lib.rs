pub mod csv_processor;
pub mod record;
pub mod translator;
pub mod utils;

pub use csv_processor::{
    AsyncRecordSink, ColumnDiscovery, Delimiter, ReadOptions, RecordReader, RecordSink,
    RecordStream, WriteOptions,
};
pub use record::Record;
pub use translator::CsvTranslator;
pub use utils::{AppConfig, CsvTranslatorError, Result, TranslatorSettings};

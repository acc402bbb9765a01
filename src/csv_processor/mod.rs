pub mod coerce;
pub mod columns;
pub mod delimiter;
pub mod projector;
pub mod reader;
pub mod writer;

pub use coerce::{auto_parse, auto_parse_value};
pub use columns::{columns_from_first, resolve_columns, ColumnDiscovery};
pub use delimiter::{resolve_delimiter, Delimiter};
pub use projector::{project, record_from_row};
pub use reader::{open_reader, read_all, ReadOptions, ReadState, RecordReader, RecordStream};
pub use writer::{
    encode_records, persist_atomically, write_all, AsyncRecordSink, RecordSink, SinkState,
    WriteOptions,
};

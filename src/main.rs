use anyhow::Context;
use clap::{Parser, Subcommand};
use csv_translator::csv_processor::auto_parse;
use csv_translator::utils::LoggingConfig;
use csv_translator::{
    AppConfig, ColumnDiscovery, CsvTranslator, Delimiter, ReadOptions, Record, WriteOptions,
};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "csv-translator", version, about = "Translate delimited text files to and from records")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "CSV_TRANSLATOR_CONFIG", default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print records as JSON lines
    Read {
        path: PathBuf,
        #[arg(long)]
        delimiter: Option<String>,
        /// Emit integers and floats as JSON numbers
        #[arg(long)]
        auto_parse: bool,
    },
    /// Stream records from one file into another
    Convert {
        src: PathBuf,
        dest: PathBuf,
        #[arg(long)]
        in_delimiter: Option<String>,
        #[arg(long)]
        out_delimiter: Option<String>,
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Take columns from the first record instead of buffering the input
        #[arg(long)]
        first_record_columns: bool,
        #[arg(long)]
        sanitize: bool,
    },
    /// Write one file per distinct value of a column
    Split {
        src: PathBuf,
        #[arg(long)]
        by: String,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value = "csv")]
        extension: String,
        #[arg(long)]
        delimiter: Option<String>,
    },
}

fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("csv_translator={}", config.level)),
    };
    let registry = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

fn parse_delimiter(value: Option<&str>) -> anyhow::Result<Option<Delimiter>> {
    value
        .map(Delimiter::parse)
        .transpose()
        .context("invalid delimiter")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(Some(&cli.config));
    init_tracing(&config.logging)?;

    let translator = CsvTranslator::new(config.translator_settings());

    match cli.command {
        Command::Read {
            path,
            delimiter,
            auto_parse: typed,
        } => {
            let options = ReadOptions {
                delimiter: parse_delimiter(delimiter.as_deref())?,
            };
            read_command(&translator, path, &options, typed).await
        }
        Command::Convert {
            src,
            dest,
            in_delimiter,
            out_delimiter,
            columns,
            first_record_columns,
            sanitize,
        } => {
            let read_options = ReadOptions {
                delimiter: parse_delimiter(in_delimiter.as_deref())?,
            };
            let write_options = WriteOptions {
                delimiter: parse_delimiter(out_delimiter.as_deref())?,
                columns: (!columns.is_empty()).then_some(columns),
                discovery: if first_record_columns {
                    ColumnDiscovery::FirstRecord
                } else {
                    ColumnDiscovery::Buffered
                },
                sanitize_formulas: sanitize,
            };
            convert_command(&translator, src, dest, &read_options, &write_options).await
        }
        Command::Split {
            src,
            by,
            out_dir,
            extension,
            delimiter,
        } => {
            let delimiter = parse_delimiter(delimiter.as_deref())?;
            split_command(&translator, src, &by, out_dir, &extension, delimiter).await
        }
    }
}

async fn read_command(
    translator: &CsvTranslator,
    path: PathBuf,
    options: &ReadOptions,
    typed: bool,
) -> anyhow::Result<()> {
    let mut stream = translator
        .create_read_stream(&path, options)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(record) = stream.next().await {
        let record = record?;
        if typed {
            serde_json::to_writer(&mut out, &auto_parse(&record))?;
        } else {
            serde_json::to_writer(&mut out, &record)?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

async fn convert_command(
    translator: &CsvTranslator,
    src: PathBuf,
    dest: PathBuf,
    read_options: &ReadOptions,
    write_options: &WriteOptions,
) -> anyhow::Result<()> {
    let mut source = translator
        .create_read_stream(&src, read_options)
        .await
        .with_context(|| format!("failed to open {}", src.display()))?;
    let mut sink = translator
        .create_write_stream(&dest, write_options)
        .await
        .with_context(|| format!("failed to create {}", dest.display()))?;

    while let Some(record) = source.next().await {
        sink.write(record?).await?;
    }
    let rows = sink.end().await?;

    tracing::info!(src = %src.display(), dest = %dest.display(), rows, "Conversion complete");
    Ok(())
}

fn group_by_column(records: Vec<Record>, column: &str) -> Vec<(String, Vec<Record>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Record>)> = Vec::new();

    for record in records {
        let key = record.get(column).unwrap_or("").to_string();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }
    groups
}

fn file_stem_for(value: &str) -> String {
    if value.is_empty() {
        return "_blank".to_string();
    }
    value
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn split_command(
    translator: &CsvTranslator,
    src: PathBuf,
    column: &str,
    out_dir: PathBuf,
    extension: &str,
    delimiter: Option<Delimiter>,
) -> anyhow::Result<()> {
    let records = translator
        .read(&src, &ReadOptions { delimiter })
        .await
        .with_context(|| format!("failed to read {}", src.display()))?;

    tokio::fs::create_dir_all(&out_dir).await?;

    let groups = group_by_column(records, column);
    let group_count = groups.len();
    // Distinct values can sanitise to the same stem; destinations must not collide.
    let mut used = HashSet::new();
    let pairs: Vec<(PathBuf, Vec<Record>)> = groups
        .into_iter()
        .map(|(value, records)| {
            let stem = file_stem_for(&value);
            let mut candidate = stem.clone();
            let mut n = 1;
            while !used.insert(candidate.clone()) {
                n += 1;
                candidate = format!("{}-{}", stem, n);
            }
            (out_dir.join(format!("{}.{}", candidate, extension)), records)
        })
        .collect();

    let options = WriteOptions {
        delimiter,
        ..WriteOptions::default()
    };
    translator.write_many(pairs, &options).await?;

    tracing::info!(groups = group_count, out_dir = %out_dir.display(), "Split complete");
    Ok(())
}

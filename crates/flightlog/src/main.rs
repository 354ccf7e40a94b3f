//! `flightlog` - CLI for recording and decoding telemetry logs
//!
//! This binary records raw telemetry into per-session log files through the
//! storage mediator and decodes those logs offline.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use flightlog::cli::{
    Cli, Command, ConfigCommand, DecodeCommand, InspectCommand, OutputFormat, RecordCommand,
    SessionCommand,
};
use flightlog::codec::{LegacyRecord, Record, Sample};
use flightlog::device::DirDevice;
use flightlog::mediator::{read_session, stream_file_name, MediatorSettings};
use flightlog::{init_logging, read_log, Config, StorageMediator, StreamBuffer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config_path = cli.config;

    // decoding needs no configuration; `config validate` reports problems
    // instead of failing on them
    match cli.command {
        Command::Decode(cmd) => handle_decode(&cmd),
        Command::Inspect(cmd) => handle_inspect(&cmd),
        Command::Session(cmd) => handle_session(&load_config(config_path)?, cmd).await,
        Command::Record(cmd) => handle_record(&load_config(config_path)?, cmd).await,
        Command::Config(ConfigCommand::Show { json }) => {
            handle_show_config(&load_config(config_path)?, json)
        }
        Command::Config(ConfigCommand::Path) => {
            println!("{}", Config::default_config_path().display());
            Ok(())
        }
        Command::Config(ConfigCommand::Validate { file }) => handle_validate(file.or(config_path)),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("loading configuration")
}

fn handle_decode(cmd: &DecodeCommand) -> anyhow::Result<()> {
    let log = read_log(&cmd.file)?;
    let limit = cmd.limit.unwrap_or(usize::MAX);

    for (index, record) in log.samples.iter().take(limit).enumerate() {
        match cmd.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(record)?),
            OutputFormat::Plain => println!("{}", plain_line(record)),
            OutputFormat::Table => print_table_row(index, record),
        }
    }
    Ok(())
}

fn plain_line(record: &Record) -> String {
    match record {
        Record::Measurement(sample) => sample
            .values()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" "),
        Record::Legacy(legacy) => legacy_values(legacy).join(" "),
        Record::Schema(_) => String::new(),
    }
}

fn legacy_values(legacy: &LegacyRecord) -> Vec<String> {
    std::iter::once(legacy.last_update.to_string())
        .chain(legacy.voltages.iter().map(ToString::to_string))
        .chain(legacy.quat.iter().map(ToString::to_string))
        .chain(legacy.motors.iter().map(ToString::to_string))
        .chain(legacy.radio.iter().map(ToString::to_string))
        .collect()
}

fn print_table_row(index: usize, record: &Record) {
    match record {
        Record::Measurement(sample) => println!("{index:>8}  M  {}", table_fields(sample)),
        Record::Legacy(legacy) => println!(
            "{index:>8}  L  t={} quat={:?} motors={:?}",
            legacy.last_update, legacy.quat, legacy.motors
        ),
        Record::Schema(_) => {}
    }
}

fn table_fields(sample: &Sample) -> String {
    sample
        .fields()
        .iter()
        .map(|f| format!("{}={}", f.id, f.value))
        .collect::<Vec<_>>()
        .join("  ")
}

fn handle_inspect(cmd: &InspectCommand) -> anyhow::Result<()> {
    let log = read_log(&cmd.file)?;

    if cmd.json {
        let report = serde_json::json!({
            "file": cmd.file,
            "samples": log.samples.len(),
            "stats": log.stats,
            "schema": log.schema,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let stats = &log.stats;
    println!("{}", cmd.file.display());
    println!("{}", "-".repeat(cmd.file.display().to_string().len()));
    println!("Bytes:            {}", stats.bytes);
    println!("Samples:          {}", log.samples.len());
    println!("  legacy:         {}", stats.legacy);
    println!("  measurement:    {}", stats.measurements);
    println!("Schema records:   {}", stats.schemas);
    println!("Dropped:          {}", stats.dropped());
    println!("  checksum:       {}", stats.checksum_errors);
    println!("  no schema:      {}", stats.schema_missing);
    println!("  bad schema:     {}", stats.invalid_schemas);
    println!("Unknown kinds:    {}", stats.unknown_kinds);
    println!("Truncated bytes:  {}", stats.truncated_bytes);
    println!();
    match &log.schema {
        Some(schema) => {
            println!("Schema ({} fields, {} bytes):", schema.len(), schema.byte_len());
            for field in schema.fields() {
                println!("  {:<6} {}", field.id.to_string(), field.field_type);
            }
        }
        None => println!("Schema: none (legacy records only)"),
    }
    Ok(())
}

async fn handle_session(config: &Config, cmd: SessionCommand) -> anyhow::Result<()> {
    let root = cmd.root.unwrap_or_else(|| config.storage_root());
    let mut device = DirDevice::new(&root);
    let session = read_session(&mut device, &config.storage.session_file)
        .await
        .with_context(|| format!("reading session counter under {}", root.display()))?;

    match session {
        Some(session) => {
            println!("Session: {session:03}");
            println!(
                "Log:     {}",
                root.join(stream_file_name(session, &config.stream.name))
                    .display()
            );
        }
        None => println!("No session recorded under {}", root.display()),
    }
    Ok(())
}

async fn handle_record(config: &Config, cmd: RecordCommand) -> anyhow::Result<()> {
    let root = cmd.root.unwrap_or_else(|| config.storage_root());
    let name = cmd.name.unwrap_or_else(|| config.stream.name.clone());
    let capacity = config.stream.capacity;
    let block_size = config.mediator.block_size;

    let mediator = StorageMediator::spawn(DirDevice::new(&root), MediatorSettings::from(config));
    let client = mediator.client();
    let status = client.wait_ready().await?;
    let handle = client.allocate(&name)?;
    let producer = client.open_stream(handle, StreamBuffer::with_block_size(capacity, block_size))?;
    if let Some(session) = status.session {
        info!(
            "Recording into {}",
            root.join(stream_file_name(session, &name)).display()
        );
    }

    // a chunk must always fit into an empty ring
    let mut chunk = vec![0u8; block_size.min(capacity.saturating_sub(1)).max(1)];
    let mut stdin = tokio::io::stdin();
    let mut total = 0u64;
    let mut dropped = 0u64;
    loop {
        let n = stdin.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if cmd.drop_overruns {
            if !producer.try_append(&chunk[..n]) {
                dropped += n as u64;
                continue;
            }
        } else {
            while producer.free() < n {
                tokio::time::sleep(config.poll_interval()).await;
            }
            producer.append(&chunk[..n]);
        }
        total += n as u64;
    }

    client.close(handle).await?;
    mediator.shutdown().await?;

    if dropped > 0 {
        warn!("Dropped {dropped} bytes that would have overrun the stream ring");
    }
    println!("Recorded {total} bytes");
    Ok(())
}

fn handle_show_config(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Storage]");
    println!("  Root:               {}", config.storage_root().display());
    println!("  Session file:       {}", config.storage.session_file);
    println!("  Session max:        {}", config.storage.session_max);
    println!("  Max handles:        {}", config.storage.max_handles);
    println!();
    println!("[Mediator]");
    println!("  Poll interval (ms): {}", config.mediator.poll_interval_ms);
    println!("  Sync every cycles:  {}", config.mediator.stream_sync_cycles);
    println!("  Remount delay (ms): {}", config.mediator.remount_delay_ms);
    println!("  Block size:         {}", config.mediator.block_size);
    println!();
    println!("[Stream]");
    println!("  Name:               {}", config.stream.name);
    println!("  Capacity:           {}", config.stream.capacity);
    Ok(())
}

fn handle_validate(file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
    Ok(())
}

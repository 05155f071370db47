//! Data License CLI: one request, one download, one load.
//!
//! Everything is driven by the settings file (`--config`, or
//! `DATALICENSE_CONFIG`, default `datalicense.toml`) plus environment
//! overrides. A poll timeout or an empty result exits cleanly; every other
//! failure is logged and exits non-zero.

mod logging;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use datalicense_core::client::{ClientSettings, DataRequest, RequestProtocolClient, SessionId};
use datalicense_core::http::ReqwestTransport;
use datalicense_core::instruments::{load_instruments, CsvInstrumentSource};
use datalicense_core::session::AuthSession;
use datalicense_core::storage::{InsertOptions, ParquetTableSink, TableSink};
use datalicense_core::{Settings, Transformer};
use polars::prelude::DataFrame;
use tracing::{error, info, warn};

/// First retry delay for the storage insert; doubles per attempt.
const INSERT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "datalicense",
    about = "Request, download and load a Data License batch"
)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(long, env = "DATALICENSE_CONFIG", default_value = "datalicense.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    logging::init_tracing(&settings.log_level, settings.log_format);

    info!("Initializing Data License Client");
    if let Err(e) = run(&settings) {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

fn run(settings: &Settings) -> Result<()> {
    settings.credentials.check();

    let source = CsvInstrumentSource::new(&settings.instruments.path);
    let instruments = load_instruments(&source, settings.instruments.limit)
        .context("failed to load instruments")?;

    let transport = ReqwestTransport::new(Duration::from_secs(settings.api.http_timeout_secs))?;
    let session = AuthSession::connect(
        transport,
        settings.credentials.clone(),
        settings.api.token_url.as_str(),
        settings.api.api_version.as_str(),
    )
    .context("failed to authenticate")?;

    let request = DataRequest::new(
        SessionId::generate(&settings.request.session_prefix),
        &settings.request.identifier_type,
        &instruments,
        &settings.request.fields,
    )
    .with_trigger(settings.request.trigger)
    .with_terminal_identity(settings.request.terminal_identity)
    .with_description(settings.request.description.as_str());

    let mut client =
        RequestProtocolClient::connect(session, ClientSettings::from_api(&settings.api), request)
            .context("failed to create client")?;
    info!("Client created successfully");

    client.submit().context("failed to submit data request")?;
    info!("Data request sent to Data License API");

    let Some(payload) = client.listen().context("failed while waiting for data")? else {
        warn!("No data received from Data License API");
        return Ok(());
    };
    if payload.height() == 0 {
        warn!("Delivered payload is empty, nothing to transform");
        return Ok(());
    }
    info!("Data received, beginning transformation");

    let transformer = Transformer::new(
        client.request().field_list.clone(),
        settings.output.ignore_columns.clone(),
    );
    let frame = transformer
        .transform(&payload)
        .context("failed to transform payload")?;
    if frame.height() == 0 {
        warn!("Transformed frame is empty, nothing to insert");
        return Ok(());
    }
    info!("Data transformation completed");
    info!("\n{frame}");

    let sink = ParquetTableSink::new(&settings.output.dir);
    let options = InsertOptions {
        delete_prev_records: settings.output.delete_prev_records,
    };
    insert_with_retry(
        &sink,
        &settings.output.table,
        &frame,
        options,
        settings.output.max_retries,
        INSERT_BASE_DELAY,
    )?;

    info!("Processing complete");
    Ok(())
}

/// Insert, retrying up to `max_retries` times with exponential backoff.
fn insert_with_retry(
    sink: &dyn TableSink,
    table: &str,
    frame: &DataFrame,
    options: InsertOptions,
    max_retries: u32,
    base_delay: Duration,
) -> Result<usize> {
    let mut attempt = 0u32;
    loop {
        match sink.insert(table, frame, options) {
            Ok(rows) => return Ok(rows),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let delay = base_delay * 2u32.pow(attempt - 1);
                warn!(attempt, ?delay, "insert into {table} failed: {e}; retrying");
                thread::sleep(delay);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to insert into {table} after {} attempts", attempt + 1)))
            }
        }
    }
}

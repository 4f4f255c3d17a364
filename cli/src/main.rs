use std::io::Write;
use std::time::Duration;
use clap::{CommandFactory, Parser};
use env_logger::Env;
use crate::device::{CcidReader, ReaderInfo};
use crate::options::{Command, Options};
use crate::session::{ReadOutcome, SpoolSession, WriteOutcome};

mod device;
mod options;
mod pages;
mod report;
mod session;

const DEFAULT_LOG_FILTER: &str = "info";
const VERBOSE_LOG_FILTER: &str = "debug";
/// Pause between a finished write and the read back, lets the reader settle.
const VERIFY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let options = Options::parse();
    init_logging(options.log_filter(), options.verbose());
    if options.version() {
        match option_env!("GIT_VERSION") {
            Some(version) => println!("Running Version: {}", version),
            None => println!("Running Version: {}-development", env!("CARGO_PKG_VERSION")),
        }
    }
    if options.search() {
        if let Err(err) = print_readers() {
            log::error!("Error scanning for readers: {err}");
            std::process::exit(1);
        }
    }
    let Some(command) = options.command() else {
        if !options.version() && !options.search() {
            let _ = <Options as CommandFactory>::command().print_help();
        }
        return;
    };
    match run(&options, command).await {
        Ok(true) => (),
        Ok(false) => std::process::exit(1),
        Err(err) => {
            log::error!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(cli_filter: Option<&str>, verbose: bool) {
    let default = if verbose { VERBOSE_LOG_FILTER } else { DEFAULT_LOG_FILTER };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default));
    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }
    builder.format(|buf, record| {
        writeln!(buf, "[{:<5} {}] {}", record.level(), record.target(), record.args())
    });
    builder.init();
}

fn print_readers() -> anyhow::Result<()> {
    let readers = device::scan_for_readers()?;
    if readers.is_empty() {
        println!("No smart card readers found");
        return Ok(());
    }
    println!("Found readers:");
    for (index, reader) in readers.iter().enumerate() {
        match reader.product() {
            Some(product) => println!("{index}: {reader} {product}"),
            None => println!("{index}: {reader}"),
        }
    }
    Ok(())
}

fn open_reader(index: usize) -> anyhow::Result<CcidReader> {
    let mut readers: Vec<ReaderInfo> = device::scan_for_readers()?;
    if readers.is_empty() {
        anyhow::bail!("No smart card readers found");
    }
    if index >= readers.len() {
        anyhow::bail!("Reader index {index} out of range, {} reader(s) attached", readers.len());
    }
    let info = readers.swap_remove(index);
    CcidReader::open(&info)
}

/// Runs one command, `Ok(false)` when the tag operation itself failed.
async fn run(options: &Options, command: &Command) -> anyhow::Result<bool> {
    match command {
        Command::Write { spool, no_verify } => {
            let mut reader = open_reader(options.reader())?;
            let request = spool.request();
            let outcome = SpoolSession::new(&mut reader, options.session_config()).write(&request).await;
            print_write(options, &outcome)?;
            if !outcome.is_success() {
                return Ok(false);
            }
            if *no_verify {
                return Ok(true);
            }
            tokio::time::sleep(VERIFY_DELAY).await;
            log::info!("Reading tag back");
            let outcome = SpoolSession::new(&mut reader, options.session_config()).read().await;
            print_read(options, &outcome)?;
            Ok(matches!(outcome, ReadOutcome::Read(_)))
        }
        Command::Read => {
            let mut reader = open_reader(options.reader())?;
            let outcome = SpoolSession::new(&mut reader, options.session_config()).read().await;
            print_read(options, &outcome)?;
            Ok(matches!(outcome, ReadOutcome::Read(_)))
        }
        Command::Save { spool, serial, output } => {
            let data = spool.request().image(serial).save(output)?;
            log::info!("Saved {} bytes to {}", data.len(), output.display());
            print_message(options, &spooltag::decode_message(&data))?;
            Ok(true)
        }
        Command::Load { file } => {
            let data = spooltag::image::load(file)?;
            log::info!("Loaded {} bytes from {}", data.len(), file.display());
            print_message(options, &spooltag::decode_message(&data))?;
            Ok(true)
        }
    }
}

fn print_write(options: &Options, outcome: &WriteOutcome) -> anyhow::Result<()> {
    if options.json() {
        println!("{}", report::write_outcome_json(outcome)?);
    } else {
        println!("{}", report::write_outcome_text(outcome));
    }
    Ok(())
}

fn print_read(options: &Options, outcome: &ReadOutcome) -> anyhow::Result<()> {
    if options.json() {
        println!("{}", report::read_outcome_json(outcome)?);
    } else {
        println!("{}", report::read_outcome_text(outcome).trim_end());
    }
    Ok(())
}

fn print_message(options: &Options, message: &spooltag::DecodedMessage) -> anyhow::Result<()> {
    if options.json() {
        println!("{}", report::message_json(message)?);
    } else {
        println!("{}", report::summary_text(&spooltag::SpoolSummary::from_message(message)));
        print!("{}", report::MessageDump(message));
    }
    Ok(())
}

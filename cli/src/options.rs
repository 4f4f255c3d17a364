use spooltag::MaterialUnit;
use crate::session::{SessionConfig, WriteRequest};

#[derive(clap_derive::Parser, Debug, Clone)]
pub struct Options {
    #[arg(long, default_value = "false")]
    ///Prints the current version. Version is set via the crate version.
    version: bool,
    #[arg(long, default_value = "false")]
    ///Prints all connected smart card readers
    search: bool,
    #[arg(long, default_value = "0")]
    ///Index of the reader to use, as listed by --search
    reader: usize,
    #[arg(long, default_value = "30")]
    ///Seconds to wait for a tag before giving up
    timeout: u64,
    #[arg(long, default_value = "250")]
    ///Milliseconds between card presence polls
    poll_ms: u64,
    #[arg(short, long, default_value = "false")]
    ///Add extra for debugging information
    verbose: bool,
    #[arg(long)]
    ///env_logger style filter (e.g. "debug,spooltag=trace"); overrides RUST_LOG and --verbose
    log_filter: Option<String>,
    #[arg(short, long, default_value = "false")]
    ///Print results as JSON
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}
impl Options{
    pub const fn version(&self) -> bool { self.version }
    pub const fn search(&self) -> bool { self.search }
    pub const fn reader(&self) -> usize { self.reader }
    pub const fn verbose(&self) -> bool { self.verbose }
    pub fn log_filter(&self) -> Option<&str> { self.log_filter.as_deref() }
    pub const fn json(&self) -> bool { self.json }
    pub const fn command(&self) -> Option<&Command> { self.command.as_ref() }
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            card_timeout: std::time::Duration::from_secs(self.timeout),
            poll_interval: std::time::Duration::from_millis(self.poll_ms),
        }
    }
}

#[derive(clap_derive::Subcommand, Debug, Clone)]
pub enum Command {
    ///Write a new spool image to the tag on the reader
    Write {
        #[command(flatten)]
        spool: SpoolArgs,
        #[arg(long, default_value = "false")]
        ///Skip reading the tag back after writing
        no_verify: bool,
    },
    ///Read and decode the tag on the reader
    Read,
    ///Encode a spool image into a file without touching a tag
    Save {
        #[command(flatten)]
        spool: SpoolArgs,
        #[arg(long, default_value = "")]
        ///Serial number to store, normally the tag UID
        serial: String,
        #[arg(short, long, default_value = "spool.bin")]
        output: std::path::PathBuf,
    },
    ///Decode a raw tag image file
    Load {
        file: std::path::PathBuf,
    },
}

#[derive(clap_derive::Args, Debug, Clone)]
pub struct SpoolArgs {
    ///Material GUID, as found in the material profile
    material: uuid::Uuid,
    #[arg(short, long, value_enum, default_value = "mg")]
    unit: UnitArg,
    #[arg(short, long, default_value = "750000")]
    ///Total quantity on the spool, in the chosen unit
    total: u32,
    #[arg(long)]
    ///Remaining quantity, defaults to the total
    remaining: Option<u32>,
    #[arg(long)]
    batch_code: Option<String>,
    #[arg(long)]
    ///Programming station id, defaults to 0xAFFE
    station_id: Option<u16>,
    #[arg(long, conflicts_with = "stamp_now")]
    ///Manufacturing time as unix seconds
    timestamp: Option<u64>,
    #[arg(long, default_value = "false")]
    ///Use the current time as manufacturing time
    stamp_now: bool,
}
impl SpoolArgs {
    pub fn request(&self) -> WriteRequest {
        let mut request = WriteRequest::new(self.material, self.unit.into(), self.total);
        request.remaining = self.remaining;
        request.batch_code = self.batch_code.clone();
        request.station_id = self.station_id;
        request.manufacturing_timestamp = match (self.timestamp, self.stamp_now) {
            (Some(timestamp), _) => timestamp,
            (None, true) => u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default(),
            (None, false) => 0,
        };
        request
    }
}

#[derive(clap_derive::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitArg {
    Unused,
    Mm,
    Mg,
    Cm3,
}
impl From<UnitArg> for MaterialUnit {
    fn from(value: UnitArg) -> Self {
        match value {
            UnitArg::Unused => MaterialUnit::Unused,
            UnitArg::Mm => MaterialUnit::LengthMm,
            UnitArg::Mg => MaterialUnit::MassMg,
            UnitArg::Cm3 => MaterialUnit::VolumeCm3,
        }
    }
}

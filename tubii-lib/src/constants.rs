//! Default ports, hosts and intervals

/// Commands are received on this port
pub const COMMAND_PORT             : u16 = 4001;
/// Port of the data server which receives telemetry
pub const DATA_SERVER_PORT         : u16 = 4000;
/// Port of the log server
pub const LOG_SERVER_PORT          : u16 = 4001;
pub const DEFAULT_DATA_HOST        : &str = "daq1";
pub const DEFAULT_LOG_HOST         : &str = "minard";
/// Name which prefixes every line sent to the log server
pub const DEFAULT_LOG_NAME         : &str = "tubii";
/// Retry interval for collector connections
pub const RECONNECT_INTERVAL_SEC   : u64 = 10;
pub const CONNECT_TIMEOUT_MS       : u64 = 500;
pub const READOUT_INTERVAL_MS      : u64 = 1;
pub const STATUS_INTERVAL_MS       : u64 = 1000;
/// FIFO reads per readout tick
pub const FIFO_READ_BUDGET         : usize = 1000;
/// Maximum number of trigger records in one MegaRecord
pub const BATCH_CAPACITY           : usize = 1000;
pub const MAX_PENDING_BYTES        : usize = 8*1024*1024;
/// Lines which may queue up for the log server
pub const LOG_FORWARD_CAPACITY     : usize = 1000;
pub const MEM_DEVICE               : &str = "/dev/mem";
pub const CONFIG_STORE_DIR         : &str = "/var/lib/tubii/configs";

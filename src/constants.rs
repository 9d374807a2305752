//! Meter Link Constants
//!
//! Fixed values of the customer-interface link: wrapper frame layout, the
//! data-notification discriminator and the transport retry timing.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Wrapper frame layout
// ----------------------------------------------------------------------------

/// Start byte of the M-Bus long frame that wraps the DLMS payload
pub const WRAPPER_START: u8 = 0x68;

/// Offset of the 8-byte system title
pub const SYSTEM_TITLE_OFFSET: usize = 11;

/// Length of the system title
pub const SYSTEM_TITLE_LEN: usize = 8;

/// Offset of the 4-byte frame counter
pub const FRAME_COUNTER_OFFSET: usize = 22;

/// Length of the frame counter
pub const FRAME_COUNTER_LEN: usize = 4;

/// Offset of the first ciphertext byte
pub const CIPHERTEXT_OFFSET: usize = 26;

/// Ciphertext ends at `CIPHERTEXT_END_BIAS + length`
pub const CIPHERTEXT_END_BIAS: usize = 6;

/// Size of a frame as sent by the meter
pub const NOMINAL_FRAME_LEN: usize = 141;

// ----------------------------------------------------------------------------
// DLMS/COSEM
// ----------------------------------------------------------------------------

/// First two plaintext bytes of a data-notification with a long invoke id
pub const DATA_NOTIFICATION_TAG: u16 = 0x0f80;

/// Length of an OBIS code
pub const OBIS_LEN: usize = 6;

/// Length of a COSEM date-time
pub const COSEM_DATE_TIME_LEN: usize = 12;

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Default serial device
pub const DEFAULT_PORT: &str = "/dev/ttyS0";

/// Default baud rate of the customer interface
pub const DEFAULT_BAUDRATE: u32 = 2400;

/// Bytes requested from the device per read
pub const READ_CHUNK_LEN: usize = 282;

/// Consecutive open failures after which the process gives up
pub const MAX_OPEN_ATTEMPTS: u32 = 5;

/// Wait before a link is reopened
pub const RECONNECT_COOLDOWN: Duration = Duration::from_millis(2500);

/// Pause after a failed decode, on top of the reconnect cooldown
pub const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Wait between attempts to open a closed link
pub const OPEN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Wait before polling again after a read returned no bytes
pub const EMPTY_READ_PAUSE: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Time allowed for the broker to confirm a publish
pub const PUBLISH_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT client id
pub const MQTT_CLIENT_ID: &str = "SmartMeter";

/// MQTT keep-alive interval
pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Wait before the MQTT event loop retries a lost broker connection
pub const MQTT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Timeout of one InfluxDB write request
pub const INFLUX_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Topic suffix and gauge name of the derived net active power
pub const NET_POWER_NAME: &str = "Wirkleistunggesamt";

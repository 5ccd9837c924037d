/// Time allowed to write one frame to the peer, in seconds.
pub const WRITE_WAIT_SECS: u64 = 10;

/// Time allowed between pongs before a connection is considered dead, in seconds.
pub const PONG_WAIT_SECS: u64 = 60;

/// Maximum inbound frame size in bytes (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Capacity of each session's outbound queue
pub const SESSION_QUEUE_SIZE: usize = 256;

/// Capacity of each channel's command queue
pub const CHANNEL_QUEUE_SIZE: usize = 256;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header carrying the caller-supplied user identity
pub const USER_ID_HEADER: &str = "x-user-id";

/// Envelope tag used for soft protocol failures echoed back to a client
pub const WARNING_TAG: &str = "warning";

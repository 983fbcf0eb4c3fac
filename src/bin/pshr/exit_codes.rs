pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const CONFIG_ERROR: i32 = 2;
pub const CONNECTION_ERROR: i32 = 3;
pub const STREAM_ERROR: i32 = 4;
/// Link dropped while monitoring
pub const LINK_LOST: i32 = 5;

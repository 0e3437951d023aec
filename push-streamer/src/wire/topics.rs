//! Topic names the streamer messages travel on.

pub const ADD_STREAM: &str = "streamer/add";
pub const REMOVE_STREAM: &str = "streamer/remove";
pub const REMOVE_ALL_STREAMS: &str = "streamer/remove-all";
pub const RESTART_STREAMS: &str = "streamer/restart";
pub const PUSH_STREAM: &str = "streamer/push";

//! Lane IDs.
//!
//! Each protocol tag travels on a fixed lane. The lane is redundant with the
//! tag inside the payload, which lets the receiver reject frames whose header
//! and body disagree.

/// Session control (quit, quit acknowledgement).
pub const CONTROL: u16 = 0;

/// Value registration and updates.
pub const VALUE: u16 = 1;

/// Remote work requests (create, pull, run).
pub const COMMAND: u16 = 2;

/// Returns a human-readable name for a lane ID.
pub fn lane_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        VALUE => "VALUE",
        COMMAND => "COMMAND",
        _ => "UNKNOWN",
    }
}

/// Returns true if the lane ID is one cellwire uses.
pub fn is_known(id: u16) -> bool {
    id <= COMMAND
}

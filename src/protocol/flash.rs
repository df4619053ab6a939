//! The flash header record.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Layout version of the flashed data. A board with a different version is always rewritten.
pub const DATA_VERSION: u32 = 2;

bitflags! {
    /// Startup behaviour stored in the flash header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StartupFlags: u32 {
        /// Restart the startup method after an unhandled exception
        const AUTO_RESTART_AFTER_CRASH = 0x01;
        /// Run the startup method after every reset
        const LAUNCH_FROM_FLASH = 0x02;
    }
}

/// Header written after flashed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashHeader {
    /// Always [`DATA_VERSION`] for headers written by this crate
    pub data_version: u32,
    /// Snapshot hash of the flashed content
    pub hash: u32,
    /// Token of the method to start after a reset, 0 for none
    pub startup_token: u32,
    /// Startup behaviour
    pub flags: StartupFlags,
}

impl FlashHeader {
    /// A header for content with the given hash.
    #[must_use]
    pub fn new(hash: u32, startup_token: u32, flags: StartupFlags) -> Self {
        FlashHeader {
            data_version: DATA_VERSION,
            hash,
            startup_token,
            flags,
        }
    }
}

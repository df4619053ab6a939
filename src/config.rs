//! Compiler and upload settings.
//!
//! [`CompilerSettings`] controls how a program is closed over, split into kernel and
//! program, and written to the device. Two builds reuse the same cached kernel only if their
//! settings compare equal, so every field takes part in `PartialEq`.
//!
//! Settings are plain data and round-trip through serde, which is how the CLI reads them from
//! a JSON file:
//!
//! ```rust
//! use ilforge::CompilerSettings;
//!
//! let settings: CompilerSettings =
//!     serde_json::from_str(r#"{ "create_kernel_for_flashing": true }"#).unwrap();
//! assert!(settings.create_kernel_for_flashing);
//! assert_eq!(settings.programming_timeout_ms, 10_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::flash::StartupFlags;

/// Open generic type whose `GetEnumerator` backs `IEnumerable<T>` on arrays.
pub const DEFAULT_ARRAY_ENUMERATOR: &str = "System.SZGenericArrayEnumerator`1";

/// Settings for one compilation and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Build the kernel separately, freeze it and write it to flash.
    pub create_kernel_for_flashing: bool,

    /// Keep the kernel in flash memory instead of RAM.
    pub use_flash_for_kernel: bool,

    /// Keep the program in flash memory instead of RAM.
    pub use_flash_for_program: bool,

    /// Generate a startup method so that the board runs the program after reset.
    ///
    /// Requires [`Self::use_flash_for_program`].
    pub launch_program_from_flash: bool,

    /// Restart the program after an unhandled exception.
    pub auto_restart_program: bool,

    /// Erase and rewrite flash even if the board reports matching content.
    pub force_flash_write: bool,

    /// Upper bound for the acknowledgement of a single packet, in milliseconds.
    pub programming_timeout_ms: u64,

    /// Full names of additional types that must never become part of the execution set.
    pub additional_suppressions: Vec<String>,

    /// Full names of additional classes that are always part of the kernel.
    pub kernel_classes: Vec<String>,

    /// Types whose static constructors run before all others. The last entry runs first.
    pub cctor_bring_to_front: Vec<String>,

    /// Types whose static constructors run after all others, in list order.
    pub cctor_send_to_back: Vec<String>,

    /// Full name of the open generic array enumerator.
    pub array_enumerator: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            create_kernel_for_flashing: false,
            use_flash_for_kernel: false,
            use_flash_for_program: false,
            launch_program_from_flash: false,
            auto_restart_program: false,
            force_flash_write: false,
            programming_timeout_ms: 10_000,
            additional_suppressions: Vec::new(),
            kernel_classes: Vec::new(),
            cctor_bring_to_front: vec!["System.String".to_string()],
            cctor_send_to_back: Vec::new(),
            array_enumerator: DEFAULT_ARRAY_ENUMERATOR.to_string(),
        }
    }
}

impl CompilerSettings {
    /// Settings for a kernel that is built once and written to flash.
    #[must_use]
    pub fn flash_kernel() -> Self {
        Self {
            create_kernel_for_flashing: true,
            use_flash_for_kernel: true,
            ..Self::default()
        }
    }

    /// Settings for a program that starts from flash after every reset.
    #[must_use]
    pub fn standalone() -> Self {
        Self {
            create_kernel_for_flashing: true,
            use_flash_for_kernel: true,
            use_flash_for_program: true,
            launch_program_from_flash: true,
            ..Self::default()
        }
    }

    /// The programming timeout.
    #[must_use]
    pub fn programming_timeout(&self) -> Duration {
        Duration::from_millis(self.programming_timeout_ms)
    }

    /// Whether uploaded data ends up in flash. `for_kernel` selects the kernel or the program
    /// part of the upload.
    #[must_use]
    pub fn do_copy_to_flash(&self, for_kernel: bool) -> bool {
        if for_kernel {
            self.use_flash_for_kernel
        } else {
            self.use_flash_for_program
        }
    }

    /// Flags written into the flash header of a program upload.
    #[must_use]
    pub fn startup_flags(&self) -> StartupFlags {
        let mut flags = StartupFlags::empty();
        if self.auto_restart_program {
            flags |= StartupFlags::AUTO_RESTART_AFTER_CRASH;
        }
        if self.launch_program_from_flash {
            flags |= StartupFlags::LAUNCH_FROM_FLASH;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = CompilerSettings::default();
        assert!(!settings.create_kernel_for_flashing);
        assert_eq!(settings.programming_timeout(), Duration::from_secs(10));
        assert_eq!(settings.array_enumerator, DEFAULT_ARRAY_ENUMERATOR);
        assert!(settings.startup_flags().is_empty());
    }

    #[test]
    fn presets_differ() {
        assert_ne!(CompilerSettings::flash_kernel(), CompilerSettings::default());

        let standalone = CompilerSettings::standalone();
        assert!(standalone.do_copy_to_flash(false));
        assert!(standalone
            .startup_flags()
            .contains(StartupFlags::LAUNCH_FROM_FLASH));
    }

    #[test]
    fn partial_json() {
        let settings: CompilerSettings = serde_json::from_str(
            r#"{ "auto_restart_program": true, "kernel_classes": ["Demo.Board"] }"#,
        )
        .unwrap();
        assert_eq!(settings.kernel_classes, vec!["Demo.Board".to_string()]);
        assert!(settings
            .startup_flags()
            .contains(StartupFlags::AUTO_RESTART_AFTER_CRASH));
        assert!(!settings.use_flash_for_program);
    }
}

//! Process-wide settings read once at startup. The daemon has no config
//! file format of its own (out of scope, see DESIGN.md), so this is just a
//! plain struct with sane defaults, the way a deployment would override
//! individual fields before passing it to `Orchestrator::new`.

/// Number of (bus, id) slots below which a requested `drive_count` is
/// rejected. Mirrors `VHBA_MAX_BUS * (VHBA_MAX_ID - 1)` from the real
/// driver's module parameters.
pub const MAX_BUS: u32 = 16;
pub const MAX_ID: u32 = 16;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of emulated drives this process exposes.
    pub drive_count: u32,
    /// Host command-pool depth (`can_queue` in the real driver).
    pub can_queue: usize,
    /// Audio backend to drive CD-DA playback through. Only `"null"` is
    /// implemented; anything else falls back to it with a warning.
    pub audio_driver: String,
    /// Default `tracing` filter directive, overridden by `RUST_LOG` if set.
    pub log_filter: String,
}

impl Config {
    /// Number of (bus, id) slots available given the driver's addressing
    /// scheme (one id per bus reserved), i.e. `MAX_BUS * (MAX_ID - 1)`.
    pub fn max_drive_slots(&self) -> u32 {
        MAX_BUS * (MAX_ID - 1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drive_count: 4,
            can_queue: vhba::host::DEFAULT_COMMAND_POOL_CAPACITY,
            audio_driver: "null".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_drive_count_fits_within_max_slots() {
        let config = Config::default();
        assert!(config.drive_count <= config.max_drive_slots());
    }

    #[test]
    fn default_can_queue_matches_the_hosts_default() {
        assert_eq!(Config::default().can_queue, vhba::host::DEFAULT_COMMAND_POOL_CAPACITY);
    }
}

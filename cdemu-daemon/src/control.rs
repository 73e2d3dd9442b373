//! The control surface an operator (or a higher-level manager process)
//! drives the daemon through: load/unload images, enumerate drives, read
//! and write per-drive options.

use std::io::BufRead;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMedium {
    Empty,
    CdRom,
    CdR,
    DvdRom,
    DvdPlusR,
}

#[derive(Debug, Clone)]
pub struct DriveStatus {
    pub drive_id: u32,
    pub loaded: bool,
    pub medium: DriveMedium,
    pub file_names: Vec<String>,
}

/// Per-drive options a control client can read or set. Booleans rather than
/// a bitmask, matching how few of these there are and how rarely they
/// change relative to command traffic.
#[derive(Debug, Clone, Default)]
pub struct DriveOptions {
    pub dpm_emulation: bool,
    pub transfer_rate_emulation: bool,
    pub device_id_vendor: Option<String>,
    pub device_id_product: Option<String>,
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("no drive with id {0}")]
    NoSuchDrive(u32),
    #[error("failed to load image: {0}")]
    LoadFailed(String),
}

pub trait ControlChannel: Send {
    fn enumerate_drives(&self) -> Vec<DriveStatus>;
    fn load_image(&self, drive_id: u32, filenames: &[String], options: &DriveOptions) -> Result<(), ControlError>;
    fn unload_image(&self, drive_id: u32) -> Result<(), ControlError>;
    fn get_option(&self, drive_id: u32) -> Result<DriveOptions, ControlError>;
    fn set_option(&self, drive_id: u32, options: DriveOptions) -> Result<(), ControlError>;
}

/// A line-oriented stdin control channel: one command per line, useful for
/// manual operation and for scripting from a parent process's pipe.
///
/// Commands: `load <id> <path>`, `unload <id>`, `list`, `quit`.
pub enum StdinCommand {
    Load { drive_id: u32, path: String },
    Unload { drive_id: u32 },
    List,
    Quit,
}

pub fn parse_stdin_command(line: &str) -> Option<StdinCommand> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "load" => {
            let drive_id = parts.next()?.parse().ok()?;
            let path = parts.next()?.to_string();
            Some(StdinCommand::Load { drive_id, path })
        }
        "unload" => {
            let drive_id = parts.next()?.parse().ok()?;
            Some(StdinCommand::Unload { drive_id })
        }
        "list" => Some(StdinCommand::List),
        "quit" => Some(StdinCommand::Quit),
        _ => None,
    }
}

/// Reads commands from `reader` until EOF or `quit`, dispatching each into
/// `channel`. Returns once the loop should stop.
pub fn run_stdin_loop(reader: impl BufRead, channel: &dyn ControlChannel) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match parse_stdin_command(&line) {
            Some(StdinCommand::Load { drive_id, path }) => {
                match channel.load_image(drive_id, &[path.clone()], &DriveOptions::default()) {
                    Ok(()) => tracing::info!("drive {}: loaded {}", drive_id, path),
                    Err(e) => tracing::error!("drive {}: failed to load {}: {}", drive_id, path, e),
                }
            }
            Some(StdinCommand::Unload { drive_id }) => match channel.unload_image(drive_id) {
                Ok(()) => tracing::info!("drive {}: unloaded", drive_id),
                Err(e) => tracing::error!("drive {}: failed to unload: {}", drive_id, e),
            },
            Some(StdinCommand::List) => {
                for status in channel.enumerate_drives() {
                    tracing::info!(
                        "drive {}: loaded={}",
                        status.drive_id,
                        status.loaded
                    );
                }
            }
            Some(StdinCommand::Quit) => return,
            None => tracing::warn!("unrecognized control command: {}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_load_command() {
        match parse_stdin_command("load 1 /tmp/disc.iso").unwrap() {
            StdinCommand::Load { drive_id, path } => {
                assert_eq!(drive_id, 1);
                assert_eq!(path, "/tmp/disc.iso");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unrecognized_command_parses_to_none() {
        assert!(parse_stdin_command("frobnicate").is_none());
    }
}

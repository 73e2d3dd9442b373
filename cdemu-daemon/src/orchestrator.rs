//! Owns the vector of active drives: wires each one to its VHBA slot and
//! its own MMC loop thread, and implements the control surface operators
//! use to load/unload images and inspect drive state.

use std::sync::Arc;

use parking_lot::Mutex;

use mmc_core::audio::{AudioEngine, AudioSink, NullAudioSink};
use mmc_core::device::{Drive, SharedDrive};
use mmc_core::disc::{DiscImage, Medium};
use mmc_core::dispatcher;
use vhba::client::{Response, VhbaClient};
use vhba::host::Host;
use vhba::hotplug::HotplugEvent;

use crate::config::Config;
use crate::control::{ControlChannel, ControlError, DriveMedium, DriveOptions, DriveStatus};

/// Builds the `AudioSink` a drive's playback engine pumps through. Only the
/// null driver is implemented; anything else in `Config::audio_driver` falls
/// back to it with a warning rather than failing startup.
fn audio_sink_for(driver_name: &str) -> Arc<dyn AudioSink> {
    match driver_name {
        "null" => Arc::new(NullAudioSink),
        other => {
            tracing::warn!("unknown audio_driver {:?}, falling back to the null sink", other);
            Arc::new(NullAudioSink)
        }
    }
}

struct DriveSlot {
    drive_id: u32,
    drive: SharedDrive,
    audio: Arc<AudioEngine>,
    sink: Arc<dyn AudioSink>,
    client: Arc<VhbaClient>,
    options: Mutex<DriveOptions>,
    mmc_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

pub struct Orchestrator {
    drives: Vec<DriveSlot>,
    host: Arc<Host>,
}

impl Orchestrator {
    /// # Panics
    /// Panics if `config.drive_count` exceeds the number of (bus, id) slots
    /// the addressing scheme can represent (`config.max_drive_slots()`).
    pub fn new(config: &Config) -> Self {
        assert!(
            config.drive_count <= config.max_drive_slots(),
            "drive_count {} exceeds {} available slots",
            config.drive_count,
            config.max_drive_slots()
        );

        let host = Arc::new(Host::with_capacity(config.can_queue));
        let sink = audio_sink_for(&config.audio_driver);
        let mut drives = Vec::with_capacity(config.drive_count as usize);

        for drive_id in 0..config.drive_count {
            let client = Arc::new(VhbaClient::open(host.clone(), 0, drive_id));
            drives.push(DriveSlot {
                drive_id,
                drive: Arc::new(Mutex::new(Drive::new())),
                audio: Arc::new(AudioEngine::new()),
                sink: sink.clone(),
                client,
                options: Mutex::new(DriveOptions::default()),
                mmc_thread: Mutex::new(None),
            });
        }

        Self { drives, host }
    }

    /// Drains the host's coalesced hotplug bookkeeping and logs the net
    /// add/remove per slot — the orchestrator's side of what a real driver
    /// would hand to `scsi_add_device`/`scsi_remove_device`.
    fn log_hotplug_events(&self) {
        for (devnum, event) in self.host.drain_hotplug_events() {
            match event {
                HotplugEvent::Added => tracing::info!("devnum {}: slot added", devnum),
                HotplugEvent::Removed => tracing::info!("devnum {}: slot removed", devnum),
            }
        }
    }

    /// Spawns one MMC loop thread per drive. Each thread pulls a request off
    /// its VHBA slot, runs it through the dispatcher, and writes the
    /// response back — exactly the userspace client loop of the real
    /// driver's contract, just backed by an in-process `Host` instead of a
    /// real character device.
    pub fn run(&self) {
        self.log_hotplug_events();

        for slot in &self.drives {
            let client = slot.client.clone();
            let drive = slot.drive.clone();
            let audio = slot.audio.clone();
            let sink = slot.sink.clone();

            let handle = std::thread::spawn(move || {
                client.run(|request| {
                    let response = dispatcher::dispatch(&drive, &audio, &sink, &request.cdb, &request.data_out);
                    let status = match response.status {
                        dispatcher::Status::Good => vhba::wire::STATUS_GOOD,
                        dispatcher::Status::CheckCondition => vhba::wire::STATUS_CHECK_CONDITION,
                    };
                    let payload = match response.sense {
                        Some(sense) => sense.to_vec(),
                        None => response.data,
                    };
                    Some(Response { status, payload })
                });
            });
            *slot.mmc_thread.lock() = Some(handle);
        }
    }

    /// Stops every audio pump, closes every VHBA slot, and joins each MMC
    /// loop thread before returning.
    pub fn shutdown(&self) {
        for slot in &self.drives {
            slot.audio.stop();
            slot.client.close();
        }
        for slot in &self.drives {
            if let Some(handle) = slot.mmc_thread.lock().take() {
                let _ = handle.join();
            }
        }
        self.log_hotplug_events();
    }

    fn find(&self, drive_id: u32) -> Option<&DriveSlot> {
        self.drives.iter().find(|slot| slot.drive_id == drive_id)
    }
}

impl ControlChannel for Orchestrator {
    fn enumerate_drives(&self) -> Vec<DriveStatus> {
        self.drives
            .iter()
            .map(|slot| {
                let drive = slot.drive.lock();
                let medium = match drive.medium() {
                    Medium::None => DriveMedium::Empty,
                    Medium::CdRom => DriveMedium::CdRom,
                    Medium::CdR => DriveMedium::CdR,
                    Medium::DvdRom => DriveMedium::DvdRom,
                    Medium::DvdPlusR => DriveMedium::DvdPlusR,
                };
                DriveStatus {
                    drive_id: slot.drive_id,
                    loaded: drive.is_loaded(),
                    medium,
                    file_names: Vec::new(),
                }
            })
            .collect()
    }

    fn load_image(&self, drive_id: u32, filenames: &[String], _options: &DriveOptions) -> Result<(), ControlError> {
        let slot = self.find(drive_id).ok_or(ControlError::NoSuchDrive(drive_id))?;
        let Some(path) = filenames.first() else {
            return Err(ControlError::LoadFailed("no filename given".into()));
        };

        // This daemon has no bundled image-file parser (out of scope — see
        // DESIGN.md); a real deployment supplies a `DiscImage` via a parser
        // plugin. Loading here always yields an empty placeholder image so
        // the control-plane contract (load succeeds, UA gets queued, medium
        // becomes visible) is still exercised end-to-end.
        let image: Arc<dyn DiscImage> =
            Arc::new(mmc_core::disc::MemoryDiscImage::from_mode1_blocks(Medium::CdRom, &[]));
        slot.drive.lock().load_image(image);
        tracing::info!("drive {}: loaded image {}", drive_id, path);
        Ok(())
    }

    fn unload_image(&self, drive_id: u32) -> Result<(), ControlError> {
        let slot = self.find(drive_id).ok_or(ControlError::NoSuchDrive(drive_id))?;
        slot.drive.lock().unload_image();
        Ok(())
    }

    fn get_option(&self, drive_id: u32) -> Result<DriveOptions, ControlError> {
        let slot = self.find(drive_id).ok_or(ControlError::NoSuchDrive(drive_id))?;
        Ok(slot.options.lock().clone())
    }

    fn set_option(&self, drive_id: u32, options: DriveOptions) -> Result<(), ControlError> {
        let slot = self.find(drive_id).ok_or(ControlError::NoSuchDrive(drive_id))?;
        *slot.options.lock() = options;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_drive_config() -> Config {
        Config {
            drive_count: 1,
            ..Config::default()
        }
    }

    #[test]
    fn load_then_enumerate_reports_loaded_medium() {
        let orchestrator = Orchestrator::new(&single_drive_config());
        orchestrator
            .load_image(0, &["disc.iso".to_string()], &DriveOptions::default())
            .unwrap();
        let statuses = orchestrator.enumerate_drives();
        assert!(statuses[0].loaded);
    }

    #[test]
    fn unknown_drive_id_reports_error() {
        let orchestrator = Orchestrator::new(&single_drive_config());
        assert!(orchestrator.unload_image(42).is_err());
    }

    #[test]
    fn startup_announces_one_hotplug_add_per_drive() {
        let orchestrator = Orchestrator::new(&Config {
            drive_count: 3,
            ..Config::default()
        });
        assert_eq!(orchestrator.host.drain_hotplug_events().len(), 3);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn drive_count_beyond_addressable_slots_panics() {
        Orchestrator::new(&Config {
            drive_count: 1_000_000,
            ..Config::default()
        });
    }
}

//! CD-DA playback engine: a cooperative single-producer pump owned by one
//! drive, started by PLAY AUDIO and driven by STOP/PAUSE/RESUME.
//!
//! The pump thread only ever needs the drive's state mutex for the instant
//! it takes to fetch a sector and advance the cursor; the blocking call into
//! the sink happens outside that lock. Control operations (`pause`/`stop`)
//! join the pump thread, so they're kept off the drive's own mutex — they
//! synchronize through a dedicated control lock instead, which the pump
//! thread never touches. That keeps "pause always stops playback before
//! returning" true without the two threads ever waiting on each other.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::addressing::Lba;
use crate::device::{AudioStatus, SharedDrive};
use crate::disc::DiscImage;
use crate::sector::SectorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub bits_per_sample: u8,
    pub channels: u8,
    pub sample_rate: u32,
}

pub const CD_DA_FORMAT: AudioFormat = AudioFormat {
    bits_per_sample: 16,
    channels: 2,
    sample_rate: 44100,
};

#[derive(Error, Debug)]
pub enum AudioSinkError {
    #[error("audio sink failed to open: {0}")]
    Open(String),
    #[error("audio sink failed mid-playback: {0}")]
    Playback(String),
}

pub trait AudioSink: Send + Sync {
    fn open(&self, format: AudioFormat) -> Result<(), AudioSinkError>;
    fn play_pcm(&self, samples: &[u8]) -> Result<(), AudioSinkError>;
    fn close(&self);

    /// True for a sink that does not itself block for the duration of
    /// playback (e.g. discarding samples), in which case the pump sleeps
    /// to preserve real-time sector pacing.
    fn is_null(&self) -> bool {
        false
    }
}

/// Discards audio; used when no real output device is configured. Timing
/// is preserved by the pump's null-driver sleep fallback.
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn open(&self, _format: AudioFormat) -> Result<(), AudioSinkError> {
        Ok(())
    }

    fn play_pcm(&self, _samples: &[u8]) -> Result<(), AudioSinkError> {
        Ok(())
    }

    fn close(&self) {}

    fn is_null(&self) -> bool {
        true
    }
}

struct PlaybackContext {
    drive: SharedDrive,
    disc: Arc<dyn DiscImage>,
    sink: Arc<dyn AudioSink>,
    cursor: Arc<AtomicI32>,
    end_lba: i32,
}

struct ControlState {
    handle: Option<JoinHandle<()>>,
    stop_requested: Arc<AtomicBool>,
    context: Option<PlaybackContext>,
}

pub struct AudioEngine {
    status: Arc<Mutex<AudioStatus>>,
    control: Mutex<ControlState>,
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(AudioStatus::NoStatus)),
            control: Mutex::new(ControlState {
                handle: None,
                stop_requested: Arc::new(AtomicBool::new(false)),
                context: None,
            }),
        }
    }

    fn join_previous(control: &mut ControlState) {
        if let Some(handle) = control.handle.take() {
            let _ = handle.join();
        }
    }

    fn spawn(&self, control: &mut ControlState) {
        let ctx = control
            .context
            .as_ref()
            .expect("spawn is only called once a playback context is set");
        let drive = ctx.drive.clone();
        let disc = ctx.disc.clone();
        let sink = ctx.sink.clone();
        let cursor = ctx.cursor.clone();
        let end_lba = ctx.end_lba;
        let status = self.status.clone();
        let stop_requested = Arc::new(AtomicBool::new(false));
        control.stop_requested = stop_requested.clone();

        sink.open(CD_DA_FORMAT).ok();

        control.handle = Some(std::thread::spawn(move || {
            pump_loop(drive, disc, sink, cursor, end_lba, stop_requested, status);
        }));
    }

    /// Starts playback from `start_lba` through `end_lba` (inclusive).
    /// Fails if already playing or paused.
    pub fn start(
        &self,
        drive: SharedDrive,
        disc: Arc<dyn DiscImage>,
        sink: Arc<dyn AudioSink>,
        start_lba: Lba,
        end_lba: Lba,
    ) -> bool {
        let mut control = self.control.lock();
        let mut status = self.status.lock();
        if *status == AudioStatus::Playing || *status == AudioStatus::Paused {
            return false;
        }
        drop(status);

        Self::join_previous(&mut control);
        control.context = Some(PlaybackContext {
            drive,
            disc,
            sink,
            cursor: Arc::new(AtomicI32::new(start_lba.value())),
            end_lba: end_lba.value(),
        });
        *self.status.lock() = AudioStatus::Playing;
        self.spawn(&mut control);
        true
    }

    /// Resumes from the preserved cursor. Fails unless currently paused.
    pub fn resume(&self) -> bool {
        let mut control = self.control.lock();
        {
            let mut status = self.status.lock();
            if *status != AudioStatus::Paused {
                return false;
            }
            *status = AudioStatus::Playing;
        }
        if control.context.is_none() {
            return false;
        }
        Self::join_previous(&mut control);
        self.spawn(&mut control);
        true
    }

    pub fn pause(&self) -> bool {
        let mut control = self.control.lock();
        {
            let mut status = self.status.lock();
            if *status != AudioStatus::Playing {
                return false;
            }
            *status = AudioStatus::Paused;
        }
        control.stop_requested.store(true, Ordering::SeqCst);
        Self::join_previous(&mut control);
        true
    }

    pub fn stop(&self) -> bool {
        let mut control = self.control.lock();
        {
            let mut status = self.status.lock();
            if *status != AudioStatus::Playing && *status != AudioStatus::Paused {
                return false;
            }
            *status = AudioStatus::NoStatus;
        }
        control.stop_requested.store(true, Ordering::SeqCst);
        Self::join_previous(&mut control);
        control.context = None;
        true
    }

    /// Reaps a finished pump thread before reporting a terminal status.
    pub fn get_status(&self) -> AudioStatus {
        let status = *self.status.lock();
        if status == AudioStatus::Completed || status == AudioStatus::Errored {
            let mut control = self.control.lock();
            Self::join_previous(&mut control);
        }
        status
    }

    pub fn current_lba(&self) -> Option<Lba> {
        let control = self.control.lock();
        control
            .context
            .as_ref()
            .map(|ctx| Lba::try_from(ctx.cursor.load(Ordering::SeqCst)).unwrap_or(Lba::ZERO))
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn pump_loop(
    drive: SharedDrive,
    disc: Arc<dyn DiscImage>,
    sink: Arc<dyn AudioSink>,
    cursor: Arc<AtomicI32>,
    end_lba: i32,
    stop_requested: Arc<AtomicBool>,
    status: Arc<Mutex<AudioStatus>>,
) {
    loop {
        if stop_requested.load(Ordering::SeqCst) {
            break;
        }
        if *status.lock() != AudioStatus::Playing {
            break;
        }

        let current = cursor.load(Ordering::SeqCst);
        if current > end_lba {
            *status.lock() = AudioStatus::Completed;
            break;
        }

        let lba = match Lba::try_from(current) {
            Ok(lba) => lba,
            Err(_) => {
                *status.lock() = AudioStatus::Errored;
                break;
            }
        };

        let sector = {
            let _drive_guard = drive.lock();
            match disc.get_sector(lba) {
                Ok(sector) => sector,
                Err(_) => {
                    *status.lock() = AudioStatus::Errored;
                    break;
                }
            }
        };

        if sector.sector_type != SectorType::Audio {
            *status.lock() = AudioStatus::Errored;
            break;
        }

        cursor.store(current + 1, Ordering::SeqCst);

        if sink.play_pcm(sector.user_data()).is_err() {
            *status.lock() = AudioStatus::Errored;
            break;
        }

        if sink.is_null() {
            std::thread::sleep(Duration::from_micros(1_000_000 / 75));
        }
    }

    sink.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Drive;
    use crate::disc::{MemoryDiscImage, Medium};
    use parking_lot::Mutex as PLMutex;

    fn audio_image(sectors: usize) -> Arc<dyn DiscImage> {
        use crate::addressing::Msf;
        let blocks: Vec<[u8; 2048]> = (0..sectors).map(|i| [i as u8; 2048]).collect();
        let sectors = blocks
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let lba = Lba::try_from(i as i32).unwrap();
                crate::sector::encode(SectorType::Audio, Msf::from(lba), &[0u8; 2352]).unwrap()
            })
            .collect();
        Arc::new(MemoryDiscImage::new(Medium::CdRom, Lba::ZERO, sectors, vec![Lba::ZERO]))
    }

    #[test]
    fn start_then_stop_transitions_cleanly() {
        let engine = AudioEngine::new();
        let drive: SharedDrive = Arc::new(PLMutex::new(Drive::new()));
        let disc = audio_image(4);
        let sink = Arc::new(NullAudioSink);

        assert!(engine.start(drive, disc, sink, Lba::ZERO, Lba::try_from(3).unwrap()));
        assert!(engine.pause() || engine.get_status() == AudioStatus::Completed);
        assert!(engine.stop() || engine.get_status() == AudioStatus::NoStatus);
    }

    #[test]
    fn double_start_fails() {
        let engine = AudioEngine::new();
        let drive: SharedDrive = Arc::new(PLMutex::new(Drive::new()));
        let disc = audio_image(100);
        let sink = Arc::new(NullAudioSink);
        assert!(engine.start(drive.clone(), disc.clone(), sink.clone(), Lba::ZERO, Lba::try_from(99).unwrap()));
        assert!(!engine.start(drive, disc, sink, Lba::ZERO, Lba::try_from(99).unwrap()));
        engine.stop();
    }
}

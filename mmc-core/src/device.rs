//! Per-drive state: the medium, tray, mode pages, Unit Attention queue, and
//! read parameters a single emulated drive carries between commands.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::addressing::Lba;
use crate::disc::{DiscImage, Medium};
use crate::features::FeatureEntry;
use crate::sense::UnitAttentionCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    NoStatus,
    Playing,
    Paused,
    Completed,
    Errored,
}

/// Current vs. default image of a single mode page, keyed by page code.
#[derive(Debug, Clone)]
pub struct ModePage {
    pub default: Vec<u8>,
    pub current: Vec<u8>,
}

impl ModePage {
    pub fn new(default: Vec<u8>) -> Self {
        let current = default.clone();
        Self { default, current }
    }
}

/// Read-parameter state tracked across READ/PLAY commands: not part of a
/// mode page, but still persists between commands the way a real drive's
/// internal cursor does.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadParameters {
    pub current_lba: Lba,
    pub cd_da_accurate_stream: bool,
    pub dap: bool,
}

pub struct AudioCursor {
    pub position: Lba,
    pub end_sector: Lba,
}

/// Everything a single emulated slot carries: loaded medium, door state,
/// queued Unit Attentions, mode pages, feature state, and audio playback
/// position. One of these lives behind a `parking_lot::Mutex` per slot,
/// held for the duration of MMC command handling (and briefly, per-sector,
/// by the audio pump thread).
pub struct Drive {
    pub image: Option<Arc<dyn DiscImage>>,
    pub tray: TrayState,
    pub lock_count: u32,
    pub unit_attention: crate::sense::UnitAttentionQueue,
    pub mode_pages: HashMap<u8, ModePage>,
    pub read_parameters: ReadParameters,
    pub audio_status: AudioStatus,
    pub audio_cursor: Option<AudioCursor>,
}

impl Drive {
    pub fn new() -> Self {
        let mut mode_pages = HashMap::new();
        // Page 0x01: R-W Error Recovery. AWRE/ARRE off, read retry count 3.
        mode_pages.insert(0x01, ModePage::new(vec![0x01, 0x0A, 0x00, 0x03, 0, 0, 0, 0, 0, 3, 0, 0]));
        // Page 0x0E: CD Audio Control. Immediate bit set, SOTC clear, both
        // output ports routed to both channels at full volume.
        mode_pages.insert(
            0x0E,
            ModePage::new(vec![0x0E, 0x0E, 0x04, 0, 0, 0, 0, 0, 0x01, 0xFF, 0x02, 0xFF, 0, 0, 0, 0]),
        );

        Self {
            image: None,
            tray: TrayState::Closed,
            lock_count: 0,
            unit_attention: crate::sense::UnitAttentionQueue::new(),
            mode_pages,
            read_parameters: ReadParameters::default(),
            audio_status: AudioStatus::NoStatus,
            audio_cursor: None,
        }
    }

    pub fn medium(&self) -> Medium {
        self.image.as_ref().map_or(Medium::None, |i| i.medium_type())
    }

    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// Load a new image, closing the tray and queueing the Unit Attention a
    /// real drive raises on a medium change.
    pub fn load_image(&mut self, image: Arc<dyn DiscImage>) {
        let medium = image.medium_type();
        self.image = Some(image);
        self.tray = TrayState::Closed;
        self.unit_attention
            .push(UnitAttentionCondition::NotReadyToReadyChangeMediumMayHaveChanged);
        tracing::info!("medium loaded: {:?}", medium);
    }

    pub fn unload_image(&mut self) {
        self.image = None;
        self.audio_status = AudioStatus::NoStatus;
        self.audio_cursor = None;
        tracing::info!("medium unloaded");
    }

    /// Every command handler that isn't INQUIRY or REQUEST SENSE drains
    /// (at most) one queued Unit Attention before doing anything else.
    pub fn drain_unit_attention(&mut self) -> Option<UnitAttentionCondition> {
        self.unit_attention.pop()
    }

    pub fn feature_list(&self) -> Vec<FeatureEntry> {
        crate::features::feature_list(self.medium())
    }

    pub fn open_tray(&mut self) -> bool {
        if self.lock_count > 0 {
            tracing::warn!("tray open refused: medium locked");
            return false;
        }
        self.tray = TrayState::Open;
        self.unload_image();
        true
    }

    pub fn close_tray(&mut self) {
        self.tray = TrayState::Closed;
    }

    pub fn set_lock(&mut self, locked: bool) {
        if locked {
            self.lock_count += 1;
        } else if self.lock_count > 0 {
            self.lock_count -= 1;
        }
    }
}

impl Default for Drive {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedDrive = Arc<Mutex<Drive>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::MemoryDiscImage;

    #[test]
    fn loading_queues_unit_attention() {
        let mut drive = Drive::new();
        assert!(drive.unit_attention.is_empty());
        let image = Arc::new(MemoryDiscImage::from_mode1_blocks(Medium::CdRom, &[[0u8; 2048]]));
        drive.load_image(image);
        assert!(!drive.unit_attention.is_empty());
        assert_eq!(
            drive.drain_unit_attention(),
            Some(UnitAttentionCondition::NotReadyToReadyChangeMediumMayHaveChanged)
        );
        assert!(drive.unit_attention.is_empty());
    }

    #[test]
    fn locked_tray_refuses_to_open() {
        let mut drive = Drive::new();
        drive.set_lock(true);
        assert!(!drive.open_tray());
        drive.set_lock(false);
        assert!(drive.open_tray());
    }

    #[test]
    fn unloading_clears_audio_state() {
        let mut drive = Drive::new();
        drive.audio_status = AudioStatus::Playing;
        drive.unload_image();
        assert_eq!(drive.audio_status, AudioStatus::NoStatus);
    }
}

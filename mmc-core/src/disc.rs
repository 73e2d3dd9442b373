//! The `DiscImage` trait: the boundary between the MMC command layer and
//! whatever actually backs a disc (an image file parser, a network source,
//! or — in tests — an in-memory fixture).

use thiserror::Error;

use crate::addressing::Lba;
use crate::sector::{Sector, SectorType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Medium {
    #[default]
    None,
    CdRom,
    CdR,
    DvdRom,
    DvdPlusR,
}

#[derive(Error, Debug)]
pub enum DiscImageError {
    #[error("LBA {0:?} is outside the image's extent")]
    OutOfRange(Lba),
    #[error("layer {layer} does not exist on this medium")]
    NoSuchLayer { layer: u8 },
    #[error("disc structure type 0x{0:02X} is not available for this medium")]
    UnsupportedStructure(u8),
}

/// A disc's angular position and the density (bytes/radian) DPM needs,
/// reported per-sector when the image carries Deterministic Positioning
/// Measurement data for copy-protection emulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpmSample {
    pub angle: f64,
    pub density: f64,
}

pub trait DiscImage: Send + Sync {
    fn get_sector(&self, lba: Lba) -> Result<Sector, DiscImageError>;

    fn medium_type(&self) -> Medium;

    fn read_disc_structure(&self, layer: u8, structure_type: u8) -> Result<Vec<u8>, DiscImageError>;

    fn dpm_data_for_sector(&self, _lba: Lba) -> Option<DpmSample> {
        None
    }

    fn layout_start_sector(&self) -> i32;

    fn number_of_sessions(&self) -> u32;

    fn number_of_tracks(&self) -> u32;

    fn track_start(&self, track_number: u32) -> Option<Lba>;

    /// Total number of addressable sectors on the medium. READ CAPACITY's
    /// last-LBA field is `sector_count() - 1`.
    fn sector_count(&self) -> u32;

    fn mcn(&self) -> Option<[u8; 13]> {
        None
    }
}

/// A fully in-memory disc image. Used for tests and to model the "no medium"
/// state cleanly (an empty image can't back a request, so callers go through
/// `Option<Box<dyn DiscImage>>` rather than relying on this being hollow).
pub struct MemoryDiscImage {
    medium: Medium,
    sectors: Vec<Sector>,
    start_lba: Lba,
    track_starts: Vec<Lba>,
}

impl MemoryDiscImage {
    pub fn new(medium: Medium, start_lba: Lba, sectors: Vec<Sector>, track_starts: Vec<Lba>) -> Self {
        Self {
            medium,
            sectors,
            start_lba,
            track_starts,
        }
    }

    /// Build a single-track Mode 1 image out of raw 2048-byte blocks.
    pub fn from_mode1_blocks(medium: Medium, blocks: &[[u8; 2048]]) -> Self {
        use crate::addressing::Msf;

        let sectors = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let lba = Lba::try_from(i as i32).expect("in-memory image stays within range");
                crate::sector::encode(SectorType::Mode1, Msf::from(lba), block)
                    .expect("2048-byte block always fits a Mode1 sector")
            })
            .collect();

        Self {
            medium,
            sectors,
            start_lba: Lba::ZERO,
            track_starts: vec![Lba::ZERO],
        }
    }
}

impl DiscImage for MemoryDiscImage {
    fn get_sector(&self, lba: Lba) -> Result<Sector, DiscImageError> {
        let index = lba.value() - self.start_lba.value();
        if index < 0 {
            return Err(DiscImageError::OutOfRange(lba));
        }
        self.sectors
            .get(index as usize)
            .cloned()
            .ok_or(DiscImageError::OutOfRange(lba))
    }

    fn medium_type(&self) -> Medium {
        self.medium
    }

    fn read_disc_structure(&self, layer: u8, structure_type: u8) -> Result<Vec<u8>, DiscImageError> {
        if layer != 0 {
            return Err(DiscImageError::NoSuchLayer { layer });
        }
        match structure_type {
            // Physical format information: enough for READ DISC STRUCTURE callers
            // to report back a plausible capacity.
            0x00 => {
                let mut data = vec![0u8; 4 + 2048 / 8];
                let size = self.sectors.len() as u32;
                data[4..8].copy_from_slice(&size.to_be_bytes());
                Ok(data)
            }
            other => Err(DiscImageError::UnsupportedStructure(other)),
        }
    }

    fn layout_start_sector(&self) -> i32 {
        self.start_lba.value()
    }

    fn number_of_sessions(&self) -> u32 {
        1
    }

    fn number_of_tracks(&self) -> u32 {
        self.track_starts.len() as u32
    }

    fn track_start(&self, track_number: u32) -> Option<Lba> {
        self.track_starts.get((track_number as usize).wrapping_sub(1)).copied()
    }

    fn sector_count(&self) -> u32 {
        self.sectors.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_sector_reads_back() {
        let image = MemoryDiscImage::from_mode1_blocks(Medium::CdRom, &[[7u8; 2048]]);
        let sector = image.get_sector(Lba::ZERO).unwrap();
        assert_eq!(&sector.user_data()[..4], &[7, 7, 7, 7]);
    }

    #[test]
    fn out_of_range_sector_errors() {
        let image = MemoryDiscImage::from_mode1_blocks(Medium::CdRom, &[[0u8; 2048]]);
        assert!(image.get_sector(Lba::try_from(1).unwrap()).is_err());
    }
}

/// The number of frames per second of audio.
pub const FRAMES_PER_SECOND: u8 = 75;

/// The number of frames per minute of audio.
pub const FRAMES_PER_MINUTE: u16 = FRAMES_PER_SECOND as u16 * 60;

/// The number of frames in the lead-in pregap.
///
/// CDs are designed so that the first frame of playable audio occurs at
/// 00:02:00 (2 seconds in), meaning there are 150 frames of gap between LBA
/// 0 at 00:00:00 and LSN 0 at 00:02:00.
pub const PREGAP_OFFSET: u8 = FRAMES_PER_SECOND * 2;

/// Bytes in a full raw CD sector (sync + header + user data + EDC/ECC).
pub const SECTOR_SIZE_RAW: usize = 2352;

/// Bytes of user data in a Mode 1 or Mode 2 Form 1 sector.
pub const SECTOR_SIZE_MODE1: usize = 2048;

/// Bytes of user data in a Mode 2 Form 2 sector (no ECC, weaker EDC).
pub const SECTOR_SIZE_MODE2_FORM2: usize = 2324;

/// Bytes of interleaved P/W subchannel data per sector.
pub const SUBCHANNEL_SIZE: usize = 96;

/// Maximum number of sectors READ CD / READ(10) will transfer in a single
/// command before the dispatcher reports a residual (mirrors the firmware
/// transfer-size limits real MMC-6 drives advertise).
pub const MAX_SECTORS_PER_TRANSFER: u32 = 27;

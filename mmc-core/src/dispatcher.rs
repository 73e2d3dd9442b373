//! MMC command dispatcher: decode → validate → handle → marshal.
//!
//! Every handler returns a `Vec<u8>` it would like the host to see; the
//! dispatcher truncates that to the CDB's allocation length and reports the
//! residual, and never touches the device lock while the audio engine is
//! doing a blocking join (see [`crate::audio`]).

use std::sync::Arc;

use crate::addressing::{Lba, Msf};
use crate::audio::AudioSink;
use crate::cdb::{self, CdbError, CdbRequest};
use crate::device::{AudioStatus, Drive, SharedDrive, TrayState};
use crate::disc::Medium;
use crate::sense::{
    CDBOrParameterValidationError, GeneralMediaAccessError, MMCError, ProtocolError, ReadinessError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Good,
    CheckCondition,
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub status: Status,
    pub data: Vec<u8>,
    pub sense: Option<[u8; 18]>,
    pub residual: u32,
}

impl CommandResponse {
    fn good(data: Vec<u8>, allocation_length: u32) -> Self {
        let produced = data.len() as u32;
        let residual = allocation_length.saturating_sub(produced);
        CommandResponse {
            status: Status::Good,
            data,
            sense: None,
            residual,
        }
    }

    fn check_condition(error: MMCError) -> Self {
        CommandResponse {
            status: Status::CheckCondition,
            data: Vec::new(),
            sense: Some(error.to_sense_descriptor()),
            residual: 0,
        }
    }
}

/// Dispatches one CDB against a drive's state. `allocation_length` is the
/// allocation length field the specific CDB encoded (already extracted by
/// the caller, since its offset varies by opcode); `data_out` carries the
/// parameter list for MODE SELECT / SEND KEY.
pub fn dispatch(
    drive: &SharedDrive,
    audio: &crate::audio::AudioEngine,
    sink: &Arc<dyn AudioSink>,
    cdb_bytes: &[u8],
    data_out: &[u8],
) -> CommandResponse {
    let opcode = cdb_bytes.first().copied().unwrap_or(0);

    let request = match cdb::decode(cdb_bytes) {
        Ok(request) => request,
        Err(CdbError::UnsupportedOperationCode(_)) => {
            return CommandResponse::check_condition(CDBOrParameterValidationError::InvalidCommandOperationCode.into());
        }
        Err(CdbError::InvalidField) => {
            return CommandResponse::check_condition(CDBOrParameterValidationError::InvalidFieldInCdb.into());
        }
        Err(CdbError::LogicalBlockAddressOutOfRange) => {
            return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into());
        }
    };

    // REQUEST SENSE and INQUIRY never consume Unit Attention.
    if opcode != 0x03 && opcode != 0x12 {
        let pending = drive.lock().drain_unit_attention();
        if let Some(ua) = pending {
            return CommandResponse::check_condition(ua.into());
        }
    }

    match request {
        CdbRequest::TestUnitReady(r) => handle_test_unit_ready(drive, r.control),
        CdbRequest::RequestSense(r) => handle_request_sense(drive, r.allocation_length.into()),
        CdbRequest::Inquiry(r) => handle_inquiry(drive, r.allocation_length.into()),
        CdbRequest::ModeSense(r) => handle_mode_sense(drive, r.page_code, r.allocation_length.into()),
        CdbRequest::ModeSelect(r) => handle_mode_select(drive, data_out, r.parameter_list_length.into()),
        CdbRequest::StartStopUnit(r) => handle_start_stop_unit(drive, r.load_eject, r.start),
        CdbRequest::PreventAllowMediumRemoval(r) => handle_prevent_allow(drive, r.prevent),
        CdbRequest::ReadCapacity(_) => handle_read_capacity(drive),
        CdbRequest::Read10(r) => handle_read(drive, r.lba, u32::from(r.transfer_length)),
        CdbRequest::Read12(r) => handle_read(drive, r.lba, r.transfer_length),
        CdbRequest::ReadCd(r) => handle_read_cd(drive, r.start_lba, r.transfer_length, r.main_channel),
        CdbRequest::ReadSubchannel(r) => handle_read_subchannel(drive, audio, r.allocation_length.into()),
        CdbRequest::ReadToc(r) => handle_read_toc(drive, r.format, r.allocation_length.into()),
        CdbRequest::ReadHeader(r) => handle_read_header(drive, r.lba, r.allocation_length.into()),
        CdbRequest::GetConfiguration(r) => handle_get_configuration(drive, r.starting_feature, r.allocation_length.into()),
        CdbRequest::GetEventStatusNotification(r) => handle_gesn(drive, r.allocation_length.into()),
        CdbRequest::MechanismStatus(r) => handle_mechanism_status(drive, r.allocation_length.into()),
        CdbRequest::PlayAudio(r) => handle_play_audio(drive, audio, sink, r.start_lba, r.play_length),
        CdbRequest::StopPlayScan(_) => handle_stop_play(audio),
        CdbRequest::PauseResume(r) => handle_pause_resume(audio, r.resume),
        CdbRequest::ReadDiscStructure(r) => handle_read_disc_structure(drive, r.layer_number, r.format, r.allocation_length.into()),
        CdbRequest::ReportKey(r) => handle_report_key(drive, r.allocation_length.into()),
        CdbRequest::SendKey(_) => CommandResponse::good(Vec::new(), 0),
    }
}

fn require_medium(drive: &SharedDrive) -> Result<(), MMCError> {
    let guard = drive.lock();
    if guard.is_loaded() {
        Ok(())
    } else {
        Err(ReadinessError::MediumNotPresent.into())
    }
}

fn handle_test_unit_ready(drive: &SharedDrive, _control: cdb::Control) -> CommandResponse {
    match require_medium(drive) {
        Ok(()) => CommandResponse::good(Vec::new(), 0),
        Err(e) => CommandResponse::check_condition(e),
    }
}

fn handle_request_sense(drive: &SharedDrive, allocation_length: u32) -> CommandResponse {
    let condition = drive.lock().drain_unit_attention();
    let sense = match condition {
        Some(ua) => MMCError::from(ua).to_sense_descriptor(),
        None => crate::sense::build_fixed_sense(0, 0, 0),
    };
    CommandResponse::good(sense.to_vec(), allocation_length)
}

const VENDOR_ID: &[u8; 8] = b"CDEmu   ";
const PRODUCT_ID: &[u8; 16] = b"Virt. CD/DVD-ROM";
const PRODUCT_REVISION: &[u8; 4] = b"1.10";

fn handle_inquiry(_drive: &SharedDrive, allocation_length: u32) -> CommandResponse {
    let mut data = vec![0u8; 36];
    data[0] = 0x05; // CD/DVD device, connected
    data[1] = 0x80; // removable medium
    data[2] = 0x02; // ANSI version
    data[3] = 0x02; // response data format
    data[4] = 31; // additional length
    data[8..16].copy_from_slice(VENDOR_ID);
    data[16..32].copy_from_slice(PRODUCT_ID);
    data[32..36].copy_from_slice(PRODUCT_REVISION);
    CommandResponse::good(data, allocation_length)
}

fn handle_mode_sense(drive: &SharedDrive, page_code: u8, allocation_length: u32) -> CommandResponse {
    let guard = drive.lock();
    let mut body = Vec::new();
    if page_code == 0x3F {
        for page in guard.mode_pages.values() {
            body.extend_from_slice(&page.current);
        }
    } else if let Some(page) = guard.mode_pages.get(&page_code) {
        body.extend_from_slice(&page.current);
    } else {
        drop(guard);
        return CommandResponse::check_condition(CDBOrParameterValidationError::InvalidFieldInCdb.into());
    }
    drop(guard);

    let mut data = vec![0u8; 8];
    data[0] = (body.len() + 6) as u8;
    data.extend_from_slice(&body);
    CommandResponse::good(data, allocation_length)
}

fn handle_mode_select(drive: &SharedDrive, data_out: &[u8], parameter_list_length: u32) -> CommandResponse {
    if (parameter_list_length as usize) > data_out.len() || data_out.len() < 8 {
        return CommandResponse::check_condition(CDBOrParameterValidationError::ParameterListLengthError.into());
    }
    let body = &data_out[8..];
    let mut offset = 0;
    let mut guard = drive.lock();
    while offset + 2 <= body.len() {
        let page_code = body[offset] & 0x3F;
        let len = body.get(offset + 1).copied().unwrap_or(0) as usize;
        let end = offset + 2 + len;
        if end > body.len() {
            break;
        }
        let Some(page) = guard.mode_pages.get_mut(&page_code) else {
            drop(guard);
            return CommandResponse::check_condition(
                CDBOrParameterValidationError::InvalidFieldInParameterList.into(),
            );
        };
        let n = page.current.len().min(end - offset);
        page.current[..n].copy_from_slice(&body[offset..offset + n]);
        offset = end;
    }
    CommandResponse::good(Vec::new(), 0)
}

fn handle_start_stop_unit(drive: &SharedDrive, load_eject: bool, start: bool) -> CommandResponse {
    let mut guard = drive.lock();
    if load_eject {
        if start {
            guard.close_tray();
        } else if !guard.open_tray() {
            drop(guard);
            return CommandResponse::check_condition(ProtocolError::MediumRemovalPrevented.into());
        }
    }
    CommandResponse::good(Vec::new(), 0)
}

fn handle_prevent_allow(drive: &SharedDrive, prevent: bool) -> CommandResponse {
    drive.lock().set_lock(prevent);
    CommandResponse::good(Vec::new(), 0)
}

fn handle_read_capacity(drive: &SharedDrive) -> CommandResponse {
    let guard = drive.lock();
    if !guard.is_loaded() {
        drop(guard);
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let image = guard.image.clone().unwrap();
    drop(guard);

    let last_lba = image.sector_count().saturating_sub(1);
    let mut data = vec![0u8; 8];
    data[0..4].copy_from_slice(&last_lba.to_be_bytes());
    data[4..8].copy_from_slice(&2048u32.to_be_bytes());
    CommandResponse::good(data, 8)
}

fn handle_read(drive: &SharedDrive, lba: i32, transfer_length: u32) -> CommandResponse {
    let guard = drive.lock();
    if !guard.is_loaded() {
        drop(guard);
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let image = guard.image.clone().unwrap();
    drop(guard);

    let mut data = Vec::with_capacity(transfer_length as usize * 2048);
    for offset in 0..transfer_length {
        let target = match Lba::try_from(lba + offset as i32) {
            Ok(l) => l,
            Err(_) => return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into()),
        };
        match image.get_sector(target) {
            Ok(sector) => data.extend_from_slice(sector.user_data()),
            Err(_) => return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into()),
        }
    }
    let allocation = data.len() as u32;
    CommandResponse::good(data, allocation)
}

fn handle_read_cd(
    drive: &SharedDrive,
    start_lba: i32,
    transfer_length: u32,
    main_channel: cdb::MainChannelFlags,
) -> CommandResponse {
    let guard = drive.lock();
    if !guard.is_loaded() {
        drop(guard);
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let image = guard.image.clone().unwrap();
    drop(guard);

    let mut data = Vec::new();
    for offset in 0..transfer_length {
        let lba = match Lba::try_from(start_lba + offset as i32) {
            Ok(l) => l,
            Err(_) => return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into()),
        };
        let sector = match image.get_sector(lba) {
            Ok(s) => s,
            Err(_) => return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into()),
        };
        if main_channel.contains(cdb::MainChannelFlags::SYNC) {
            data.extend_from_slice(&sector.buf[0..12]);
        }
        if main_channel.contains(cdb::MainChannelFlags::HEADER) {
            data.extend_from_slice(&sector.buf[12..16]);
        }
        if main_channel.contains(cdb::MainChannelFlags::USER_DATA) {
            data.extend_from_slice(sector.user_data());
        }
        if main_channel.contains(cdb::MainChannelFlags::EDC_ECC) {
            data.extend_from_slice(&sector.buf[2064..2352]);
        }
    }
    let allocation = data.len() as u32;
    CommandResponse::good(data, allocation)
}

fn handle_read_subchannel(drive: &SharedDrive, audio: &crate::audio::AudioEngine, allocation_length: u32) -> CommandResponse {
    if require_medium(drive).is_err() {
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let status = audio.get_status();
    let lba = audio.current_lba().unwrap_or(Lba::ZERO);
    let msf = Msf::from(lba);

    let mut data = vec![0u8; 16];
    data[1] = match status {
        AudioStatus::Playing => 0x11,
        AudioStatus::Paused => 0x12,
        AudioStatus::Completed => 0x13,
        AudioStatus::Errored => 0x14,
        AudioStatus::NoStatus => 0x15,
    };
    data[3] = 12; // sub-channel data length
    data[5] = 1; // ADR/CONTROL: mode-1 Q
    data[8..12].copy_from_slice(&msf.to_be_bytes());
    CommandResponse::good(data, allocation_length)
}

fn handle_read_toc(drive: &SharedDrive, format: u8, allocation_length: u32) -> CommandResponse {
    let guard = drive.lock();
    if !guard.is_loaded() {
        drop(guard);
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let image = guard.image.clone().unwrap();
    drop(guard);

    if format != 0 {
        return CommandResponse::check_condition(CDBOrParameterValidationError::InvalidFieldInCdb.into());
    }

    let tracks = image.number_of_tracks().max(1);
    let mut body = Vec::new();
    for track in 1..=tracks {
        let start = image.track_start(track).unwrap_or(Lba::ZERO);
        body.push(0); // reserved
        body.push(0x14); // ADR/CONTROL: data track
        body.push(track as u8);
        body.push(0); // reserved
        body.extend_from_slice(&start.value().to_be_bytes());
    }
    // lead-out track descriptor
    let leadout = image.track_start(tracks).map(|l| l.value()).unwrap_or(0) + 1;
    body.push(0);
    body.push(0x14);
    body.push(0xAA);
    body.push(0);
    body.extend_from_slice(&leadout.to_be_bytes());

    let mut data = vec![0u8; 4];
    let toc_len = (2 + body.len()) as u16;
    data[0..2].copy_from_slice(&toc_len.to_be_bytes());
    data[2] = 1;
    data[3] = tracks as u8;
    data.extend_from_slice(&body);
    CommandResponse::good(data, allocation_length)
}

fn handle_read_header(drive: &SharedDrive, lba: i32, allocation_length: u32) -> CommandResponse {
    if require_medium(drive).is_err() {
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let Ok(lba) = Lba::try_from(lba) else {
        return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into());
    };
    let msf = Msf::from(lba);
    let mut data = vec![0u8; 8];
    data[0] = 0x01; // Mode 1
    data[4..8].copy_from_slice(&msf.to_be_bytes());
    CommandResponse::good(data, allocation_length)
}

fn handle_get_configuration(drive: &SharedDrive, starting_feature: u16, allocation_length: u32) -> CommandResponse {
    let medium = drive.lock().medium();
    let data = crate::features::encode_configuration(medium, starting_feature);
    CommandResponse::good(data, allocation_length)
}

fn handle_gesn(drive: &SharedDrive, allocation_length: u32) -> CommandResponse {
    let loaded = drive.lock().is_loaded();
    let mut data = vec![0u8; 8];
    data[1] = 0x04; // media event class
    data[2] = 0x04;
    data[4] = 0x02; // event code: new media / no change, simplified
    data[5] = if loaded { 0x02 } else { 0x00 };
    CommandResponse::good(data, allocation_length)
}

fn handle_mechanism_status(drive: &SharedDrive, allocation_length: u32) -> CommandResponse {
    let guard = drive.lock();
    let mut data = vec![0u8; 8];
    data[0] = match guard.tray {
        TrayState::Closed => 0,
        TrayState::Open => 1 << 5,
    };
    if guard.is_loaded() {
        data[0] |= 1 << 4;
    }
    CommandResponse::good(data, allocation_length)
}

fn handle_play_audio(
    drive: &SharedDrive,
    audio: &crate::audio::AudioEngine,
    sink: &Arc<dyn AudioSink>,
    start_lba: i32,
    play_length: u32,
) -> CommandResponse {
    let guard = drive.lock();
    if !guard.is_loaded() {
        drop(guard);
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let image = guard.image.clone().unwrap();
    drop(guard);

    let Ok(start) = Lba::try_from(start_lba) else {
        return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into());
    };
    let Ok(end) = Lba::try_from(start_lba + play_length.max(1) as i32 - 1) else {
        return CommandResponse::check_condition(CDBOrParameterValidationError::LogicalBlockAddressOutOfRange.into());
    };

    if !audio.start(drive.clone(), image, sink.clone(), start, end) {
        return CommandResponse::check_condition(GeneralMediaAccessError::CdControlError.into());
    }
    CommandResponse::good(Vec::new(), 0)
}

fn handle_stop_play(audio: &crate::audio::AudioEngine) -> CommandResponse {
    audio.stop();
    CommandResponse::good(Vec::new(), 0)
}

fn handle_pause_resume(audio: &crate::audio::AudioEngine, resume: bool) -> CommandResponse {
    let ok = if resume { audio.resume() } else { audio.pause() };
    if ok {
        CommandResponse::good(Vec::new(), 0)
    } else {
        CommandResponse::check_condition(ProtocolError::CommandSequenceError.into())
    }
}

fn handle_read_disc_structure(drive: &SharedDrive, layer: u8, format: u8, allocation_length: u32) -> CommandResponse {
    let guard = drive.lock();
    if !guard.is_loaded() {
        drop(guard);
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    let image = guard.image.clone().unwrap();
    drop(guard);

    match image.read_disc_structure(layer, format) {
        Ok(data) => CommandResponse::good(data, allocation_length),
        Err(_) => CommandResponse::check_condition(CDBOrParameterValidationError::InvalidFieldInCdb.into()),
    }
}

fn handle_report_key(drive: &SharedDrive, allocation_length: u32) -> CommandResponse {
    if require_medium(drive).is_err() {
        return CommandResponse::check_condition(ReadinessError::MediumNotPresent.into());
    }
    // No CSS support: report "no region / not authenticated" via an empty
    // payload rather than synthesizing key material we don't have.
    CommandResponse::good(Vec::new(), allocation_length)
}

#[allow(dead_code)]
fn medium_to_byte(medium: Medium) -> u8 {
    match medium {
        Medium::None => 0,
        Medium::CdRom | Medium::CdR => 1,
        Medium::DvdRom | Medium::DvdPlusR => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEngine, NullAudioSink};
    use crate::disc::MemoryDiscImage;
    use crate::sector::{RegionMask, Sector, SectorType};
    use parking_lot::Mutex;

    fn drive_with_medium() -> SharedDrive {
        let mut drive = Drive::new();
        let image = Arc::new(MemoryDiscImage::from_mode1_blocks(Medium::CdRom, &[[0u8; 2048]; 4]));
        drive.load_image(image);
        Arc::new(Mutex::new(drive))
    }

    #[test]
    fn test_unit_ready_reports_unit_attention_first() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        let response = dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]);
        assert_eq!(response.status, Status::CheckCondition);
    }

    #[test]
    fn test_unit_ready_succeeds_after_ua_drained() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]);
        let response = dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]);
        assert_eq!(response.status, Status::Good);
    }

    #[test]
    fn inquiry_never_consumes_unit_attention() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        let inquiry_cdb = [0x12, 0, 0, 0, 36, 0];
        dispatch(&drive, &audio, &sink, &inquiry_cdb, &[]);
        let tur = dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]);
        assert_eq!(tur.status, Status::CheckCondition);
    }

    #[test]
    fn unsupported_opcode_reports_invalid_command() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        let response = dispatch(&drive, &audio, &sink, &[0xFF, 0, 0, 0, 0, 0], &[]);
        assert_eq!(response.status, Status::CheckCondition);
        assert_eq!(response.sense.unwrap()[12], 0x20);
    }

    #[test]
    fn read10_returns_requested_bytes_and_residual() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]); // drain UA
        let cdb = [0x28, 0, 0, 0, 0, 0, 0, 0, 2, 0];
        let response = dispatch(&drive, &audio, &sink, &cdb, &[]);
        assert_eq!(response.status, Status::Good);
        assert_eq!(response.data.len(), 2 * 2048);
        assert_eq!(response.residual, 0);
    }

    #[test]
    fn read10_matches_disc_image_sector_bytes() {
        let mut blocks = [[0u8; 2048]; 17];
        blocks[16][..8].copy_from_slice(b"\x01CD001\x01\x00");
        let mut drive = Drive::new();
        drive.load_image(Arc::new(MemoryDiscImage::from_mode1_blocks(Medium::CdRom, &blocks)));
        let drive = Arc::new(Mutex::new(drive));
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]);

        let cdb = [0x28, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x01, 0x00];
        let response = dispatch(&drive, &audio, &sink, &cdb, &[]);
        assert_eq!(response.status, Status::Good);
        assert_eq!(response.data.len(), 2048);
        assert_eq!(&response.data[..8], b"\x01CD001\x01\x00");
    }

    #[test]
    fn test_unit_ready_with_no_medium_reports_medium_not_present() {
        let drive = Arc::new(Mutex::new(Drive::new()));
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        let response = dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]);
        assert_eq!(response.status, Status::CheckCondition);
        assert_eq!(
            response.sense.unwrap(),
            [0x70, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x3A, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn inquiry_standard_response_matches_expected_bytes() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]); // drain UA
        let cdb = [0x12, 0x00, 0x00, 0x00, 0x24, 0x00];
        let response = dispatch(&drive, &audio, &sink, &cdb, &[]);
        assert_eq!(response.status, Status::Good);
        assert_eq!(response.data.len(), 36);
        assert_eq!(&response.data[..8], &[0x05, 0x80, 0x02, 0x02, 0x1F, 0x00, 0x00, 0x00]);
        assert_eq!(&response.data[8..16], b"CDEmu   ");
        assert_eq!(&response.data[16..32], b"Virt. CD/DVD-ROM");
        assert_eq!(&response.data[32..36], b"1.10");
    }

    #[test]
    fn read_capacity_reports_last_lba_and_block_size() {
        // 350,000 cheap placeholder sectors: READ CAPACITY only needs the
        // count, so skip the expensive per-sector EDC/ECC encode.
        let placeholder = Sector {
            buf: [0u8; 2352],
            valid: RegionMask::empty(),
            sector_type: SectorType::Mode1,
        };
        let sectors = vec![placeholder; 350_000];
        let image = MemoryDiscImage::new(Medium::CdRom, Lba::ZERO, sectors, vec![Lba::ZERO]);
        let mut drive = Drive::new();
        drive.load_image(Arc::new(image));
        let drive = Arc::new(Mutex::new(drive));
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]); // drain UA

        let cdb = [0x25, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let response = dispatch(&drive, &audio, &sink, &cdb, &[]);
        assert_eq!(response.status, Status::Good);
        assert_eq!(response.data, vec![0x00, 0x05, 0x57, 0x2F, 0x00, 0x00, 0x08, 0x00]);
    }

    #[test]
    fn mode_select_rejects_unwritable_page() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]); // drain UA

        // Page 0x3F isn't in the drive's writable set (only 0x01 and 0x0E are).
        let data_out = [0u8, 0, 0, 0, 0, 0, 0, 0, 0x3F, 0x00];
        let cdb = [0x15, 0x10, 0x00, 0x00, data_out.len() as u8, 0x00];
        let response = dispatch(&drive, &audio, &sink, &cdb, &data_out);
        assert_eq!(response.status, Status::CheckCondition);
        assert_eq!(response.sense.unwrap()[12], 0x26); // INVALID FIELD IN PARAMETER LIST
    }

    #[test]
    fn mode_select_accepts_writable_page() {
        let drive = drive_with_medium();
        let audio = AudioEngine::new();
        let sink: Arc<dyn AudioSink> = Arc::new(NullAudioSink);
        dispatch(&drive, &audio, &sink, &[0x00, 0, 0, 0, 0, 0], &[]); // drain UA

        let data_out = [0u8, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x00];
        let cdb = [0x15, 0x10, 0x00, 0x00, data_out.len() as u8, 0x00];
        let response = dispatch(&drive, &audio, &sink, &cdb, &data_out);
        assert_eq!(response.status, Status::Good);
    }
}

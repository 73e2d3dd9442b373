//! CDB decoding: turning the bytes a host sends into a typed request.
//!
//! Unlike a host-side SCSI library, which only ever builds a CDB to send, a
//! device has to parse one. Each opcode gets a small request struct; opcodes
//! this stack doesn't implement, and CDBs with invalid field values, report
//! through [`CdbError`] so the dispatcher can map them onto the correct
//! sense code.

use derive_more::{From, Into};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::addressing::{Lba, Msf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, From, Into)]
#[repr(transparent)]
pub struct Control(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdbError {
    UnsupportedOperationCode(u8),
    InvalidField,
    LogicalBlockAddressOutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SectorType {
    AllTypes = 0b000,
    CdDa = 0b001,
    Mode1 = 0b010,
    Mode2Formless = 0b011,
    Mode2Form1 = 0b100,
    Mode2Form2 = 0b101,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MainChannelFlags: u8 {
        const SYNC       = 1 << 7;
        const SUBHEADER  = 1 << 6;
        const HEADER     = 1 << 5;
        const USER_DATA  = 1 << 4;
        const EDC_ECC    = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubChannelSelection {
    None,
    QSubChannel,
    RwSubChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestUnitReady {
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSense {
    pub allocation_length: u8,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inquiry {
    pub evpd: bool,
    pub page_code: u8,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSense {
    pub dbd: bool,
    pub page_control: u8,
    pub page_code: u8,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelect {
    pub pf: bool,
    pub sp: bool,
    pub parameter_list_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartStopUnit {
    pub immed: bool,
    pub load_eject: bool,
    pub start: bool,
    pub power_condition: u8,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreventAllowMediumRemoval {
    pub prevent: bool,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCapacity {
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Read10 {
    pub dpo: bool,
    pub fua: bool,
    pub lba: i32,
    pub transfer_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Read12 {
    pub dpo: bool,
    pub fua: bool,
    pub lba: i32,
    pub transfer_length: u32,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCd {
    pub sector_type: SectorType,
    pub dap: bool,
    pub start_lba: i32,
    pub transfer_length: u32,
    pub main_channel: MainChannelFlags,
    pub sub_channel: SubChannelSelection,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSubchannel {
    pub msf: bool,
    pub subq: bool,
    pub parameter_list: u8,
    pub track_number: u8,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadToc {
    pub msf: bool,
    pub format: u8,
    pub track_or_session: u8,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHeader {
    pub msf: bool,
    pub lba: i32,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetConfiguration {
    pub rt: u8,
    pub starting_feature: u16,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetEventStatusNotification {
    pub immed: bool,
    pub notification_class_request: u8,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MechanismStatus {
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayAudio {
    pub start_lba: i32,
    pub play_length: u32,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPlayScan {
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseResume {
    pub resume: bool,
    pub control: Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadDiscStructure {
    pub layer_number: u8,
    pub lba: i32,
    pub format: u8,
    pub allocation_length: u16,
    pub control: Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKey {
    pub lba: i32,
    pub key_class: u8,
    pub allocation_length: u16,
    pub key_format: u8,
    pub control: Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendKey {
    pub key_class: u8,
    pub parameter_list_length: u16,
    pub key_format: u8,
    pub control: Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdbRequest {
    TestUnitReady(TestUnitReady),
    RequestSense(RequestSense),
    Inquiry(Inquiry),
    ModeSense(ModeSense),
    ModeSelect(ModeSelect),
    StartStopUnit(StartStopUnit),
    PreventAllowMediumRemoval(PreventAllowMediumRemoval),
    ReadCapacity(ReadCapacity),
    Read10(Read10),
    Read12(Read12),
    ReadCd(ReadCd),
    ReadSubchannel(ReadSubchannel),
    ReadToc(ReadToc),
    ReadHeader(ReadHeader),
    GetConfiguration(GetConfiguration),
    GetEventStatusNotification(GetEventStatusNotification),
    MechanismStatus(MechanismStatus),
    PlayAudio(PlayAudio),
    StopPlayScan(StopPlayScan),
    PauseResume(PauseResume),
    ReadDiscStructure(ReadDiscStructure),
    ReportKey(ReportKey),
    SendKey(SendKey),
}

fn u16_be(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi, lo])
}

fn lba_be(b: &[u8]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Decode a raw CDB (already sliced to its declared length) into a typed
/// request. Unsupported opcodes and malformed fields are reported as
/// [`CdbError`], which the dispatcher maps onto sense data — never panics.
pub fn decode(cdb: &[u8]) -> Result<CdbRequest, CdbError> {
    let opcode = *cdb.first().ok_or(CdbError::InvalidField)?;

    match opcode {
        0x00 => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::TestUnitReady(TestUnitReady {
                control: Control(cdb[5]),
            }))
        }
        0x03 => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::RequestSense(RequestSense {
                allocation_length: cdb[4],
                control: Control(cdb[5]),
            }))
        }
        0x12 => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::Inquiry(Inquiry {
                evpd: cdb[1] & 0x01 != 0,
                page_code: cdb[2],
                allocation_length: u16_be(cdb[3], cdb[4]),
                control: Control(cdb[5]),
            }))
        }
        0x1A => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::ModeSense(ModeSense {
                dbd: cdb[1] & 0x08 != 0,
                page_control: (cdb[2] & 0xC0) >> 6,
                page_code: cdb[2] & 0x3F,
                allocation_length: u16::from(cdb[4]),
                control: Control(cdb[5]),
            }))
        }
        0x5A => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::ModeSense(ModeSense {
                dbd: cdb[1] & 0x08 != 0,
                page_control: (cdb[2] & 0xC0) >> 6,
                page_code: cdb[2] & 0x3F,
                allocation_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0x15 => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::ModeSelect(ModeSelect {
                pf: cdb[1] & 0x10 != 0,
                sp: cdb[1] & 0x01 != 0,
                parameter_list_length: u16::from(cdb[4]),
                control: Control(cdb[5]),
            }))
        }
        0x55 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::ModeSelect(ModeSelect {
                pf: cdb[1] & 0x10 != 0,
                sp: cdb[1] & 0x01 != 0,
                parameter_list_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0x1B => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::StartStopUnit(StartStopUnit {
                immed: cdb[1] & 0x01 != 0,
                load_eject: cdb[4] & 0x02 != 0,
                start: cdb[4] & 0x01 != 0,
                power_condition: (cdb[4] & 0xF0) >> 4,
                control: Control(cdb[5]),
            }))
        }
        0x1E => {
            require_len(cdb, 6)?;
            Ok(CdbRequest::PreventAllowMediumRemoval(PreventAllowMediumRemoval {
                prevent: cdb[4] & 0x01 != 0,
                control: Control(cdb[5]),
            }))
        }
        0x25 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::ReadCapacity(ReadCapacity {
                control: Control(cdb[9]),
            }))
        }
        0x28 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::Read10(Read10 {
                dpo: cdb[1] & 0x10 != 0,
                fua: cdb[1] & 0x08 != 0,
                lba: lba_be(&cdb[2..6]),
                transfer_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0xA8 => {
            require_len(cdb, 12)?;
            Ok(CdbRequest::Read12(Read12 {
                dpo: cdb[1] & 0x10 != 0,
                fua: cdb[1] & 0x08 != 0,
                lba: lba_be(&cdb[2..6]),
                transfer_length: u32::from_be_bytes([cdb[6], cdb[7], cdb[8], cdb[9]]),
                control: Control(cdb[11]),
            }))
        }
        0xBE => {
            require_len(cdb, 12)?;
            let sector_type = SectorType::try_from((cdb[1] >> 2) & 0b111).map_err(|_| CdbError::InvalidField)?;
            let sub_channel = match cdb[10] & 0b111 {
                0b000 => SubChannelSelection::None,
                0b010 => SubChannelSelection::QSubChannel,
                0b100 => SubChannelSelection::RwSubChannel,
                _ => return Err(CdbError::InvalidField),
            };
            Ok(CdbRequest::ReadCd(ReadCd {
                sector_type,
                dap: cdb[1] & 0x02 != 0,
                start_lba: lba_be(&cdb[2..6]),
                transfer_length: u32::from(cdb[6]) << 16 | u32::from(cdb[7]) << 8 | u32::from(cdb[8]),
                main_channel: MainChannelFlags::from_bits_truncate(cdb[9]),
                sub_channel,
                control: Control(cdb[11]),
            }))
        }
        0x42 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::ReadSubchannel(ReadSubchannel {
                msf: cdb[1] & 0x02 != 0,
                subq: cdb[2] & 0x40 != 0,
                parameter_list: cdb[3],
                track_number: cdb[6],
                allocation_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0x43 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::ReadToc(ReadToc {
                msf: cdb[1] & 0x02 != 0,
                format: cdb[2] & 0x0F,
                track_or_session: cdb[6],
                allocation_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0x44 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::ReadHeader(ReadHeader {
                msf: cdb[1] & 0x02 != 0,
                lba: lba_be(&cdb[2..6]),
                allocation_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0x46 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::GetConfiguration(GetConfiguration {
                rt: cdb[1] & 0x03,
                starting_feature: u16_be(cdb[2], cdb[3]),
                allocation_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0x4A => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::GetEventStatusNotification(GetEventStatusNotification {
                immed: cdb[1] & 0x01 != 0,
                notification_class_request: cdb[4],
                allocation_length: u16_be(cdb[7], cdb[8]),
                control: Control(cdb[9]),
            }))
        }
        0xBD => {
            require_len(cdb, 12)?;
            Ok(CdbRequest::MechanismStatus(MechanismStatus {
                allocation_length: u16_be(cdb[8], cdb[9]),
                control: Control(cdb[11]),
            }))
        }
        0x45 => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::PlayAudio(PlayAudio {
                start_lba: lba_be(&cdb[2..6]),
                play_length: u32::from(u16_be(cdb[7], cdb[8])),
                control: Control(cdb[9]),
            }))
        }
        0xA5 => {
            require_len(cdb, 12)?;
            Ok(CdbRequest::PlayAudio(PlayAudio {
                start_lba: lba_be(&cdb[2..6]),
                play_length: u32::from_be_bytes([cdb[6], cdb[7], cdb[8], cdb[9]]),
                control: Control(cdb[11]),
            }))
        }
        0x4E => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::StopPlayScan(StopPlayScan {
                control: Control(cdb[9]),
            }))
        }
        0x4B => {
            require_len(cdb, 10)?;
            Ok(CdbRequest::PauseResume(PauseResume {
                resume: cdb[8] & 0x01 != 0,
                control: Control(cdb[9]),
            }))
        }
        0xAD => {
            require_len(cdb, 12)?;
            Ok(CdbRequest::ReadDiscStructure(ReadDiscStructure {
                layer_number: cdb[6],
                lba: lba_be(&cdb[2..6]),
                format: cdb[7],
                allocation_length: u16_be(cdb[8], cdb[9]),
                control: Control(cdb[11]),
            }))
        }
        0xA4 => {
            require_len(cdb, 12)?;
            Ok(CdbRequest::ReportKey(ReportKey {
                lba: lba_be(&cdb[2..6]),
                key_class: cdb[7],
                allocation_length: u16_be(cdb[8], cdb[9]),
                key_format: cdb[10] & 0x3F,
                control: Control(cdb[11]),
            }))
        }
        0xA3 => {
            require_len(cdb, 12)?;
            Ok(CdbRequest::SendKey(SendKey {
                key_class: cdb[7],
                parameter_list_length: u16_be(cdb[8], cdb[9]),
                key_format: cdb[10] & 0x3F,
                control: Control(cdb[11]),
            }))
        }
        other => Err(CdbError::UnsupportedOperationCode(other)),
    }
}

fn require_len(cdb: &[u8], len: usize) -> Result<(), CdbError> {
    if cdb.len() < len {
        Err(CdbError::InvalidField)
    } else {
        Ok(())
    }
}

/// Turn a decoded MSF-mode byte triple (as used by READ HEADER/TOC/SUBCHANNEL
/// when MSF=1) back into an [`Msf`], for handlers that need it.
pub fn msf_from_cdb_bytes(minute: u8, second: u8, frame: u8) -> Msf {
    Msf::new(minute, second, frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_test_unit_ready() {
        let cdb = [0x00, 0, 0, 0, 0, 0];
        assert_eq!(
            decode(&cdb).unwrap(),
            CdbRequest::TestUnitReady(TestUnitReady { control: Control(0) })
        );
    }

    #[test]
    fn decodes_read10_lba_and_length() {
        let cdb = [0x28, 0, 0x00, 0x00, 0x00, 0x10, 0, 0x00, 0x04, 0];
        match decode(&cdb).unwrap() {
            CdbRequest::Read10(r) => {
                assert_eq!(r.lba, Lba::try_from(16).unwrap().value());
                assert_eq!(r.transfer_length, 4);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unsupported_opcode_reports_error() {
        assert_eq!(decode(&[0xFF, 0, 0, 0, 0, 0]), Err(CdbError::UnsupportedOperationCode(0xFF)));
    }

    #[test]
    fn short_cdb_reports_invalid_field() {
        assert_eq!(decode(&[0x12]), Err(CdbError::InvalidField));
    }
}

//! MMC feature descriptors, as reported by GET CONFIGURATION (0x46).
//!
//! Unlike a real host-side SCSI layer, which only ever needs to *parse*
//! descriptors coming off the wire, we are the device: every feature here is
//! built from drive state and serialized for the host. The wire layout
//! (2-byte code, cur/per/version byte, length byte, payload) matches
//! MMC-3/MMC-6 exactly.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::disc::Medium;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum FeatureCode {
    ProfileList = 0x0000,
    Core = 0x0001,
    Morphing = 0x0002,
    RemovableMedium = 0x0003,
    RandomReadable = 0x0010,
    MultiRead = 0x001D,
    CdRead = 0x001E,
    DvdRead = 0x001F,
    PowerManagement = 0x0100,
    Timeout = 0x0105,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum Profile {
    None = 0x0000,
    CdRom = 0x0008,
    CdR = 0x0009,
    DvdRom = 0x0010,
    DvdPlusR = 0x001B,
    NonConforming = 0xFFFF,
}

impl Profile {
    pub fn for_medium(medium: Medium) -> Self {
        match medium {
            Medium::None => Profile::NonConforming,
            Medium::CdRom => Profile::CdRom,
            Medium::CdR => Profile::CdR,
            Medium::DvdRom => Profile::DvdRom,
            Medium::DvdPlusR => Profile::DvdPlusR,
        }
    }
}

/// A single feature descriptor: the generic header fields plus its payload.
///
/// `payload` excludes the 4-byte header (code + cur/per/version + length);
/// `length` is derived from it, matching how the drive always reports the
/// length of what it actually sends.
#[derive(Debug, Clone)]
pub struct FeatureEntry {
    pub code: FeatureCode,
    pub version: u8,
    pub current: bool,
    pub persistent: bool,
    pub payload: Vec<u8>,
}

impl FeatureEntry {
    pub fn encode(&self) -> Vec<u8> {
        let code: u16 = self.code.into();
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.extend_from_slice(&code.to_be_bytes());
        let flags = ((self.version & 0x0F) << 2)
            | (u8::from(self.persistent) << 1)
            | u8::from(self.current);
        out.push(flags);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        out
    }
}

fn profile_list_entry(active: Profile, supported: &[Profile]) -> FeatureEntry {
    let mut payload = Vec::with_capacity(supported.len() * 4);
    for &profile in supported {
        let code: u16 = profile.into();
        payload.extend_from_slice(&code.to_be_bytes());
        payload.push(u8::from(profile == active) & 0x01);
        payload.push(0);
    }
    FeatureEntry {
        code: FeatureCode::ProfileList,
        version: 0,
        current: true,
        persistent: true,
        payload,
    }
}

fn core_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::Core,
        version: 2,
        current: true,
        persistent: true,
        // physical interface standard: SCSI (0x00000001), inq2=0, dbe=1
        payload: vec![0x00, 0x00, 0x00, 0x01, 0b0000_0001, 0, 0, 0],
    }
}

fn morphing_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::Morphing,
        version: 1,
        current: true,
        persistent: true,
        // async=0, ocevent=1
        payload: vec![0b0000_0001, 0, 0, 0],
    }
}

fn removable_medium_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::RemovableMedium,
        version: 2,
        current: true,
        persistent: true,
        // mechanism type=0 (caddy), eject=1, lock=1
        payload: vec![0b0000_1001, 0, 0, 0],
    }
}

fn random_readable_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::RandomReadable,
        version: 0,
        current: true,
        persistent: false,
        payload: vec![0, 0, 0x08, 0x00, 0x00, 0, 0x01, 0],
    }
}

fn cd_read_entry(current: bool) -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::CdRead,
        version: 2,
        current,
        persistent: true,
        payload: vec![0, 0, 0, 0],
    }
}

fn dvd_read_entry(current: bool) -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::DvdRead,
        version: 0,
        current,
        persistent: true,
        payload: vec![0, 0, 0, 0],
    }
}

fn multi_read_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::MultiRead,
        version: 0,
        current: true,
        persistent: true,
        payload: vec![],
    }
}

fn power_management_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::PowerManagement,
        version: 0,
        current: true,
        persistent: true,
        payload: vec![],
    }
}

fn timeout_entry() -> FeatureEntry {
    FeatureEntry {
        code: FeatureCode::Timeout,
        version: 0,
        current: true,
        persistent: true,
        payload: vec![0, 0, 0, 0],
    }
}

/// Build the full feature list for a drive currently presenting `medium`.
/// Order matches how cdemu's own GET CONFIGURATION handler lists features:
/// ProfileList first, then Core, then everything else.
pub fn feature_list(medium: Medium) -> Vec<FeatureEntry> {
    let active = Profile::for_medium(medium);
    let supported = [Profile::CdRom, Profile::CdR, Profile::DvdRom, Profile::DvdPlusR];
    let has_medium = medium != Medium::None;

    vec![
        profile_list_entry(active, &supported),
        core_entry(),
        morphing_entry(),
        removable_medium_entry(),
        random_readable_entry(),
        multi_read_entry(),
        cd_read_entry(has_medium),
        dvd_read_entry(has_medium),
        power_management_entry(),
        timeout_entry(),
    ]
}

/// Serialize a GET CONFIGURATION response: 8-byte header (data length,
/// current profile, reserved) followed by each requested feature descriptor.
pub fn encode_configuration(medium: Medium, starting_feature: u16) -> Vec<u8> {
    let current_profile: u16 = Profile::for_medium(medium).into();
    let mut body = Vec::new();
    for entry in feature_list(medium) {
        let code: u16 = entry.code.into();
        if code >= starting_feature {
            body.extend_from_slice(&entry.encode());
        }
    }

    let mut out = Vec::with_capacity(8 + body.len());
    let data_len = (body.len() + 4) as u32;
    out.extend_from_slice(&data_len.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&current_profile.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_list_marks_active_profile() {
        let entry = profile_list_entry(Profile::CdRom, &[Profile::CdRom, Profile::DvdRom]);
        let encoded = entry.encode();
        // first profile descriptor: code 0x0008, current flag set
        assert_eq!(&encoded[4..6], &[0x00, 0x08]);
        assert_eq!(encoded[6] & 0x01, 1);
        // second profile descriptor: code 0x0010, current flag clear
        assert_eq!(&encoded[8..10], &[0x00, 0x10]);
        assert_eq!(encoded[10] & 0x01, 0);
    }

    #[test]
    fn configuration_response_reports_current_profile() {
        let bytes = encode_configuration(Medium::CdR, 0);
        assert_eq!(&bytes[6..8], &[0x00, 0x09]);
    }

    #[test]
    fn starting_feature_filters_lower_codes() {
        let bytes = encode_configuration(Medium::CdRom, 0x0010);
        // should not contain ProfileList (0x0000) or Core (0x0001) descriptors anymore
        assert!(!bytes[8..].windows(2).any(|w| w == [0x00, 0x00]));
    }
}

//! `/dev/vhba_ctl` wire format: the request/response headers a real VHBA
//! character device would move across the kernel/userspace boundary.
//!
//! Everything here is little-endian, matching the real driver's choice to
//! use the host's native layout rather than a fixed network byte order
//! (this bridge never crosses a machine boundary).

pub const REQUEST_HEADER_LEN: usize = 32;
pub const RESPONSE_HEADER_LEN: usize = 12;

pub const STATUS_GOOD: u32 = 0;
pub const STATUS_CHECK_CONDITION: u32 = 2;

pub const IOCTL_IDENT: u32 = 0xBEEF001;
pub const IOCTL_DEVNUM: u32 = 0xBEEF002;

#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub metatag: u32,
    pub lun: u32,
    pub cdb: [u8; 16],
    pub cdb_len: u8,
    pub data_len: u32,
}

impl RequestHeader {
    /// Serializes the header and, for a to-device transfer, the outbound
    /// payload immediately after it.
    pub fn encode(&self, outbound: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(REQUEST_HEADER_LEN + outbound.len());
        out.extend_from_slice(&self.metatag.to_le_bytes());
        out.extend_from_slice(&self.lun.to_le_bytes());
        out.extend_from_slice(&self.cdb);
        out.push(self.cdb_len);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&self.data_len.to_le_bytes());
        out.extend_from_slice(outbound);
        out
    }

    pub fn decode(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < REQUEST_HEADER_LEN {
            return None;
        }
        let metatag = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let lun = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let mut cdb = [0u8; 16];
        cdb.copy_from_slice(&buf[8..24]);
        let cdb_len = buf[24];
        let data_len = u32::from_le_bytes(buf[28..32].try_into().ok()?);
        let payload = &buf[REQUEST_HEADER_LEN..];
        if payload.len() < data_len as usize {
            return None;
        }
        Some((
            RequestHeader {
                metatag,
                lun,
                cdb,
                cdb_len,
                data_len,
            },
            &payload[..data_len as usize],
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHeader {
    pub metatag: u32,
    pub status: u32,
    pub data_len: u32,
}

impl ResponseHeader {
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + payload.len());
        out.extend_from_slice(&self.metatag.to_le_bytes());
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.data_len.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < RESPONSE_HEADER_LEN {
            return None;
        }
        let metatag = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let status = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let data_len = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let payload = &buf[RESPONSE_HEADER_LEN..];
        if payload.len() < data_len as usize {
            return None;
        }
        Some((
            ResponseHeader {
                metatag,
                status,
                data_len,
            },
            &payload[..data_len as usize],
        ))
    }
}

/// `ioctl(IDENT)` result: the SCSI identity the mid-layer assigned this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub host_no: u32,
    pub channel: u32,
    pub id: u32,
    pub lun: u32,
}

/// Maximum target ID per bus; used by the `devnum` <-> (bus, id) mapping.
pub const MAX_ID: u32 = 16;

pub fn devnum_for(bus: u32, id: u32) -> u32 {
    bus * (MAX_ID - 1) + id
}

pub fn bus_id_for(devnum: u32) -> (u32, u32) {
    (devnum / (MAX_ID - 1), devnum % (MAX_ID - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_with_payload() {
        let header = RequestHeader {
            metatag: 42,
            lun: 0,
            cdb: [0x28, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            cdb_len: 10,
            data_len: 3,
        };
        let encoded = header.encode(&[1, 2, 3]);
        let (decoded, payload) = RequestHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.metatag, 42);
        assert_eq!(decoded.cdb_len, 10);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn response_round_trips_with_sense() {
        let header = ResponseHeader {
            metatag: 7,
            status: STATUS_CHECK_CONDITION,
            data_len: 18,
        };
        let sense = [0u8; 18];
        let encoded = header.encode(&sense);
        let (decoded, payload) = ResponseHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.status, STATUS_CHECK_CONDITION);
        assert_eq!(payload.len(), 18);
    }

    #[test]
    fn devnum_mapping_round_trips() {
        let devnum = devnum_for(2, 5);
        assert_eq!(bus_id_for(devnum), (2, 5));
    }
}

//! Userspace client for a VHBA slot: the `read()` / dispatch / `write()`
//! loop a real driver's userspace counterpart runs against `/dev/vhba_ctl`.

use std::sync::Arc;

use crate::host::{Host, ReadError, WriteError};
use crate::wire::{self, RequestHeader};

#[derive(Debug, Clone)]
pub struct Request {
    pub metatag: u32,
    pub lun: u32,
    pub cdb: Vec<u8>,
    /// To-device parameter data accompanying the CDB (e.g. a MODE SELECT
    /// parameter list or a SEND KEY payload); empty for commands with no
    /// outbound data.
    pub data_out: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u32,
    pub payload: Vec<u8>,
}

pub struct VhbaClient {
    host: Arc<Host>,
    devnum: u32,
}

impl VhbaClient {
    /// Opens a slot for `(bus, id)`, as if opening `/dev/vhba_ctl` and
    /// being assigned that slot by the driver.
    pub fn open(host: Arc<Host>, bus: u32, id: u32) -> Self {
        let devnum = host.register_slot(bus, id);
        Self { host, devnum }
    }

    pub fn devnum(&self) -> u32 {
        self.devnum
    }

    pub fn identity(&self) -> Option<wire::Identity> {
        self.host.ioctl_ident(self.devnum)
    }

    /// Step 1 of the client loop: reads one request (blocking).
    pub fn read_request(&self) -> Result<Request, ReadError> {
        let bytes = self.host.read(self.devnum, true)?;
        let (header, outbound) = RequestHeader::decode(&bytes).expect("host always emits a well-formed header");
        Ok(Request {
            metatag: header.metatag,
            lun: header.lun,
            cdb: header.cdb[..header.cdb_len as usize].to_vec(),
            data_out: outbound.to_vec(),
        })
    }

    /// Step 3 of the client loop: writes one response back.
    pub fn write_response(&self, metatag: u32, response: Response) -> Result<(), WriteError> {
        let header = wire::ResponseHeader {
            metatag,
            status: response.status,
            data_len: response.payload.len() as u32,
        };
        self.host.write(self.devnum, &header.encode(&response.payload))
    }

    /// Runs the client loop until `dispatch` signals shutdown by returning
    /// `None`, or a read error other than `WouldBlock` occurs.
    pub fn run(&self, mut dispatch: impl FnMut(Request) -> Option<Response>) {
        loop {
            let request = match self.read_request() {
                Ok(request) => request,
                Err(ReadError::NoSuchSlot) => return,
                Err(ReadError::WouldBlock) => continue,
            };
            let metatag = request.metatag;
            match dispatch(request) {
                Some(response) => {
                    if self.write_response(metatag, response).is_err() {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    pub fn close(&self) {
        self.host.close_slot(self.devnum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Direction;

    #[test]
    fn client_round_trips_a_command_through_dispatch() {
        let host = Arc::new(Host::new());
        let client = VhbaClient::open(host.clone(), 0, 1);

        let handle = host
            .queuecommand(client.devnum(), 0, [0x00; 16], 6, Direction::None, Vec::new())
            .unwrap();

        let request = client.read_request().unwrap();
        assert_eq!(request.metatag, handle.metatag);
        client
            .write_response(
                request.metatag,
                Response {
                    status: wire::STATUS_GOOD,
                    payload: Vec::new(),
                },
            )
            .unwrap();

        assert_eq!(handle.wait().status, wire::STATUS_GOOD);
    }

    #[test]
    fn read_request_carries_the_real_cdb_and_outbound_payload_separately() {
        let host = Arc::new(Host::new());
        let client = VhbaClient::open(host.clone(), 0, 2);

        let mut cdb = [0u8; 16];
        cdb[0] = 0x55; // MODE SELECT(10)
        cdb[8] = 12;
        host.queuecommand(client.devnum(), 0, cdb, 10, Direction::ToDevice, vec![0xAA; 12])
            .unwrap();

        let request = client.read_request().unwrap();
        assert_eq!(request.cdb, &cdb[..10]);
        assert_eq!(request.data_out, vec![0xAA; 12]);
    }
}

//! In-process simulation of the VHBA kernel driver's bridge: the SCSI
//! mid-layer side (`queuecommand`/`abort`) and the character-device side
//! (`read`/`write`/`poll`/`ioctl`), with the exact command-record state
//! machine the real driver uses.
//!
//! There is no actual kernel module here — a safe-Rust userspace crate
//! cannot be one — so `Host` plays both roles of the real `/dev/vhba_ctl`
//! boundary in one process, joined by a condvar instead of a character
//! device's file descriptor. The state machine, locking discipline, and
//! failure semantics are the same as the real driver's; only the transport
//! is simulated.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::wire::{Identity, MAX_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    ToDevice,
    FromDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Reading,
    Sent,
    Writing,
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: u32,
    pub sense: Vec<u8>,
    pub inbound_data: Vec<u8>,
    pub residual: u32,
}

struct CommandRecord {
    metatag: u32,
    lun: u32,
    cdb: [u8; 16],
    cdb_len: u8,
    direction: Direction,
    outbound_data: Vec<u8>,
    state: CommandState,
    completion: Arc<Completion>,
}

struct Completion {
    result: Mutex<Option<CommandResult>>,
    ready: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: CommandResult) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    /// Blocks until `queuecommand`'s caller has a result. Mirrors the real
    /// mid-layer's completion callback, collapsed to a blocking wait since
    /// this simulation has no interrupt context to call back from.
    pub fn wait(&self) -> CommandResult {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            self.ready.wait(&mut guard);
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("no slot registered for this devnum")]
    DidNoConnect,
    #[error("command pool exhausted")]
    HostBusy,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("no command pending and non-blocking read requested")]
    WouldBlock,
    #[error("no such slot")]
    NoSuchSlot,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    #[error("no such slot")]
    NoSuchSlot,
    #[error("metatag does not match a command in the Sent state")]
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortResult {
    Success,
    Failed,
}

struct Slot {
    bus: u32,
    id: u32,
    queue: VecDeque<CommandRecord>,
}

/// Host-wide command-pool capacity used by `Host::new()`. Matches the real
/// driver's `can_queue` default; a deployment that wants a deeper queue goes
/// through `Host::with_capacity`.
pub const DEFAULT_COMMAND_POOL_CAPACITY: usize = 32;

pub struct Host {
    slots: Mutex<HashMap<u32, Slot>>,
    slot_ready: Condvar,
    outstanding: AtomicU32,
    next_metatag: AtomicU32,
    capacity: usize,
    hotplug: Mutex<crate::hotplug::HotplugTracker>,
}

impl Host {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_COMMAND_POOL_CAPACITY)
    }

    /// Builds a host whose command pool holds at most `capacity` in-flight
    /// commands across all slots, mirroring the real driver's `can_queue`
    /// module parameter.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            slot_ready: Condvar::new(),
            outstanding: AtomicU32::new(0),
            next_metatag: AtomicU32::new(1),
            capacity,
            hotplug: Mutex::new(crate::hotplug::HotplugTracker::new()),
        }
    }

    pub fn register_slot(&self, bus: u32, id: u32) -> u32 {
        let devnum = crate::wire::devnum_for(bus, id);
        self.slots.lock().insert(
            devnum,
            Slot {
                bus,
                id,
                queue: VecDeque::new(),
            },
        );
        self.hotplug.lock().record(devnum, crate::hotplug::HotplugEvent::Added);
        devnum
    }

    /// Returns and clears every net hotplug event (slot added/removed) since
    /// the last drain, for a caller to turn into whatever action the real
    /// driver would take with `scsi_add_device`/`scsi_remove_device`.
    pub fn drain_hotplug_events(&self) -> Vec<(u32, crate::hotplug::HotplugEvent)> {
        self.hotplug.lock().drain()
    }

    /// Closes a slot, completing every outstanding command with
    /// `DID_NO_CONNECT` (modeled here as a `CommandResult` with
    /// `status = DID_NO_CONNECT_STATUS`) rather than dropping them silently.
    pub fn close_slot(&self, devnum: u32) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.remove(&devnum) {
            for command in slot.queue {
                command.completion.complete(CommandResult {
                    status: DID_NO_CONNECT_STATUS,
                    sense: Vec::new(),
                    inbound_data: Vec::new(),
                    residual: 0,
                });
            }
        }
        drop(slots);
        self.hotplug.lock().record(devnum, crate::hotplug::HotplugEvent::Removed);
        // Wake any client blocked in a blocking `read()` on this (or any
        // other) slot so it notices the slot is gone and unwinds instead of
        // waiting on a condvar nothing will ever signal again.
        self.slot_ready.notify_all();
    }

    /// SCSI mid-layer entry point. Returns a handle the caller blocks on for
    /// the eventual result.
    pub fn queuecommand(
        &self,
        devnum: u32,
        lun: u32,
        cdb: [u8; 16],
        cdb_len: u8,
        direction: Direction,
        outbound_data: Vec<u8>,
    ) -> Result<Arc<CommandHandle>, QueueError> {
        if self.outstanding.load(Ordering::SeqCst) as usize >= self.capacity {
            return Err(QueueError::HostBusy);
        }

        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&devnum).ok_or(QueueError::DidNoConnect)?;

        let metatag = self.next_metatag.fetch_add(1, Ordering::SeqCst);
        let completion = Arc::new(Completion::new());
        slot.queue.push_back(CommandRecord {
            metatag,
            lun,
            cdb,
            cdb_len,
            direction,
            outbound_data,
            state: CommandState::Pending,
            completion: completion.clone(),
        });
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        drop(slots);
        self.slot_ready.notify_all();

        Ok(Arc::new(CommandHandle { metatag, completion }))
    }

    /// `abort(cmd)`: cancels a Pending command outright; waits out a
    /// Reading/Writing transient; fails if the command already reached
    /// userspace (Sent) and hasn't been answered yet.
    pub fn abort(&self, devnum: u32, metatag: u32) -> AbortResult {
        loop {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&devnum) else {
                return AbortResult::Success;
            };
            let Some(position) = slot.queue.iter().position(|c| c.metatag == metatag) else {
                return AbortResult::Success;
            };

            match slot.queue[position].state {
                CommandState::Reading | CommandState::Writing => {
                    drop(slots);
                    std::thread::sleep(Duration::from_micros(100));
                    continue;
                }
                CommandState::Sent => return AbortResult::Failed,
                CommandState::Pending => {
                    slot.queue.remove(position);
                    self.outstanding.fetch_sub(1, Ordering::SeqCst);
                    return AbortResult::Success;
                }
            }
        }
    }

    /// Character-device `read()`: serializes the oldest Pending command.
    pub fn read(&self, devnum: u32, blocking: bool) -> Result<Vec<u8>, ReadError> {
        let mut slots = self.slots.lock();
        loop {
            {
                let slot = slots.get_mut(&devnum).ok_or(ReadError::NoSuchSlot)?;
                if let Some(position) = slot.queue.iter().position(|c| c.state == CommandState::Pending) {
                    let command = &mut slot.queue[position];
                    command.state = CommandState::Reading;
                    let header = crate::wire::RequestHeader {
                        metatag: command.metatag,
                        lun: command.lun,
                        cdb: command.cdb,
                        cdb_len: command.cdb_len,
                        data_len: command.outbound_data.len() as u32,
                    };
                    let bytes = header.encode(&command.outbound_data);
                    command.state = CommandState::Sent;
                    return Ok(bytes);
                }
            }

            if !blocking {
                return Err(ReadError::WouldBlock);
            }
            self.slot_ready.wait(&mut slots);
        }
    }

    /// Character-device `write()`: matches a response to its Sent command by
    /// metatag and completes it.
    pub fn write(&self, devnum: u32, buf: &[u8]) -> Result<(), WriteError> {
        let Some((header, payload)) = crate::wire::ResponseHeader::decode(buf) else {
            return Err(WriteError::Io);
        };

        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&devnum).ok_or(WriteError::NoSuchSlot)?;
        let position = slot
            .queue
            .iter()
            .position(|c| c.metatag == header.metatag && c.state == CommandState::Sent)
            .ok_or(WriteError::Io)?;

        slot.queue[position].state = CommandState::Writing;
        let command = slot.queue.remove(position).unwrap();
        drop(slots);

        let result = if header.status != crate::wire::STATUS_GOOD {
            CommandResult {
                status: header.status,
                sense: payload.to_vec(),
                inbound_data: Vec::new(),
                residual: 0,
            }
        } else {
            CommandResult {
                status: header.status,
                sense: Vec::new(),
                inbound_data: payload.to_vec(),
                residual: 0,
            }
        };
        command.completion.complete(result);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn poll(&self, devnum: u32) -> bool {
        self.slots
            .lock()
            .get(&devnum)
            .is_some_and(|slot| slot.queue.iter().any(|c| c.state == CommandState::Pending))
    }

    pub fn ioctl_ident(&self, devnum: u32) -> Option<Identity> {
        let slots = self.slots.lock();
        let slot = slots.get(&devnum)?;
        Some(Identity {
            host_no: 0,
            channel: slot.bus,
            id: slot.id,
            lun: 0,
        })
    }

    pub fn ioctl_devnum(&self, devnum: u32) -> u32 {
        devnum
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver-internal stand-in for `DID_NO_CONNECT` (outside the 0/2 GOOD/CHECK
/// CONDITION range the wire protocol uses, so it can never be confused with
/// a real device response).
pub const DID_NO_CONNECT_STATUS: u32 = u32::MAX;

/// Handle a `queuecommand` caller uses to wait for the eventual result.
pub struct CommandHandle {
    pub metatag: u32,
    completion: Arc<Completion>,
}

impl CommandHandle {
    pub fn wait(&self) -> CommandResult {
        self.completion.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queuecommand_without_slot_fails() {
        let host = Host::new();
        let result = host.queuecommand(99, 0, [0; 16], 6, Direction::None, Vec::new());
        assert_eq!(result.unwrap_err(), QueueError::DidNoConnect);
    }

    #[test]
    fn read_then_write_completes_the_command() {
        let host = Host::new();
        let devnum = host.register_slot(0, 1);
        let handle = host
            .queuecommand(devnum, 0, [0x00; 16], 6, Direction::None, Vec::new())
            .unwrap();

        let request_bytes = host.read(devnum, false).unwrap();
        let (request, _) = crate::wire::RequestHeader::decode(&request_bytes).unwrap();
        assert_eq!(request.metatag, handle.metatag);

        let response = crate::wire::ResponseHeader {
            metatag: request.metatag,
            status: crate::wire::STATUS_GOOD,
            data_len: 0,
        }
        .encode(&[]);
        host.write(devnum, &response).unwrap();

        let result = handle.wait();
        assert_eq!(result.status, crate::wire::STATUS_GOOD);
    }

    #[test]
    fn read_without_pending_command_would_block() {
        let host = Host::new();
        let devnum = host.register_slot(0, 2);
        assert_eq!(host.read(devnum, false).unwrap_err(), ReadError::WouldBlock);
    }

    #[test]
    fn closing_slot_completes_outstanding_commands_with_did_no_connect() {
        let host = Host::new();
        let devnum = host.register_slot(0, 3);
        let handle = host
            .queuecommand(devnum, 0, [0; 16], 6, Direction::None, Vec::new())
            .unwrap();
        host.close_slot(devnum);
        assert_eq!(handle.wait().status, DID_NO_CONNECT_STATUS);
    }

    #[test]
    fn abort_on_pending_command_succeeds_and_frees_it() {
        let host = Host::new();
        let devnum = host.register_slot(0, 4);
        let handle = host
            .queuecommand(devnum, 0, [0; 16], 6, Direction::None, Vec::new())
            .unwrap();
        assert_eq!(host.abort(devnum, handle.metatag), AbortResult::Success);
        assert!(!host.poll(devnum));
    }

    #[test]
    fn abort_on_sent_command_fails() {
        let host = Host::new();
        let devnum = host.register_slot(0, 5);
        let handle = host
            .queuecommand(devnum, 0, [0; 16], 6, Direction::None, Vec::new())
            .unwrap();
        host.read(devnum, false).unwrap(); // moves Pending -> Sent
        assert_eq!(host.abort(devnum, handle.metatag), AbortResult::Failed);
    }

    #[test]
    fn fifo_delivery_matches_enqueue_order() {
        let host = Host::new();
        let devnum = host.register_slot(0, 6);
        let mut metatags = Vec::new();
        for i in 0..5 {
            let cdb = {
                let mut buf = [0u8; 16];
                buf[0] = i;
                buf
            };
            let handle = host.queuecommand(devnum, 0, cdb, 6, Direction::None, Vec::new()).unwrap();
            metatags.push(handle.metatag);
        }

        let mut delivered = Vec::new();
        for _ in 0..5 {
            let bytes = host.read(devnum, false).unwrap();
            let (request, _) = crate::wire::RequestHeader::decode(&bytes).unwrap();
            delivered.push(request.metatag);
        }

        assert_eq!(delivered, metatags);
    }

    #[test]
    fn metatags_are_unique_while_in_flight() {
        let host = Host::new();
        let devnum = host.register_slot(0, 7);
        let handles: Vec<_> = (0..10)
            .map(|_| host.queuecommand(devnum, 0, [0; 16], 6, Direction::None, Vec::new()).unwrap())
            .collect();
        let mut metatags: Vec<_> = handles.iter().map(|h| h.metatag).collect();
        metatags.sort_unstable();
        metatags.dedup();
        assert_eq!(metatags.len(), handles.len());
    }

    #[test]
    fn closing_slot_wakes_a_blocking_reader() {
        let host = Arc::new(Host::new());
        let devnum = host.register_slot(0, 9);

        let reader_host = host.clone();
        let reader = std::thread::spawn(move || reader_host.read(devnum, true));

        // Give the reader a chance to actually block on the condvar before
        // closing the slot out from under it.
        std::thread::sleep(Duration::from_millis(20));
        host.close_slot(devnum);

        assert_eq!(reader.join().unwrap().unwrap_err(), ReadError::NoSuchSlot);
    }

    #[test]
    fn pool_exhaustion_reports_host_busy() {
        let host = Host::with_capacity(4);
        let devnum = host.register_slot(0, 8);
        for _ in 0..4 {
            host.queuecommand(devnum, 0, [0; 16], 6, Direction::None, Vec::new()).unwrap();
        }
        let result = host.queuecommand(devnum, 0, [0; 16], 6, Direction::None, Vec::new());
        assert_eq!(result.unwrap_err(), QueueError::HostBusy);
    }

    #[test]
    fn registering_then_closing_a_slot_nets_to_no_event() {
        let host = Host::new();
        let devnum = host.register_slot(0, 10);
        host.close_slot(devnum);
        assert!(host.drain_hotplug_events().is_empty());
    }

    #[test]
    fn registered_slot_reports_an_added_event_once_drained() {
        let host = Host::new();
        let devnum = host.register_slot(0, 11);
        assert_eq!(
            host.drain_hotplug_events(),
            vec![(devnum, crate::hotplug::HotplugEvent::Added)]
        );
        // Draining clears it; a second drain sees nothing new.
        assert!(host.drain_hotplug_events().is_empty());
    }

    #[test]
    fn closing_an_already_drained_slot_reports_a_removed_event() {
        let host = Host::new();
        let devnum = host.register_slot(0, 12);
        host.drain_hotplug_events();
        host.close_slot(devnum);
        assert_eq!(
            host.drain_hotplug_events(),
            vec![(devnum, crate::hotplug::HotplugEvent::Removed)]
        );
    }
}

//! The Configuration Memory subprotocol, layered on datagrams (§4.8, §8 S4/S6).
//!
//! Handler dispatch is two-stage, exactly as described: `body[1]` (the
//! subcommand byte) selects an operation family and, for the shorthand
//! variants, the address space directly; the address-in-byte-6 family
//! instead reads the space id out of the payload itself.
//!
//! One adjustment from the source layout: the "Write under mask" base
//! (`0x80`..`0x83`) and the "Options" singleton pair collide in the
//! original byte assignment. This engine keeps Write under mask at
//! `0x80`..`0x83` and moves Options to `0x8A`/`0x8B`, the nearest unused
//! pair in the singleton block — see the repository's design notes.

use crate::datagram::DatagramError;
use openlcb_core::AddressSpace;

const READ_BASE: u8 = 0x40;
const READ_OK_BASE: u8 = 0x50;
const READ_FAIL_BASE: u8 = 0x58;
const WRITE_BASE: u8 = 0x00;
const WRITE_OK_BASE: u8 = 0x10;
const WRITE_FAIL_BASE: u8 = 0x18;
const WRITE_UNDER_MASK_BASE: u8 = 0x80;

const OPTIONS_GET: u8 = 0x8A;
const OPTIONS_REPLY: u8 = 0x8B;
const GET_ADDRESS_SPACE_INFO: u8 = 0x84;
const GET_ADDRESS_SPACE_INFO_REPLY: u8 = 0x86;
const GET_ADDRESS_SPACE_INFO_NOT_PRESENT: u8 = 0x87;
const RESERVE_LOCK: u8 = 0x88;
const RESERVE_LOCK_REPLY: u8 = 0x89;
const GET_UNIQUE_ID: u8 = 0x8C;
const GET_UNIQUE_ID_REPLY: u8 = 0x8D;
const UNFREEZE: u8 = 0xA0;
const FREEZE: u8 = 0xA1;
const UPDATE_COMPLETE: u8 = 0xA8;
const RESET_REBOOT: u8 = 0xA9;
const FACTORY_RESET: u8 = 0xAA;

/// How the address space is encoded in a subcommand byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SpaceVariant {
    /// Space id is `payload[6]`.
    Explicit,
    /// Shorthand: the space is implied by the subcommand itself.
    Shorthand(AddressSpace),
}

fn decode_variant(low_bits: u8) -> Option<SpaceVariant> {
    Some(match low_bits {
        0 => SpaceVariant::Explicit,
        1 => SpaceVariant::Shorthand(AddressSpace::ConfigMemory),
        2 => SpaceVariant::Shorthand(AddressSpace::AllSpaces),
        3 => SpaceVariant::Shorthand(AddressSpace::Cdi),
        _ => return None,
    })
}

fn encode_variant(space: AddressSpace) -> Option<u8> {
    Some(match space {
        AddressSpace::ConfigMemory => 1,
        AddressSpace::AllSpaces => 2,
        AddressSpace::Cdi => 3,
        _ => return None,
    })
}

/// A parsed Configuration Memory request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read `count` bytes of `space` starting at `address`.
    Read {
        space: AddressSpace,
        address: u32,
        count: u8,
        shorthand: bool,
    },
    /// Write `data` (via its position/length in the original body) of
    /// `space` starting at `address`. The handler re-reads the data range
    /// out of the original datagram body using `data_offset`/`data_len`.
    Write {
        space: AddressSpace,
        address: u32,
        data_offset: usize,
        data_len: usize,
        shorthand: bool,
    },
    /// Get the node's unique id (a singleton query with no arguments).
    GetUniqueId,
    /// Freeze `space` ahead of a firmware/config upgrade.
    Freeze { space: AddressSpace },
    /// Unfreeze `space`.
    Unfreeze { space: AddressSpace },
    /// An in-progress firmware upgrade has finished.
    UpdateComplete,
    /// Reboot the node.
    ResetReboot,
    /// Erase persisted configuration back to factory defaults.
    FactoryReset,
    /// Query the protocol's supported options.
    Options,
    /// Query metadata (highest address, read-only flag, ...) for `space`.
    GetAddressSpaceInfo { space: AddressSpace },
    /// Request an exclusive lock on `space` for the duration of an update.
    ReserveLock { space: AddressSpace },
}

fn addr32(body: &[u8]) -> u32 {
    u32::from_be_bytes([body[2], body[3], body[4], body[5]])
}

/// Parses a Configuration Memory datagram body (`body[0] == 0x20`).
pub fn parse(body: &[u8]) -> Result<Command, DatagramError> {
    let sub = *body.get(1).ok_or(DatagramError::PermanentInvalidArguments)?;
    let base = sub & 0xFC;
    let variant_bits = sub & 0x03;

    if base == READ_BASE {
        let variant = decode_variant(variant_bits).ok_or(DatagramError::PermanentNotImplementedSubcommandUnknown)?;
        if body.len() < 6 {
            return Err(DatagramError::PermanentInvalidArguments);
        }
        let address = addr32(body);
        return match variant {
            SpaceVariant::Explicit => {
                let space_byte = *body.get(6).ok_or(DatagramError::PermanentInvalidArguments)?;
                let space = AddressSpace::try_from(space_byte)
                    .map_err(|_| DatagramError::PermanentAddressSpaceUnknown)?;
                let count = *body.get(7).ok_or(DatagramError::PermanentInvalidArguments)?;
                Ok(Command::Read { space, address, count, shorthand: false })
            }
            SpaceVariant::Shorthand(space) => {
                let count = *body.get(6).ok_or(DatagramError::PermanentInvalidArguments)?;
                Ok(Command::Read { space, address, count, shorthand: true })
            }
        };
    }

    if base == WRITE_BASE {
        let variant = decode_variant(variant_bits).ok_or(DatagramError::PermanentNotImplementedSubcommandUnknown)?;
        if body.len() < 6 {
            return Err(DatagramError::PermanentInvalidArguments);
        }
        let address = addr32(body);
        return match variant {
            SpaceVariant::Explicit => {
                let space_byte = *body.get(6).ok_or(DatagramError::PermanentInvalidArguments)?;
                let space = AddressSpace::try_from(space_byte)
                    .map_err(|_| DatagramError::PermanentAddressSpaceUnknown)?;
                Ok(Command::Write {
                    space,
                    address,
                    data_offset: 7,
                    data_len: body.len().saturating_sub(7),
                    shorthand: false,
                })
            }
            SpaceVariant::Shorthand(space) => Ok(Command::Write {
                space,
                address,
                data_offset: 6,
                data_len: body.len().saturating_sub(6),
                shorthand: true,
            }),
        };
    }

    match sub {
        GET_UNIQUE_ID => Ok(Command::GetUniqueId),
        UPDATE_COMPLETE => Ok(Command::UpdateComplete),
        RESET_REBOOT => Ok(Command::ResetReboot),
        FACTORY_RESET => Ok(Command::FactoryReset),
        OPTIONS_GET => Ok(Command::Options),
        GET_ADDRESS_SPACE_INFO => {
            let space_byte = *body.get(2).ok_or(DatagramError::PermanentInvalidArguments)?;
            let space = AddressSpace::try_from(space_byte)
                .map_err(|_| DatagramError::PermanentAddressSpaceUnknown)?;
            Ok(Command::GetAddressSpaceInfo { space })
        }
        RESERVE_LOCK => {
            let space_byte = *body.get(2).ok_or(DatagramError::PermanentInvalidArguments)?;
            let space = AddressSpace::try_from(space_byte)
                .map_err(|_| DatagramError::PermanentAddressSpaceUnknown)?;
            Ok(Command::ReserveLock { space })
        }
        FREEZE | UNFREEZE => {
            let space_byte = *body.get(2).ok_or(DatagramError::PermanentInvalidArguments)?;
            let space = AddressSpace::try_from(space_byte)
                .map_err(|_| DatagramError::PermanentAddressSpaceUnknown)?;
            Ok(if sub == FREEZE {
                Command::Freeze { space }
            } else {
                Command::Unfreeze { space }
            })
        }
        _ => Err(DatagramError::PermanentNotImplementedSubcommandUnknown),
    }
}

/// Builds a Read OK reply body (§8 S4: `[0x20][0x51][addr32][data...]`).
pub fn build_read_ok(space: AddressSpace, address: u32, shorthand: bool, data: &[u8]) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let sub = if shorthand {
        READ_OK_BASE | encode_variant(space).unwrap_or(0)
    } else {
        READ_OK_BASE
    };
    let _ = out.push(sub);
    for b in address.to_be_bytes() {
        let _ = out.push(b);
    }
    if !shorthand {
        let _ = out.push(space.as_byte());
    }
    for &b in data {
        if out.push(b).is_err() {
            break;
        }
    }
    out
}

/// Builds a Read fail reply body.
pub fn build_read_fail(
    space: AddressSpace,
    address: u32,
    shorthand: bool,
    error: DatagramError,
) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let sub = if shorthand {
        READ_FAIL_BASE | encode_variant(space).unwrap_or(0)
    } else {
        READ_FAIL_BASE
    };
    let _ = out.push(sub);
    for b in address.to_be_bytes() {
        let _ = out.push(b);
    }
    if !shorthand {
        let _ = out.push(space.as_byte());
    }
    for b in error.code().to_be_bytes() {
        let _ = out.push(b);
    }
    out
}

/// Builds a Write OK reply body.
pub fn build_write_ok(space: AddressSpace, address: u32, shorthand: bool) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let sub = if shorthand {
        WRITE_OK_BASE | encode_variant(space).unwrap_or(0)
    } else {
        WRITE_OK_BASE
    };
    let _ = out.push(sub);
    for b in address.to_be_bytes() {
        let _ = out.push(b);
    }
    if !shorthand {
        let _ = out.push(space.as_byte());
    }
    out
}

/// Builds a Write fail reply body (§8 S6: returned when the host's write
/// callback reports a short count).
pub fn build_write_fail(
    space: AddressSpace,
    address: u32,
    shorthand: bool,
    error: DatagramError,
) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let sub = if shorthand {
        WRITE_FAIL_BASE | encode_variant(space).unwrap_or(0)
    } else {
        WRITE_FAIL_BASE
    };
    let _ = out.push(sub);
    for b in address.to_be_bytes() {
        let _ = out.push(b);
    }
    if !shorthand {
        let _ = out.push(space.as_byte());
    }
    for b in error.code().to_be_bytes() {
        let _ = out.push(b);
    }
    out
}

/// Builds the Options reply body, carrying the protocol's supported-write
/// flags and the highest address space byte this node implements.
pub fn build_options_reply(write_under_mask: bool, highest_space: AddressSpace) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let _ = out.push(OPTIONS_REPLY);
    let _ = out.push(if write_under_mask { 0x01 } else { 0x00 });
    let _ = out.push(0x00);
    let _ = out.push(highest_space.as_byte());
    out
}

/// Builds the Get Address Space Info reply body for a space this node
/// implements.
pub fn build_address_space_info_reply(space: AddressSpace, highest_address: u32, low_address: u32) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let _ = out.push(GET_ADDRESS_SPACE_INFO_REPLY);
    let _ = out.push(space.as_byte());
    for b in highest_address.to_be_bytes() {
        let _ = out.push(b);
    }
    let _ = out.push(if space.is_writable() { 0x00 } else { 0x01 });
    for b in low_address.to_be_bytes() {
        let _ = out.push(b);
    }
    out
}

/// Builds the Get Address Space Info "not present" reply for an
/// unimplemented space.
pub fn build_address_space_info_absent(space: AddressSpace) -> [u8; 3] {
    [0x20, GET_ADDRESS_SPACE_INFO_NOT_PRESENT, space.as_byte()]
}

/// Builds the Reserve/Lock reply, echoing back the node id that now holds
/// the lock (all zero bytes signals "lock released"/"available").
pub fn build_reserve_lock_reply(holder_node_id: [u8; 6]) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let _ = out.push(RESERVE_LOCK_REPLY);
    for b in holder_node_id {
        let _ = out.push(b);
    }
    out
}

/// Builds the Get Unique ID reply, carrying the node's 6-byte id.
pub fn build_unique_id_reply(node_id: [u8; 6]) -> heapless::Vec<u8, 72> {
    let mut out = heapless::Vec::new();
    let _ = out.push(0x20);
    let _ = out.push(GET_UNIQUE_ID_REPLY);
    for b in node_id {
        let _ = out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_parses_shorthand_read_of_config_memory() {
        let body = [0x20u8, 0x41, 0x00, 0x00, 0x00, 0x00, 0x04];
        assert_eq!(
            parse(&body),
            Ok(Command::Read {
                space: AddressSpace::ConfigMemory,
                address: 0,
                count: 4,
                shorthand: true,
            })
        );
    }

    #[test]
    fn s4_builds_matching_read_ok_reply() {
        let reply = build_read_ok(AddressSpace::ConfigMemory, 0, true, &[1, 2, 3, 4]);
        assert_eq!(reply.as_slice(), &[0x20, 0x51, 0x00, 0x00, 0x00, 0x00, 1, 2, 3, 4]);
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        let body = [0x20u8, 0xFF];
        assert_eq!(parse(&body), Err(DatagramError::PermanentNotImplementedSubcommandUnknown));
    }

    #[test]
    fn s6_write_fail_reply_carries_temporary_error() {
        let reply = build_write_fail(
            AddressSpace::ConfigMemory,
            0,
            true,
            DatagramError::TemporaryTransferError,
        );
        assert_eq!(reply.as_slice(), &[0x20, 0x11, 0x00, 0x00, 0x00, 0x00, 0x20, 0x30]);
    }

    #[test]
    fn freeze_targets_firmware_space() {
        let body = [0x20u8, FREEZE, AddressSpace::Firmware.as_byte()];
        assert_eq!(parse(&body), Ok(Command::Freeze { space: AddressSpace::Firmware }));
    }

    #[test]
    fn singleton_commands_parse() {
        assert_eq!(parse(&[0x20, GET_UNIQUE_ID]), Ok(Command::GetUniqueId));
        assert_eq!(parse(&[0x20, UPDATE_COMPLETE]), Ok(Command::UpdateComplete));
        assert_eq!(parse(&[0x20, FACTORY_RESET]), Ok(Command::FactoryReset));
        assert_eq!(parse(&[0x20, OPTIONS_GET]), Ok(Command::Options));
    }

    #[test]
    fn address_space_info_and_reserve_lock_parse_with_space_byte() {
        let body = [0x20u8, GET_ADDRESS_SPACE_INFO, AddressSpace::Firmware.as_byte()];
        assert_eq!(parse(&body), Ok(Command::GetAddressSpaceInfo { space: AddressSpace::Firmware }));

        let body = [0x20u8, RESERVE_LOCK, AddressSpace::ConfigMemory.as_byte()];
        assert_eq!(parse(&body), Ok(Command::ReserveLock { space: AddressSpace::ConfigMemory }));
    }

    #[test]
    fn unique_id_reply_carries_six_bytes() {
        let reply = build_unique_id_reply([1, 2, 3, 4, 5, 6]);
        assert_eq!(reply.as_slice(), &[0x20, GET_UNIQUE_ID_REPLY, 1, 2, 3, 4, 5, 6]);
    }
}

//! Configuration memory address space identifiers (§3, §4.8).

/// A Configuration Memory address space, identified by a single byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressSpace {
    /// 0xFF — Configuration Definition Info (CDI), read-only.
    Cdi = 0xFF,
    /// 0xFE — composite view over all spaces.
    AllSpaces = 0xFE,
    /// 0xFD — persistent configuration memory, read/write.
    ConfigMemory = 0xFD,
    /// 0xFC — ACDI manufacturer block, read-only.
    AcdiManufacturer = 0xFC,
    /// 0xFB — ACDI user name/description, read/write.
    AcdiUser = 0xFB,
    /// 0xEF — firmware image, write-only except during an upgrade.
    Firmware = 0xEF,
    /// 0xFA — traction function configuration (optional).
    TractionConfig = 0xFA,
    /// 0xF9 — traction function definition (optional).
    TractionDefinition = 0xF9,
}

impl AddressSpace {
    /// The wire byte value of this address space.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// `true` for spaces the core treats as writable by a peer.
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            AddressSpace::ConfigMemory | AddressSpace::AcdiUser | AddressSpace::Firmware
        )
    }
}

impl TryFrom<u8> for AddressSpace {
    type Error = UnknownAddressSpace;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0xFF => AddressSpace::Cdi,
            0xFE => AddressSpace::AllSpaces,
            0xFD => AddressSpace::ConfigMemory,
            0xFC => AddressSpace::AcdiManufacturer,
            0xFB => AddressSpace::AcdiUser,
            0xEF => AddressSpace::Firmware,
            0xFA => AddressSpace::TractionConfig,
            0xF9 => AddressSpace::TractionDefinition,
            _ => return Err(UnknownAddressSpace(value)),
        })
    }
}

/// A byte that does not name any address space this core knows about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownAddressSpace(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_known_space() {
        for space in [
            AddressSpace::Cdi,
            AddressSpace::AllSpaces,
            AddressSpace::ConfigMemory,
            AddressSpace::AcdiManufacturer,
            AddressSpace::AcdiUser,
            AddressSpace::Firmware,
            AddressSpace::TractionConfig,
            AddressSpace::TractionDefinition,
        ] {
            assert_eq!(AddressSpace::try_from(space.as_byte()), Ok(space));
        }
    }

    #[test]
    fn rejects_unknown_byte() {
        assert_eq!(AddressSpace::try_from(0x01), Err(UnknownAddressSpace(0x01)));
    }

    #[test]
    fn writable_spaces() {
        assert!(AddressSpace::ConfigMemory.is_writable());
        assert!(AddressSpace::AcdiUser.is_writable());
        assert!(!AddressSpace::Cdi.is_writable());
        assert!(!AddressSpace::AcdiManufacturer.is_writable());
    }
}

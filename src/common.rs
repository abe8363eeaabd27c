//! System parameters and shared protocol vocabulary: address widths, cause
//! of transmission and the quality descriptor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IecError, IecResult};

/// Width of the cause of transmission field. With two octets the second
/// octet carries the originator address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CotSize {
    /// 1 byte: cause only, no originator address
    OneOctet = 1,
    /// 2 bytes: cause plus originator address
    TwoOctets = 2,
}

/// Common Address of ASDU can be 1 or 2 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommonAddrSize {
    /// 1 byte address
    OneOctet = 1,
    /// 2 byte address
    TwoOctets = 2,
}

/// Information object addresses can be 1, 2, or 3 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoObjAddrSize {
    /// 1 byte address
    OneOctet = 1,
    /// 2 byte address
    TwoOctets = 2,
    /// 3 byte address
    ThreeOctets = 3,
}

/// Common address 0 is reserved and never transmitted.
pub const INVALID_COMMON_ADDR: u16 = 0;

/// The broadcast address. Use is restricted to interrogation, counter
/// interrogation, clock synchronization and reset process commands.
/// In 8-bit mode 255 is mapped to this value on the wire.
pub const GLOBAL_COMMON_ADDR: u16 = 0xFFFF;

/// Information object address 0 means the address is irrelevant.
pub const IRRELEVANT_OBJ_ADDR: u32 = 0;

/// Fixed octet widths of one peering session. The widths are agreed out of
/// band and stay invariant for the lifetime of the session; every codec
/// operation takes them as context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemParams {
    /// Cause of transmission width (originator address presence)
    pub cot_size: CotSize,
    /// Common address width
    pub common_size: CommonAddrSize,
    /// Information object address width
    pub obj_size: InfoObjAddrSize,
}

impl SystemParams {
    /// Smallest addressing: 1 octet each.
    pub fn narrow() -> Self {
        Self {
            cot_size: CotSize::OneOctet,
            common_size: CommonAddrSize::OneOctet,
            obj_size: InfoObjAddrSize::OneOctet,
        }
    }

    /// Widest addressing: 2 octet cause, 2 octet common, 3 octet object.
    pub fn wide() -> Self {
        Self {
            cot_size: CotSize::TwoOctets,
            common_size: CommonAddrSize::TwoOctets,
            obj_size: InfoObjAddrSize::ThreeOctets,
        }
    }

    /// Octet count of the data unit identifier: type, variable structure
    /// qualifier, cause and common address.
    pub fn identifier_size(&self) -> usize {
        2 + self.cot_size as usize + self.common_size as usize
    }

    /// Octet count of one information object address.
    pub fn obj_addr_size(&self) -> usize {
        self.obj_size as usize
    }

    /// Highest representable information object address.
    pub fn obj_addr_max(&self) -> u32 {
        match self.obj_size {
            InfoObjAddrSize::OneOctet => 0xFF,
            InfoObjAddrSize::TwoOctets => 0xFFFF,
            InfoObjAddrSize::ThreeOctets => 0xFF_FFFF,
        }
    }

    /// Validate a common address against the configured width.
    /// [`GLOBAL_COMMON_ADDR`] is always representable.
    pub fn check_common_addr(&self, addr: u16) -> IecResult<()> {
        if addr == INVALID_COMMON_ADDR {
            return Err(IecError::CommonAddrInvalid(addr));
        }
        if addr != GLOBAL_COMMON_ADDR
            && self.common_size == CommonAddrSize::OneOctet
            && addr > 0xFE
        {
            return Err(IecError::CommonAddrInvalid(addr));
        }
        Ok(())
    }

    /// Validate an information object address against the configured width.
    pub fn check_obj_addr(&self, addr: u32) -> IecResult<()> {
        if addr > self.obj_addr_max() {
            return Err(IecError::ObjAddrOutOfRange(addr));
        }
        Ok(())
    }
}

impl Default for SystemParams {
    fn default() -> Self {
        Self::wide()
    }
}

/// Cause of transmission codes, the low 6 bits of the cause octet.
/// Code 0 is not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cause {
    /// Periodic, cyclic
    Periodic = 1,
    /// Background scan
    Background = 2,
    /// Spontaneous
    Spontaneous = 3,
    /// Initialized
    Initialized = 4,
    /// Request or requested
    Request = 5,
    /// Activation
    Activation = 6,
    /// Activation confirmation
    ActivationCon = 7,
    /// Deactivation
    Deactivation = 8,
    /// Deactivation confirmation
    DeactivationCon = 9,
    /// Activation termination
    ActivationTerm = 10,
    /// Return information caused by a remote command
    ReturnInfoRemote = 11,
    /// Return information caused by a local command
    ReturnInfoLocal = 12,
    /// File transfer
    FileTransfer = 13,
    /// Authentication
    Authentication = 14,
    /// Maintenance of authentication session key
    SessionKey = 15,
    /// Maintenance of user role and update key
    UserRoleAndAuthKey = 16,
    /// Interrogated by station interrogation
    InterrogatedByStation = 20,
    /// Interrogated by group 1 interrogation
    InterrogatedByGroup1 = 21,
    /// Interrogated by group 2 interrogation
    InterrogatedByGroup2 = 22,
    /// Interrogated by group 3 interrogation
    InterrogatedByGroup3 = 23,
    /// Interrogated by group 4 interrogation
    InterrogatedByGroup4 = 24,
    /// Interrogated by group 5 interrogation
    InterrogatedByGroup5 = 25,
    /// Interrogated by group 6 interrogation
    InterrogatedByGroup6 = 26,
    /// Interrogated by group 7 interrogation
    InterrogatedByGroup7 = 27,
    /// Interrogated by group 8 interrogation
    InterrogatedByGroup8 = 28,
    /// Interrogated by group 9 interrogation
    InterrogatedByGroup9 = 29,
    /// Interrogated by group 10 interrogation
    InterrogatedByGroup10 = 30,
    /// Interrogated by group 11 interrogation
    InterrogatedByGroup11 = 31,
    /// Interrogated by group 12 interrogation
    InterrogatedByGroup12 = 32,
    /// Interrogated by group 13 interrogation
    InterrogatedByGroup13 = 33,
    /// Interrogated by group 14 interrogation
    InterrogatedByGroup14 = 34,
    /// Interrogated by group 15 interrogation
    InterrogatedByGroup15 = 35,
    /// Interrogated by group 16 interrogation
    InterrogatedByGroup16 = 36,
    /// Requested by general counter request
    RequestByGeneralCounter = 37,
    /// Requested by group 1 counter request
    RequestByGroup1Counter = 38,
    /// Requested by group 2 counter request
    RequestByGroup2Counter = 39,
    /// Requested by group 3 counter request
    RequestByGroup3Counter = 40,
    /// Requested by group 4 counter request
    RequestByGroup4Counter = 41,
    /// Unknown type identification
    UnknownTypeId = 44,
    /// Unknown cause of transmission
    UnknownCause = 45,
    /// Unknown common address of ASDU
    UnknownCommonAddr = 46,
    /// Unknown information object address
    UnknownInfoObjAddr = 47,
}

impl Cause {
    /// Create a cause from the low 6 bits of the cause octet.
    pub fn from_code(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Periodic),
            2 => Some(Self::Background),
            3 => Some(Self::Spontaneous),
            4 => Some(Self::Initialized),
            5 => Some(Self::Request),
            6 => Some(Self::Activation),
            7 => Some(Self::ActivationCon),
            8 => Some(Self::Deactivation),
            9 => Some(Self::DeactivationCon),
            10 => Some(Self::ActivationTerm),
            11 => Some(Self::ReturnInfoRemote),
            12 => Some(Self::ReturnInfoLocal),
            13 => Some(Self::FileTransfer),
            14 => Some(Self::Authentication),
            15 => Some(Self::SessionKey),
            16 => Some(Self::UserRoleAndAuthKey),
            20 => Some(Self::InterrogatedByStation),
            21 => Some(Self::InterrogatedByGroup1),
            22 => Some(Self::InterrogatedByGroup2),
            23 => Some(Self::InterrogatedByGroup3),
            24 => Some(Self::InterrogatedByGroup4),
            25 => Some(Self::InterrogatedByGroup5),
            26 => Some(Self::InterrogatedByGroup6),
            27 => Some(Self::InterrogatedByGroup7),
            28 => Some(Self::InterrogatedByGroup8),
            29 => Some(Self::InterrogatedByGroup9),
            30 => Some(Self::InterrogatedByGroup10),
            31 => Some(Self::InterrogatedByGroup11),
            32 => Some(Self::InterrogatedByGroup12),
            33 => Some(Self::InterrogatedByGroup13),
            34 => Some(Self::InterrogatedByGroup14),
            35 => Some(Self::InterrogatedByGroup15),
            36 => Some(Self::InterrogatedByGroup16),
            37 => Some(Self::RequestByGeneralCounter),
            38 => Some(Self::RequestByGroup1Counter),
            39 => Some(Self::RequestByGroup2Counter),
            40 => Some(Self::RequestByGroup3Counter),
            41 => Some(Self::RequestByGroup4Counter),
            44 => Some(Self::UnknownTypeId),
            45 => Some(Self::UnknownCause),
            46 => Some(Self::UnknownCommonAddr),
            47 => Some(Self::UnknownInfoObjAddr),
            _ => None,
        }
    }

    /// The 6-bit cause code.
    pub fn to_code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cause::Periodic => "per/cyc",
            Cause::Background => "back",
            Cause::Spontaneous => "spont",
            Cause::Initialized => "init",
            Cause::Request => "req",
            Cause::Activation => "act",
            Cause::ActivationCon => "actcon",
            Cause::Deactivation => "deact",
            Cause::DeactivationCon => "deactcon",
            Cause::ActivationTerm => "actterm",
            Cause::ReturnInfoRemote => "retrem",
            Cause::ReturnInfoLocal => "retloc",
            Cause::FileTransfer => "file",
            Cause::Authentication => "auth",
            Cause::SessionKey => "seskey",
            Cause::UserRoleAndAuthKey => "usrkey",
            Cause::InterrogatedByStation => "inrogen",
            Cause::InterrogatedByGroup1 => "inro1",
            Cause::InterrogatedByGroup2 => "inro2",
            Cause::InterrogatedByGroup3 => "inro3",
            Cause::InterrogatedByGroup4 => "inro4",
            Cause::InterrogatedByGroup5 => "inro5",
            Cause::InterrogatedByGroup6 => "inro6",
            Cause::InterrogatedByGroup7 => "inro7",
            Cause::InterrogatedByGroup8 => "inro8",
            Cause::InterrogatedByGroup9 => "inro9",
            Cause::InterrogatedByGroup10 => "inro10",
            Cause::InterrogatedByGroup11 => "inro11",
            Cause::InterrogatedByGroup12 => "inro12",
            Cause::InterrogatedByGroup13 => "inro13",
            Cause::InterrogatedByGroup14 => "inro14",
            Cause::InterrogatedByGroup15 => "inro15",
            Cause::InterrogatedByGroup16 => "inro16",
            Cause::RequestByGeneralCounter => "reqcogen",
            Cause::RequestByGroup1Counter => "reqco1",
            Cause::RequestByGroup2Counter => "reqco2",
            Cause::RequestByGroup3Counter => "reqco3",
            Cause::RequestByGroup4Counter => "reqco4",
            Cause::UnknownTypeId => "unktype",
            Cause::UnknownCause => "unkcause",
            Cause::UnknownCommonAddr => "unkaddr",
            Cause::UnknownInfoObjAddr => "unkinfo",
        };
        f.write_str(s)
    }
}

/// Cause of transmission octet: a 6-bit [`Cause`] plus the negative-confirm
/// flag (bit 6) and the test flag (bit 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CauseOfTransmission {
    pub cause: Cause,
    /// P/N: negative confirmation of the activation
    pub negative: bool,
    /// T: the exchange is a test, not an operation
    pub test: bool,
}

/// Negative-confirm flag position within the cause octet.
pub const NEG_FLAG: u8 = 0x40;

/// Test flag position within the cause octet.
pub const TEST_FLAG: u8 = 0x80;

impl CauseOfTransmission {
    /// Plain cause with both flags clear.
    pub fn new(cause: Cause) -> Self {
        Self {
            cause,
            negative: false,
            test: false,
        }
    }

    pub fn with_negative(mut self) -> Self {
        self.negative = true;
        self
    }

    pub fn with_test(mut self) -> Self {
        self.test = true;
        self
    }

    /// Parse the cause octet. Rejects code 0 and codes outside the table.
    pub fn from_byte(value: u8) -> IecResult<Self> {
        let code = value & 0x3F;
        let cause = Cause::from_code(code).ok_or(IecError::IllegalCause(value))?;
        Ok(Self {
            cause,
            negative: value & NEG_FLAG != 0,
            test: value & TEST_FLAG != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        let mut value = self.cause.to_code();
        if self.negative {
            value |= NEG_FLAG;
        }
        if self.test {
            value |= TEST_FLAG;
        }
        value
    }
}

impl fmt::Display for CauseOfTransmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if self.negative {
            f.write_str(",neg")?;
        }
        if self.test {
            f.write_str(",test")?;
        }
        Ok(())
    }
}

/// Quality descriptor flags, packed into one octet next to or around the
/// information element value. Bits 1 and 2 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality(u8);

impl Quality {
    /// All flags clear: the value is usable.
    pub const OK: Quality = Quality(0);
    /// OV: value beyond a predefined range
    pub const OVERFLOW: u8 = 0x01;
    /// EI: the elapsed time was not recorded correctly
    pub const ELAPSED_TIME_INVALID: u8 = 0x08;
    /// BL: value blocked for transmission
    pub const BLOCKED: u8 = 0x10;
    /// SB: value substituted by an operator or automatic source
    pub const SUBSTITUTED: u8 = 0x20;
    /// NT: the most recent update failed
    pub const NOT_TOPICAL: u8 = 0x40;
    /// IV: the value is invalid
    pub const INVALID: u8 = 0x80;

    const FLAG_MASK: u8 = 0xF9;

    pub fn new(flags: u8) -> Self {
        Quality(flags & Self::FLAG_MASK)
    }

    /// Raw octet with the reserved bits masked out.
    pub fn from_byte(value: u8) -> Self {
        Quality(value & Self::FLAG_MASK)
    }

    pub fn to_byte(self) -> u8 {
        self.0
    }

    pub fn overflow(self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    pub fn elapsed_time_invalid(self) -> bool {
        self.0 & Self::ELAPSED_TIME_INVALID != 0
    }

    pub fn blocked(self) -> bool {
        self.0 & Self::BLOCKED != 0
    }

    pub fn substituted(self) -> bool {
        self.0 & Self::SUBSTITUTED != 0
    }

    pub fn not_topical(self) -> bool {
        self.0 & Self::NOT_TOPICAL != 0
    }

    pub fn invalid(self) -> bool {
        self.0 & Self::INVALID != 0
    }

    /// Usable for operational purposes: no flag raised.
    pub fn ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok() {
            return f.write_str("OK");
        }
        let mut sep = "";
        for (flag, label) in [
            (Self::OVERFLOW, "OV"),
            (Self::ELAPSED_TIME_INVALID, "EI"),
            (Self::BLOCKED, "BL"),
            (Self::SUBSTITUTED, "SB"),
            (Self::NOT_TOPICAL, "NT"),
            (Self::INVALID, "IV"),
        ] {
            if self.0 & flag != 0 {
                write!(f, "{sep}{label}")?;
                sep = ",";
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_octet_flags() {
        let cot = CauseOfTransmission::from_byte(0x83).unwrap();
        assert_eq!(cot.cause, Cause::Spontaneous);
        assert!(cot.test);
        assert!(!cot.negative);
        assert_eq!(cot.to_byte(), 0x83);

        let neg = CauseOfTransmission::new(Cause::ActivationCon).with_negative();
        assert_eq!(neg.to_byte(), 0x47);
    }

    #[test]
    fn cause_zero_rejected() {
        assert!(CauseOfTransmission::from_byte(0).is_err());
        assert!(CauseOfTransmission::from_byte(TEST_FLAG).is_err());
    }

    #[test]
    fn quality_masks_reserved_bits() {
        let q = Quality::from_byte(0xFF);
        assert_eq!(q.to_byte(), 0xF9);
        assert!(q.overflow() && q.invalid() && q.blocked());
        assert!(!Quality::OK.invalid());
    }

    #[test]
    fn narrow_common_addr_range() {
        let p = SystemParams::narrow();
        assert!(p.check_common_addr(0).is_err());
        assert!(p.check_common_addr(254).is_ok());
        assert!(p.check_common_addr(300).is_err());
        assert!(p.check_common_addr(GLOBAL_COMMON_ADDR).is_ok());
    }
}

//! ASDU - Application Service Data Unit: the type identifier catalogue and
//! the generic codec over the parametric data unit identifier.
//!
//! The payload is kept opaque here; per-object structure belongs to the
//! monitor dispatcher and the command layers, which know the object size
//! for each type identifier.

use std::fmt;
use std::io::Cursor;

use byteorder::ReadBytesExt;

use crate::common::{
    CauseOfTransmission, CommonAddrSize, CotSize, SystemParams, GLOBAL_COMMON_ADDR,
    INVALID_COMMON_ADDR,
};
use crate::error::{IecError, IecResult};

/// Upper bound for one serialized ASDU, dictated by the APDU length octet.
pub const ASDU_SIZE_MAX: usize = 249;

/// Type identification (TI) for ASDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Single-point information (M_SP_NA_1)
    SinglePoint = 1,
    /// Single-point information with CP24 time tag (M_SP_TA_1)
    SinglePointWithTime = 2,
    /// Double-point information (M_DP_NA_1)
    DoublePoint = 3,
    /// Double-point information with CP24 time tag (M_DP_TA_1)
    DoublePointWithTime = 4,
    /// Step position information (M_ST_NA_1)
    StepPosition = 5,
    /// Step position information with CP24 time tag (M_ST_TA_1)
    StepPositionWithTime = 6,
    /// Bitstring of 32 bits (M_BO_NA_1)
    Bitstring32 = 7,
    /// Bitstring of 32 bits with CP24 time tag (M_BO_TA_1)
    Bitstring32WithTime = 8,
    /// Measured value, normalized (M_ME_NA_1)
    MeasuredValueNormal = 9,
    /// Measured value, normalized with CP24 time tag (M_ME_TA_1)
    MeasuredValueNormalWithTime = 10,
    /// Measured value, scaled (M_ME_NB_1)
    MeasuredValueScaled = 11,
    /// Measured value, scaled with CP24 time tag (M_ME_TB_1)
    MeasuredValueScaledWithTime = 12,
    /// Measured value, short floating point (M_ME_NC_1)
    MeasuredValueFloat = 13,
    /// Measured value, short floating point with CP24 time tag (M_ME_TC_1)
    MeasuredValueFloatWithTime = 14,
    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals = 15,
    /// Integrated totals with CP24 time tag (M_IT_TA_1)
    IntegratedTotalsWithTime = 16,
    /// Event of protection equipment (M_EP_TA_1)
    ProtectionEvent = 17,
    /// Packed start events of protection equipment (M_EP_TB_1)
    ProtectionStartEvents = 18,
    /// Packed output circuit info of protection equipment (M_EP_TC_1)
    ProtectionOutCircuit = 19,
    /// Packed single-point info with status change detection (M_PS_NA_1)
    PackedSinglePointWithScd = 20,
    /// Measured value, normalized, without quality descriptor (M_ME_ND_1)
    MeasuredValueNormalNoQuality = 21,
    /// Single-point information with CP56 time tag (M_SP_TB_1)
    SinglePointWithTime56 = 30,
    /// Double-point information with CP56 time tag (M_DP_TB_1)
    DoublePointWithTime56 = 31,
    /// Step position information with CP56 time tag (M_ST_TB_1)
    StepPositionWithTime56 = 32,
    /// Bitstring of 32 bits with CP56 time tag (M_BO_TB_1)
    Bitstring32WithTime56 = 33,
    /// Measured value, normalized with CP56 time tag (M_ME_TD_1)
    MeasuredValueNormalWithTime56 = 34,
    /// Measured value, scaled with CP56 time tag (M_ME_TE_1)
    MeasuredValueScaledWithTime56 = 35,
    /// Measured value, short floating point with CP56 time tag (M_ME_TF_1)
    MeasuredValueFloatWithTime56 = 36,
    /// Integrated totals with CP56 time tag (M_IT_TB_1)
    IntegratedTotalsWithTime56 = 37,
    /// Event of protection equipment with CP56 time tag (M_EP_TD_1)
    ProtectionEventWithTime56 = 38,
    /// Packed start events of protection equipment with CP56 time tag (M_EP_TE_1)
    ProtectionStartEventsWithTime56 = 39,
    /// Packed output circuit info of protection equipment with CP56 time tag (M_EP_TF_1)
    ProtectionOutCircuitWithTime56 = 40,
    /// Single command (C_SC_NA_1)
    SingleCommand = 45,
    /// Double command (C_DC_NA_1)
    DoubleCommand = 46,
    /// Regulating step command (C_RC_NA_1)
    RegulatingStepCommand = 47,
    /// Set-point command, normalized (C_SE_NA_1)
    SetpointCommandNormal = 48,
    /// Set-point command, scaled (C_SE_NB_1)
    SetpointCommandScaled = 49,
    /// Set-point command, short floating point (C_SE_NC_1)
    SetpointCommandFloat = 50,
    /// Bitstring of 32 bits command (C_BO_NA_1)
    Bitstring32Command = 51,
    /// Single command with CP56 time tag (C_SC_TA_1)
    SingleCommandWithTime = 58,
    /// Double command with CP56 time tag (C_DC_TA_1)
    DoubleCommandWithTime = 59,
    /// Regulating step command with CP56 time tag (C_RC_TA_1)
    RegulatingStepCommandWithTime = 60,
    /// Set-point command, normalized, with CP56 time tag (C_SE_TA_1)
    SetpointCommandNormalWithTime = 61,
    /// Set-point command, scaled, with CP56 time tag (C_SE_TB_1)
    SetpointCommandScaledWithTime = 62,
    /// Set-point command, short floating point, with CP56 time tag (C_SE_TC_1)
    SetpointCommandFloatWithTime = 63,
    /// Bitstring of 32 bits command with CP56 time tag (C_BO_TA_1)
    Bitstring32CommandWithTime = 64,
    /// End of initialization (M_EI_NA_1)
    EndOfInitialization = 70,
    /// Interrogation command (C_IC_NA_1)
    InterrogationCommand = 100,
    /// Counter interrogation command (C_CI_NA_1)
    CounterInterrogationCommand = 101,
    /// Read command (C_RD_NA_1)
    ReadCommand = 102,
    /// Clock synchronization command (C_CS_NA_1)
    ClockSyncCommand = 103,
    /// Test command (C_TS_NA_1)
    TestCommand = 104,
    /// Reset process command (C_RP_NA_1)
    ResetProcessCommand = 105,
    /// Delay acquisition command (C_CD_NA_1)
    DelayAcquisitionCommand = 106,
    /// Test command with CP56 time tag (C_TS_TA_1)
    TestCommandWithTime = 107,
    /// Parameter of measured value, normalized (P_ME_NA_1)
    ParameterNormal = 110,
    /// Parameter of measured value, scaled (P_ME_NB_1)
    ParameterScaled = 111,
    /// Parameter of measured value, short floating point (P_ME_NC_1)
    ParameterFloat = 112,
    /// Parameter activation (P_AC_NA_1)
    ParameterActivation = 113,
    /// File ready (F_FR_NA_1)
    FileReady = 120,
    /// Section ready (F_SR_NA_1)
    SectionReady = 121,
    /// Call directory, select file, call file, call section (F_SC_NA_1)
    CallDirectory = 122,
    /// Last section, last segment (F_LS_NA_1)
    LastSection = 123,
    /// ACK file, ACK section (F_AF_NA_1)
    AckFile = 124,
    /// Segment (F_SG_NA_1)
    Segment = 125,
    /// Directory (F_DR_TA_1)
    Directory = 126,
    /// Query log, request archive file (F_SC_NB_1)
    QueryLog = 127,
}

impl TryFrom<u8> for TypeId {
    type Error = IecError;

    fn try_from(value: u8) -> IecResult<Self> {
        Ok(match value {
            0 => return Err(IecError::ReservedType),
            1 => Self::SinglePoint,
            2 => Self::SinglePointWithTime,
            3 => Self::DoublePoint,
            4 => Self::DoublePointWithTime,
            5 => Self::StepPosition,
            6 => Self::StepPositionWithTime,
            7 => Self::Bitstring32,
            8 => Self::Bitstring32WithTime,
            9 => Self::MeasuredValueNormal,
            10 => Self::MeasuredValueNormalWithTime,
            11 => Self::MeasuredValueScaled,
            12 => Self::MeasuredValueScaledWithTime,
            13 => Self::MeasuredValueFloat,
            14 => Self::MeasuredValueFloatWithTime,
            15 => Self::IntegratedTotals,
            16 => Self::IntegratedTotalsWithTime,
            17 => Self::ProtectionEvent,
            18 => Self::ProtectionStartEvents,
            19 => Self::ProtectionOutCircuit,
            20 => Self::PackedSinglePointWithScd,
            21 => Self::MeasuredValueNormalNoQuality,
            30 => Self::SinglePointWithTime56,
            31 => Self::DoublePointWithTime56,
            32 => Self::StepPositionWithTime56,
            33 => Self::Bitstring32WithTime56,
            34 => Self::MeasuredValueNormalWithTime56,
            35 => Self::MeasuredValueScaledWithTime56,
            36 => Self::MeasuredValueFloatWithTime56,
            37 => Self::IntegratedTotalsWithTime56,
            38 => Self::ProtectionEventWithTime56,
            39 => Self::ProtectionStartEventsWithTime56,
            40 => Self::ProtectionOutCircuitWithTime56,
            45 => Self::SingleCommand,
            46 => Self::DoubleCommand,
            47 => Self::RegulatingStepCommand,
            48 => Self::SetpointCommandNormal,
            49 => Self::SetpointCommandScaled,
            50 => Self::SetpointCommandFloat,
            51 => Self::Bitstring32Command,
            58 => Self::SingleCommandWithTime,
            59 => Self::DoubleCommandWithTime,
            60 => Self::RegulatingStepCommandWithTime,
            61 => Self::SetpointCommandNormalWithTime,
            62 => Self::SetpointCommandScaledWithTime,
            63 => Self::SetpointCommandFloatWithTime,
            64 => Self::Bitstring32CommandWithTime,
            70 => Self::EndOfInitialization,
            100 => Self::InterrogationCommand,
            101 => Self::CounterInterrogationCommand,
            102 => Self::ReadCommand,
            103 => Self::ClockSyncCommand,
            104 => Self::TestCommand,
            105 => Self::ResetProcessCommand,
            106 => Self::DelayAcquisitionCommand,
            107 => Self::TestCommandWithTime,
            110 => Self::ParameterNormal,
            111 => Self::ParameterScaled,
            112 => Self::ParameterFloat,
            113 => Self::ParameterActivation,
            120 => Self::FileReady,
            121 => Self::SectionReady,
            122 => Self::CallDirectory,
            123 => Self::LastSection,
            124 => Self::AckFile,
            125 => Self::Segment,
            126 => Self::Directory,
            127 => Self::QueryLog,
            other => return Err(IecError::UnknownTypeId(other)),
        })
    }
}

impl TypeId {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Fixed octet count of one information object of this type, time tag
    /// included. `None` when the structure is unknown to this
    /// implementation (file transfer, parameter and security extensions);
    /// such payloads are surfaced as raw bytes.
    pub fn object_size(self) -> Option<usize> {
        Some(match self {
            Self::SinglePoint => 1,
            Self::SinglePointWithTime => 4,
            Self::DoublePoint => 1,
            Self::DoublePointWithTime => 4,
            Self::StepPosition => 2,
            Self::StepPositionWithTime => 5,
            Self::Bitstring32 => 5,
            Self::Bitstring32WithTime => 8,
            Self::MeasuredValueNormal => 3,
            Self::MeasuredValueNormalWithTime => 6,
            Self::MeasuredValueScaled => 3,
            Self::MeasuredValueScaledWithTime => 6,
            Self::MeasuredValueFloat => 5,
            Self::MeasuredValueFloatWithTime => 8,
            Self::IntegratedTotals => 5,
            Self::IntegratedTotalsWithTime => 8,
            Self::ProtectionEvent => 3,
            Self::ProtectionStartEvents => 4,
            Self::ProtectionOutCircuit => 4,
            Self::PackedSinglePointWithScd => 5,
            Self::MeasuredValueNormalNoQuality => 2,
            Self::SinglePointWithTime56 => 8,
            Self::DoublePointWithTime56 => 8,
            Self::StepPositionWithTime56 => 9,
            Self::Bitstring32WithTime56 => 12,
            Self::MeasuredValueNormalWithTime56 => 10,
            Self::MeasuredValueScaledWithTime56 => 10,
            Self::MeasuredValueFloatWithTime56 => 12,
            Self::IntegratedTotalsWithTime56 => 12,
            Self::ProtectionEventWithTime56 => 10,
            Self::ProtectionStartEventsWithTime56 => 11,
            Self::ProtectionOutCircuitWithTime56 => 11,
            Self::SingleCommand => 1,
            Self::DoubleCommand => 1,
            Self::RegulatingStepCommand => 1,
            Self::SetpointCommandNormal => 3,
            Self::SetpointCommandScaled => 3,
            Self::SetpointCommandFloat => 5,
            Self::Bitstring32Command => 4,
            Self::SingleCommandWithTime => 8,
            Self::DoubleCommandWithTime => 8,
            Self::RegulatingStepCommandWithTime => 8,
            Self::SetpointCommandNormalWithTime => 10,
            Self::SetpointCommandScaledWithTime => 10,
            Self::SetpointCommandFloatWithTime => 12,
            Self::Bitstring32CommandWithTime => 11,
            Self::EndOfInitialization => 1,
            Self::InterrogationCommand => 1,
            Self::CounterInterrogationCommand => 1,
            Self::ReadCommand => 0,
            Self::ClockSyncCommand => 7,
            Self::TestCommand => 2,
            Self::ResetProcessCommand => 1,
            Self::DelayAcquisitionCommand => 2,
            Self::TestCommandWithTime => 9,
            _ => return None,
        })
    }

    /// Whether the companion standard permits the sequence layout (base
    /// address plus implicit increment) for this type: the monitor types
    /// without time tag. Time-tagged monitor types and all commands carry
    /// one address per object.
    pub fn allows_sequence(self) -> bool {
        matches!(
            self,
            Self::SinglePoint
                | Self::DoublePoint
                | Self::StepPosition
                | Self::Bitstring32
                | Self::MeasuredValueNormal
                | Self::MeasuredValueScaled
                | Self::MeasuredValueFloat
                | Self::IntegratedTotals
                | Self::PackedSinglePointWithScd
                | Self::MeasuredValueNormalNoQuality
        )
    }

    /// Process command in the control direction (C_SC..C_BO, plain or
    /// time-tagged).
    pub fn is_process_command(self) -> bool {
        matches!(self.to_byte(), 45..=51 | 58..=64)
    }

    /// System command in the control direction (C_IC..C_TS_TA).
    pub fn is_system_command(self) -> bool {
        matches!(self.to_byte(), 100..=107)
    }

    /// Standard mnemonic, for operator logging.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::SinglePoint => "M_SP_NA_1",
            Self::SinglePointWithTime => "M_SP_TA_1",
            Self::DoublePoint => "M_DP_NA_1",
            Self::DoublePointWithTime => "M_DP_TA_1",
            Self::StepPosition => "M_ST_NA_1",
            Self::StepPositionWithTime => "M_ST_TA_1",
            Self::Bitstring32 => "M_BO_NA_1",
            Self::Bitstring32WithTime => "M_BO_TA_1",
            Self::MeasuredValueNormal => "M_ME_NA_1",
            Self::MeasuredValueNormalWithTime => "M_ME_TA_1",
            Self::MeasuredValueScaled => "M_ME_NB_1",
            Self::MeasuredValueScaledWithTime => "M_ME_TB_1",
            Self::MeasuredValueFloat => "M_ME_NC_1",
            Self::MeasuredValueFloatWithTime => "M_ME_TC_1",
            Self::IntegratedTotals => "M_IT_NA_1",
            Self::IntegratedTotalsWithTime => "M_IT_TA_1",
            Self::ProtectionEvent => "M_EP_TA_1",
            Self::ProtectionStartEvents => "M_EP_TB_1",
            Self::ProtectionOutCircuit => "M_EP_TC_1",
            Self::PackedSinglePointWithScd => "M_PS_NA_1",
            Self::MeasuredValueNormalNoQuality => "M_ME_ND_1",
            Self::SinglePointWithTime56 => "M_SP_TB_1",
            Self::DoublePointWithTime56 => "M_DP_TB_1",
            Self::StepPositionWithTime56 => "M_ST_TB_1",
            Self::Bitstring32WithTime56 => "M_BO_TB_1",
            Self::MeasuredValueNormalWithTime56 => "M_ME_TD_1",
            Self::MeasuredValueScaledWithTime56 => "M_ME_TE_1",
            Self::MeasuredValueFloatWithTime56 => "M_ME_TF_1",
            Self::IntegratedTotalsWithTime56 => "M_IT_TB_1",
            Self::ProtectionEventWithTime56 => "M_EP_TD_1",
            Self::ProtectionStartEventsWithTime56 => "M_EP_TE_1",
            Self::ProtectionOutCircuitWithTime56 => "M_EP_TF_1",
            Self::SingleCommand => "C_SC_NA_1",
            Self::DoubleCommand => "C_DC_NA_1",
            Self::RegulatingStepCommand => "C_RC_NA_1",
            Self::SetpointCommandNormal => "C_SE_NA_1",
            Self::SetpointCommandScaled => "C_SE_NB_1",
            Self::SetpointCommandFloat => "C_SE_NC_1",
            Self::Bitstring32Command => "C_BO_NA_1",
            Self::SingleCommandWithTime => "C_SC_TA_1",
            Self::DoubleCommandWithTime => "C_DC_TA_1",
            Self::RegulatingStepCommandWithTime => "C_RC_TA_1",
            Self::SetpointCommandNormalWithTime => "C_SE_TA_1",
            Self::SetpointCommandScaledWithTime => "C_SE_TB_1",
            Self::SetpointCommandFloatWithTime => "C_SE_TC_1",
            Self::Bitstring32CommandWithTime => "C_BO_TA_1",
            Self::EndOfInitialization => "M_EI_NA_1",
            Self::InterrogationCommand => "C_IC_NA_1",
            Self::CounterInterrogationCommand => "C_CI_NA_1",
            Self::ReadCommand => "C_RD_NA_1",
            Self::ClockSyncCommand => "C_CS_NA_1",
            Self::TestCommand => "C_TS_NA_1",
            Self::ResetProcessCommand => "C_RP_NA_1",
            Self::DelayAcquisitionCommand => "C_CD_NA_1",
            Self::TestCommandWithTime => "C_TS_TA_1",
            Self::ParameterNormal => "P_ME_NA_1",
            Self::ParameterScaled => "P_ME_NB_1",
            Self::ParameterFloat => "P_ME_NC_1",
            Self::ParameterActivation => "P_AC_NA_1",
            Self::FileReady => "F_FR_NA_1",
            Self::SectionReady => "F_SR_NA_1",
            Self::CallDirectory => "F_SC_NA_1",
            Self::LastSection => "F_LS_NA_1",
            Self::AckFile => "F_AF_NA_1",
            Self::Segment => "F_SG_NA_1",
            Self::Directory => "F_DR_TA_1",
            Self::QueryLog => "F_SC_NB_1",
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Sequence-flag bit within the variable structure qualifier.
pub const VSQ_SEQ_FLAG: u8 = 0x80;

/// Read a little-endian information object address of the configured width.
pub(crate) fn read_obj_addr(b: &[u8], params: &SystemParams) -> u32 {
    let mut addr = 0u32;
    for (i, &octet) in b.iter().take(params.obj_addr_size()).enumerate() {
        addr |= u32::from(octet) << (8 * i);
    }
    addr
}

/// Append a little-endian information object address of the configured
/// width.
pub(crate) fn write_obj_addr(buf: &mut Vec<u8>, addr: u32, params: &SystemParams) {
    for i in 0..params.obj_addr_size() {
        buf.push((addr >> (8 * i)) as u8);
    }
}

/// ASDU with the payload kept as raw information object bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asdu {
    /// Type identification
    pub type_id: TypeId,
    /// Variable structure qualifier: 7-bit object count plus sequence flag
    pub vsq: u8,
    /// Cause of transmission
    pub cot: CauseOfTransmission,
    /// Originator address; 0 when the cause width carries none
    pub originator: u8,
    /// Common address of ASDU
    pub common_addr: u16,
    /// Raw information object data
    pub payload: Vec<u8>,
}

impl Asdu {
    pub fn new(
        type_id: TypeId,
        vsq: u8,
        cot: CauseOfTransmission,
        originator: u8,
        common_addr: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            type_id,
            vsq,
            cot,
            originator,
            common_addr,
            payload,
        }
    }

    /// Number of information objects from the variable structure qualifier.
    pub fn num_objects(&self) -> u8 {
        self.vsq & 0x7F
    }

    /// Whether the payload uses the sequence layout (one base address, then
    /// contiguous elements).
    pub fn is_sequence(&self) -> bool {
        self.vsq & VSQ_SEQ_FLAG != 0
    }

    /// Decode the data unit identifier; the remainder of `data` is retained
    /// as the opaque payload. Body-structure validation is deferred to the
    /// consumer that knows the per-type object size.
    pub fn decode(data: &[u8], params: &SystemParams) -> IecResult<Self> {
        if data.len() < params.identifier_size() {
            return Err(IecError::LengthMismatch {
                expect: params.identifier_size(),
                got: data.len(),
            });
        }
        if data.len() > ASDU_SIZE_MAX {
            return Err(IecError::PayloadTooLarge(data.len()));
        }

        let mut cursor = Cursor::new(data);
        let type_id = TypeId::try_from(cursor.read_u8()?)?;
        let vsq = cursor.read_u8()?;
        let cot = CauseOfTransmission::from_byte(cursor.read_u8()?)?;
        let originator = match params.cot_size {
            CotSize::OneOctet => 0,
            CotSize::TwoOctets => cursor.read_u8()?,
        };
        let common_addr = match params.common_size {
            CommonAddrSize::OneOctet => match cursor.read_u8()? {
                // 255 denotes the global address in 8-bit mode.
                0xFF => GLOBAL_COMMON_ADDR,
                a => u16::from(a),
            },
            CommonAddrSize::TwoOctets => {
                let low = cursor.read_u8()?;
                let high = cursor.read_u8()?;
                u16::from_le_bytes([low, high])
            }
        };
        if common_addr == INVALID_COMMON_ADDR {
            return Err(IecError::CommonAddrInvalid(common_addr));
        }

        let payload = data[cursor.position() as usize..].to_vec();
        Ok(Self {
            type_id,
            vsq,
            cot,
            originator,
            common_addr,
            payload,
        })
    }

    /// Append the serialized form to `buf`. The payload is written as-is;
    /// only the identifier invariants are enforced.
    pub fn encode_into(&self, buf: &mut Vec<u8>, params: &SystemParams) -> IecResult<()> {
        params.check_common_addr(self.common_addr)?;
        if params.identifier_size() + self.payload.len() > ASDU_SIZE_MAX {
            return Err(IecError::PayloadTooLarge(self.payload.len()));
        }

        buf.push(self.type_id.to_byte());
        buf.push(self.vsq);
        buf.push(self.cot.to_byte());
        if params.cot_size == CotSize::TwoOctets {
            buf.push(self.originator);
        }
        match params.common_size {
            CommonAddrSize::OneOctet => {
                buf.push(if self.common_addr == GLOBAL_COMMON_ADDR {
                    0xFF
                } else {
                    self.common_addr as u8
                });
            }
            CommonAddrSize::TwoOctets => {
                buf.extend_from_slice(&self.common_addr.to_le_bytes());
            }
        }
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn encode(&self, params: &SystemParams) -> IecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(params.identifier_size() + self.payload.len());
        self.encode_into(&mut buf, params)?;
        Ok(buf)
    }

    /// Validate the payload structure against the catalogue: length per the
    /// variable structure qualifier, sequence eligibility and sequence
    /// address range. Types of unknown structure pass.
    pub fn check_structure(&self, params: &SystemParams) -> IecResult<()> {
        let Some(size) = self.type_id.object_size() else {
            return Ok(());
        };
        let count = usize::from(self.num_objects());
        let aw = params.obj_addr_size();

        if self.is_sequence() {
            if !self.type_id.allows_sequence() {
                return Err(IecError::SeqOnIneligibleType(self.type_id.to_byte()));
            }
            let expect = aw + count * size;
            if self.payload.len() != expect {
                return Err(IecError::LengthMismatch {
                    expect,
                    got: self.payload.len(),
                });
            }
            let base = read_obj_addr(&self.payload, params);
            if count > 0 && u64::from(base) + count as u64 - 1 > u64::from(params.obj_addr_max()) {
                return Err(IecError::SeqAddrOverflow);
            }
        } else {
            let expect = count * (aw + size);
            if self.payload.len() != expect {
                return Err(IecError::LengthMismatch {
                    expect,
                    got: self.payload.len(),
                });
            }
        }
        Ok(())
    }

    /// Operator display form; renders each information object with its
    /// address, annotating structural damage instead of failing.
    pub fn display<'a>(&'a self, params: &'a SystemParams) -> AsduDisplay<'a> {
        AsduDisplay { asdu: self, params }
    }
}

/// Builder for well-formed ASDUs in either payload layout.
#[derive(Debug)]
pub struct AsduBuilder {
    params: SystemParams,
    asdu: Asdu,
    obj_size: usize,
    count: u8,
    sequence: bool,
}

impl AsduBuilder {
    /// Start an ASDU of `type_id`. Only types with a catalogued object size
    /// can be built.
    pub fn new(
        params: SystemParams,
        type_id: TypeId,
        cot: CauseOfTransmission,
        common_addr: u16,
    ) -> IecResult<Self> {
        params.check_common_addr(common_addr)?;
        let obj_size = type_id
            .object_size()
            .ok_or(IecError::UnknownTypeId(type_id.to_byte()))?;
        Ok(Self {
            params,
            asdu: Asdu::new(type_id, 0, cot, 0, common_addr, Vec::new()),
            obj_size,
            count: 0,
            sequence: false,
        })
    }

    pub fn originator(mut self, originator: u8) -> Self {
        self.asdu.originator = originator;
        self
    }

    /// Switch to the sequence layout starting at `base_addr`. Must precede
    /// any element; the type must permit sequence encoding.
    pub fn sequence(mut self, base_addr: u32) -> IecResult<Self> {
        if self.count > 0 || self.sequence {
            return Err(IecError::InvalidParam("sequence must be set up front"));
        }
        if !self.asdu.type_id.allows_sequence() {
            return Err(IecError::SeqOnIneligibleType(self.asdu.type_id.to_byte()));
        }
        self.params.check_obj_addr(base_addr)?;
        write_obj_addr(&mut self.asdu.payload, base_addr, &self.params);
        self.sequence = true;
        Ok(self)
    }

    /// Append one information object. In sequence mode `addr` must be the
    /// implicit next address; in addressed mode it is written out.
    pub fn object(mut self, addr: u32, element: &[u8]) -> IecResult<Self> {
        if element.len() != self.obj_size {
            return Err(IecError::LengthMismatch {
                expect: self.obj_size,
                got: element.len(),
            });
        }
        if self.count == 0x7F {
            return Err(IecError::InvalidParam("more than 127 objects"));
        }
        if self.sequence {
            let base = read_obj_addr(&self.asdu.payload, &self.params);
            let next = base + u32::from(self.count);
            if next > self.params.obj_addr_max() {
                return Err(IecError::SeqAddrOverflow);
            }
            if addr != next {
                return Err(IecError::InvalidParam("sequence address not contiguous"));
            }
        } else {
            self.params.check_obj_addr(addr)?;
            write_obj_addr(&mut self.asdu.payload, addr, &self.params);
        }
        self.asdu.payload.extend_from_slice(element);
        self.count += 1;

        let total = self.params.identifier_size() + self.asdu.payload.len();
        if total > ASDU_SIZE_MAX {
            return Err(IecError::PayloadTooLarge(total));
        }
        Ok(self)
    }

    pub fn build(mut self) -> Asdu {
        self.asdu.vsq = self.count | if self.sequence { VSQ_SEQ_FLAG } else { 0 };
        self.asdu
    }
}

/// Borrowing display adapter returned by [`Asdu::display`].
pub struct AsduDisplay<'a> {
    asdu: &'a Asdu,
    params: &'a SystemParams,
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl fmt::Display for AsduDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = self.asdu;
        write!(f, "{} {} ca={}", u.type_id, u.cot, u.common_addr)?;

        let Some(size) = u.type_id.object_size() else {
            f.write_str(" raw=")?;
            return write_hex(f, &u.payload);
        };

        let aw = self.params.obj_addr_size();
        let count = usize::from(u.num_objects());
        let mut rest = &u.payload[..];

        if u.is_sequence() {
            if rest.len() < aw {
                f.write_str(" ")?;
                write_hex(f, rest)?;
                return f.write_str("<EOF>");
            }
            let base = read_obj_addr(rest, self.params);
            rest = &rest[aw..];
            write!(f, " @{base}")?;
            for _ in 0..count {
                if rest.is_empty() {
                    break;
                }
                if rest.len() < size {
                    f.write_str(" ")?;
                    write_hex(f, rest)?;
                    return f.write_str("<EOF>");
                }
                f.write_str(" ")?;
                write_hex(f, &rest[..size])?;
                rest = &rest[size..];
            }
            let expect = aw + count * size;
            if u.payload.len() != expect {
                write!(f, " ({:+} octets)", u.payload.len() as i64 - expect as i64)?;
            }
        } else {
            for _ in 0..count {
                if rest.is_empty() {
                    break;
                }
                if rest.len() < aw + size {
                    f.write_str(" ")?;
                    write_hex(f, rest)?;
                    return f.write_str("<EOF>");
                }
                let addr = read_obj_addr(rest, self.params);
                write!(f, " {addr}:")?;
                write_hex(f, &rest[aw..aw + size])?;
                rest = &rest[aw + size..];
            }
            let expect = count * (aw + size);
            if u.payload.len() != expect {
                write!(f, " ({:+} octets)", u.payload.len() as i64 - expect as i64)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::common::Cause;

    use super::*;

    fn narrow() -> SystemParams {
        SystemParams::narrow()
    }

    #[test]
    fn decode_rejects_reserved_type() {
        let err = Asdu::decode(&[0x00, 0x01, 0x06, 0x01, 0x11, 0x01], &narrow());
        assert!(matches!(err, Err(IecError::ReservedType)));
    }

    #[test]
    fn decode_rejects_cause_zero() {
        let err = Asdu::decode(&[0x01, 0x01, 0x00, 0x01, 0x11, 0x01], &narrow());
        assert!(matches!(err, Err(IecError::IllegalCause(0))));
    }

    #[test]
    fn decode_rejects_common_addr_zero() {
        let err = Asdu::decode(&[0x01, 0x01, 0x06, 0x00, 0x11, 0x01], &narrow());
        assert!(matches!(err, Err(IecError::CommonAddrInvalid(0))));
    }

    #[test]
    fn round_trip_wide_identifier() {
        let params = SystemParams::wide();
        let u = Asdu::new(
            TypeId::MeasuredValueScaled,
            2,
            CauseOfTransmission::new(Cause::Spontaneous),
            42,
            0x1234,
            vec![1, 0, 0, 0x39, 0x30, 0, 2, 0, 0, 0xCF, 0xC7, 0],
        );
        let bytes = u.encode(&params).unwrap();
        let back = Asdu::decode(&bytes, &params).unwrap();
        assert_eq!(back, u);
        assert!(back.check_structure(&params).is_ok());
    }

    #[test]
    fn global_addr_maps_to_octet() {
        let u = AsduBuilder::new(
            narrow(),
            TypeId::InterrogationCommand,
            CauseOfTransmission::new(Cause::Activation),
            GLOBAL_COMMON_ADDR,
        )
        .unwrap()
        .object(0, &[20])
        .unwrap()
        .build();
        let bytes = u.encode(&narrow()).unwrap();
        assert_eq!(bytes, [0x64, 0x01, 0x06, 0xFF, 0x00, 0x14]);
        let back = Asdu::decode(&bytes, &narrow()).unwrap();
        assert_eq!(back.common_addr, GLOBAL_COMMON_ADDR);
    }

    #[test]
    fn sequence_overflow_rejected() {
        // Base 255 with two elements runs past the one-octet address space.
        let b = AsduBuilder::new(
            narrow(),
            TypeId::SinglePoint,
            CauseOfTransmission::new(Cause::Spontaneous),
            9,
        )
        .unwrap()
        .sequence(255)
        .unwrap()
        .object(255, &[0x01])
        .unwrap();
        assert!(matches!(
            b.object(256, &[0x00]),
            Err(IecError::SeqAddrOverflow)
        ));

        let u = Asdu::new(
            TypeId::SinglePoint,
            VSQ_SEQ_FLAG | 2,
            CauseOfTransmission::new(Cause::Spontaneous),
            0,
            9,
            vec![0xFF, 0x01, 0x00],
        );
        assert!(matches!(
            u.check_structure(&narrow()),
            Err(IecError::SeqAddrOverflow)
        ));
    }

    #[test]
    fn sequence_flag_on_command_rejected() {
        let u = Asdu::new(
            TypeId::SingleCommand,
            VSQ_SEQ_FLAG | 1,
            CauseOfTransmission::new(Cause::Activation),
            0,
            9,
            vec![0x11, 0x01],
        );
        assert!(matches!(
            u.check_structure(&narrow()),
            Err(IecError::SeqOnIneligibleType(45))
        ));
    }

    #[test]
    fn display_addressed_objects() {
        let u = Asdu::new(
            TypeId::SinglePoint,
            2,
            CauseOfTransmission::new(Cause::Spontaneous).with_test(),
            0,
            GLOBAL_COMMON_ADDR,
            vec![0x11, 0x31, 0x13, 0xC0],
        );
        assert_eq!(
            u.display(&narrow()).to_string(),
            "M_SP_NA_1 spont,test ca=65535 17:31 19:c0"
        );
    }

    #[test]
    fn display_sequence_objects() {
        let u = Asdu::new(
            TypeId::SinglePoint,
            VSQ_SEQ_FLAG | 2,
            CauseOfTransmission::new(Cause::Spontaneous),
            0,
            3,
            vec![0x11, 0x01, 0x00],
        );
        assert_eq!(u.display(&narrow()).to_string(), "M_SP_NA_1 spont ca=3 @17 01 00");
    }

    #[test]
    fn display_annotates_length_mismatch() {
        // Claims three objects but carries two and a half.
        let u = Asdu::new(
            TypeId::SinglePoint,
            3,
            CauseOfTransmission::new(Cause::Spontaneous),
            0,
            3,
            vec![0x11, 0x01, 0x13, 0x00, 0x15],
        );
        assert_eq!(
            u.display(&narrow()).to_string(),
            "M_SP_NA_1 spont ca=3 17:01 19:00 15<EOF>"
        );

        // Claims one object but carries two.
        let u = Asdu::new(
            TypeId::SinglePoint,
            1,
            CauseOfTransmission::new(Cause::Spontaneous),
            0,
            3,
            vec![0x11, 0x01, 0x13, 0x00],
        );
        assert_eq!(
            u.display(&narrow()).to_string(),
            "M_SP_NA_1 spont ca=3 17:01 (+2 octets)"
        );
    }
}

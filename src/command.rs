//! Control direction: typed construction of command ASDUs.
//!
//! Each builder method validates its value domain and produces an
//! activation-form ASDU ready for submission. The select flag lives in
//! bit 7 of the qualifier octet; its octet position within the information
//! object depends on the command type.

use crate::asdu::{Asdu, AsduBuilder, TypeId};
use crate::common::{
    Cause, CauseOfTransmission, SystemParams, GLOBAL_COMMON_ADDR, IRRELEVANT_OBJ_ADDR,
};
use crate::error::{IecError, IecResult};
use crate::information::{DoublePoint, Normal, SinglePoint};
use crate::time::{Cp16Time2a, Cp56Time2a};

/// Select/execute flag within a qualifier octet.
pub const SELECT_FLAG: u8 = 0x80;

/// Fixed test bit pattern of C_TS_NA_1.
pub const TEST_PATTERN: [u8; 2] = [0xAA, 0x55];

/// Qualifier of command (QOC): a 5-bit qualifier plus the select flag.
/// Packs above the 2-bit command state in one octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdQualifier {
    /// 0 = unspecified, 1 = short pulse, 2 = long pulse, 3 = persistent;
    /// values up to 31 are reserved ranges
    pub qualifier: u8,
    /// Select (true) before execute (false)
    pub select: bool,
}

impl CmdQualifier {
    pub fn new(qualifier: u8) -> IecResult<Self> {
        if qualifier > 31 {
            return Err(IecError::ValueOutOfDomain("command qualifier not in 0..=31"));
        }
        Ok(Self {
            qualifier,
            select: false,
        })
    }

    pub fn with_select(mut self) -> Self {
        self.select = true;
        self
    }

    fn pack(self, state: u8) -> u8 {
        let mut b = state | (self.qualifier << 2);
        if self.select {
            b |= SELECT_FLAG;
        }
        b
    }
}

/// Qualifier of set-point command (QOS): a 7-bit qualifier plus the select
/// flag, in its own octet after the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetpointQualifier {
    pub qualifier: u8,
    pub select: bool,
}

impl SetpointQualifier {
    pub fn new(qualifier: u8) -> IecResult<Self> {
        if qualifier > 127 {
            return Err(IecError::ValueOutOfDomain(
                "set-point qualifier not in 0..=127",
            ));
        }
        Ok(Self {
            qualifier,
            select: false,
        })
    }

    pub fn with_select(mut self) -> Self {
        self.select = true;
        self
    }

    fn pack(self) -> u8 {
        let mut b = self.qualifier;
        if self.select {
            b |= SELECT_FLAG;
        }
        b
    }
}

/// Direction of a regulating step command (RCS). 0 and 3 are not permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegulatingStep {
    Lower = 1,
    Higher = 2,
}

/// Interrogation scope (QOI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterrogationGroup {
    /// Station interrogation (global)
    Global,
    /// Group interrogation, 1..=16
    Group(u8),
}

impl InterrogationGroup {
    fn qoi(self) -> IecResult<u8> {
        match self {
            Self::Global => Ok(20),
            Self::Group(g) if (1..=16).contains(&g) => Ok(20 + g),
            Self::Group(_) => Err(IecError::ValueOutOfDomain("interrogation group not in 1..=16")),
        }
    }
}

/// Counter interrogation request qualifier (QCC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterQualifier {
    /// RQT: 0 = no request, 1..=4 group, 5 = general
    pub request: u8,
    /// FRZ: 0 = read, 1 = freeze, 2 = freeze and reset, 3 = reset
    pub freeze: u8,
}

impl CounterQualifier {
    /// General counter request, plain read.
    pub fn general() -> Self {
        Self {
            request: 5,
            freeze: 0,
        }
    }

    fn pack(self) -> IecResult<u8> {
        if self.request > 63 {
            return Err(IecError::ValueOutOfDomain("counter request not in 0..=63"));
        }
        if self.freeze > 3 {
            return Err(IecError::ValueOutOfDomain("counter freeze not in 0..=3"));
        }
        Ok(self.request | (self.freeze << 6))
    }
}

/// Builds activation-form command ASDUs for one common address and
/// originator under fixed system parameters.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    params: SystemParams,
    common_addr: u16,
    originator: u8,
}

impl CommandBuilder {
    pub fn new(params: SystemParams, common_addr: u16, originator: u8) -> IecResult<Self> {
        params.check_common_addr(common_addr)?;
        Ok(Self {
            params,
            common_addr,
            originator,
        })
    }

    /// The global common address serves interrogation, counter
    /// interrogation, clock synchronization and reset process only.
    fn check_global(&self, type_id: TypeId) -> IecResult<()> {
        if self.common_addr == GLOBAL_COMMON_ADDR
            && !matches!(
                type_id,
                TypeId::InterrogationCommand
                    | TypeId::CounterInterrogationCommand
                    | TypeId::ClockSyncCommand
                    | TypeId::ResetProcessCommand
            )
        {
            return Err(IecError::GlobalAddrNotAllowed(type_id.to_byte()));
        }
        Ok(())
    }

    fn build(&self, type_id: TypeId, cause: Cause, addr: u32, element: &[u8]) -> IecResult<Asdu> {
        self.check_global(type_id)?;
        let asdu = AsduBuilder::new(
            self.params,
            type_id,
            CauseOfTransmission::new(cause),
            self.common_addr,
        )?
        .originator(self.originator)
        .object(addr, element)?
        .build();
        Ok(asdu)
    }

    /// C_SC_NA_1 single command.
    pub fn single(&self, addr: u32, value: SinglePoint, q: CmdQualifier) -> IecResult<Asdu> {
        self.build(TypeId::SingleCommand, Cause::Activation, addr, &[q.pack(value as u8)])
    }

    /// C_SC_TA_1 single command with time tag.
    pub fn single_at(
        &self,
        addr: u32,
        value: SinglePoint,
        q: CmdQualifier,
        time: Cp56Time2a,
    ) -> IecResult<Asdu> {
        let mut element = vec![q.pack(value as u8)];
        element.extend_from_slice(&time.to_bytes());
        self.build(TypeId::SingleCommandWithTime, Cause::Activation, addr, &element)
    }

    /// C_DC_NA_1 double command. All four point states are encodable; the
    /// controlled station decides what it accepts.
    pub fn double(&self, addr: u32, value: DoublePoint, q: CmdQualifier) -> IecResult<Asdu> {
        self.build(TypeId::DoubleCommand, Cause::Activation, addr, &[q.pack(value as u8)])
    }

    /// C_DC_TA_1 double command with time tag.
    pub fn double_at(
        &self,
        addr: u32,
        value: DoublePoint,
        q: CmdQualifier,
        time: Cp56Time2a,
    ) -> IecResult<Asdu> {
        let mut element = vec![q.pack(value as u8)];
        element.extend_from_slice(&time.to_bytes());
        self.build(TypeId::DoubleCommandWithTime, Cause::Activation, addr, &element)
    }

    /// C_RC_NA_1 regulating step command.
    pub fn regulating(&self, addr: u32, step: RegulatingStep, q: CmdQualifier) -> IecResult<Asdu> {
        self.build(
            TypeId::RegulatingStepCommand,
            Cause::Activation,
            addr,
            &[q.pack(step as u8)],
        )
    }

    /// C_RC_TA_1 regulating step command with time tag.
    pub fn regulating_at(
        &self,
        addr: u32,
        step: RegulatingStep,
        q: CmdQualifier,
        time: Cp56Time2a,
    ) -> IecResult<Asdu> {
        let mut element = vec![q.pack(step as u8)];
        element.extend_from_slice(&time.to_bytes());
        self.build(
            TypeId::RegulatingStepCommandWithTime,
            Cause::Activation,
            addr,
            &element,
        )
    }

    /// C_SE_NA_1 set-point command, normalized value.
    pub fn setpoint_normal(&self, addr: u32, value: Normal, q: SetpointQualifier) -> IecResult<Asdu> {
        let mut element = value.to_bytes().to_vec();
        element.push(q.pack());
        self.build(TypeId::SetpointCommandNormal, Cause::Activation, addr, &element)
    }

    /// C_SE_TA_1 set-point command, normalized value, with time tag.
    pub fn setpoint_normal_at(
        &self,
        addr: u32,
        value: Normal,
        q: SetpointQualifier,
        time: Cp56Time2a,
    ) -> IecResult<Asdu> {
        let mut element = value.to_bytes().to_vec();
        element.push(q.pack());
        element.extend_from_slice(&time.to_bytes());
        self.build(
            TypeId::SetpointCommandNormalWithTime,
            Cause::Activation,
            addr,
            &element,
        )
    }

    /// C_SE_NB_1 set-point command, scaled value.
    pub fn setpoint_scaled(&self, addr: u32, value: i16, q: SetpointQualifier) -> IecResult<Asdu> {
        let mut element = value.to_le_bytes().to_vec();
        element.push(q.pack());
        self.build(TypeId::SetpointCommandScaled, Cause::Activation, addr, &element)
    }

    /// C_SE_TB_1 set-point command, scaled value, with time tag.
    pub fn setpoint_scaled_at(
        &self,
        addr: u32,
        value: i16,
        q: SetpointQualifier,
        time: Cp56Time2a,
    ) -> IecResult<Asdu> {
        let mut element = value.to_le_bytes().to_vec();
        element.push(q.pack());
        element.extend_from_slice(&time.to_bytes());
        self.build(
            TypeId::SetpointCommandScaledWithTime,
            Cause::Activation,
            addr,
            &element,
        )
    }

    /// C_SE_NC_1 set-point command, short floating point.
    pub fn setpoint_float(&self, addr: u32, value: f32, q: SetpointQualifier) -> IecResult<Asdu> {
        let mut element = value.to_le_bytes().to_vec();
        element.push(q.pack());
        self.build(TypeId::SetpointCommandFloat, Cause::Activation, addr, &element)
    }

    /// C_SE_TC_1 set-point command, short floating point, with time tag.
    pub fn setpoint_float_at(
        &self,
        addr: u32,
        value: f32,
        q: SetpointQualifier,
        time: Cp56Time2a,
    ) -> IecResult<Asdu> {
        let mut element = value.to_le_bytes().to_vec();
        element.push(q.pack());
        element.extend_from_slice(&time.to_bytes());
        self.build(
            TypeId::SetpointCommandFloatWithTime,
            Cause::Activation,
            addr,
            &element,
        )
    }

    /// C_BO_NA_1 bit string command. Carries no select phase.
    pub fn bits(&self, addr: u32, bits: u32) -> IecResult<Asdu> {
        self.build(
            TypeId::Bitstring32Command,
            Cause::Activation,
            addr,
            &bits.to_be_bytes(),
        )
    }

    /// C_IC_NA_1 station or group interrogation.
    pub fn interrogation(&self, group: InterrogationGroup) -> IecResult<Asdu> {
        self.build(
            TypeId::InterrogationCommand,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &[group.qoi()?],
        )
    }

    /// C_CI_NA_1 counter interrogation.
    pub fn counter_interrogation(&self, q: CounterQualifier) -> IecResult<Asdu> {
        self.build(
            TypeId::CounterInterrogationCommand,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &[q.pack()?],
        )
    }

    /// C_RD_NA_1 read request for one information object.
    pub fn read(&self, addr: u32) -> IecResult<Asdu> {
        self.build(TypeId::ReadCommand, Cause::Request, addr, &[])
    }

    /// C_CS_NA_1 clock synchronization.
    pub fn clock_sync(&self, time: Cp56Time2a) -> IecResult<Asdu> {
        self.build(
            TypeId::ClockSyncCommand,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &time.to_bytes(),
        )
    }

    /// C_TS_NA_1 test command with the fixed bit pattern.
    pub fn test(&self) -> IecResult<Asdu> {
        self.build(
            TypeId::TestCommand,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &TEST_PATTERN,
        )
    }

    /// C_TS_TA_1 test command with a sequence counter and time tag.
    pub fn test_at(&self, counter: u16, time: Cp56Time2a) -> IecResult<Asdu> {
        let mut element = counter.to_le_bytes().to_vec();
        element.extend_from_slice(&time.to_bytes());
        self.build(
            TypeId::TestCommandWithTime,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &element,
        )
    }

    /// C_RP_NA_1 reset process command. 1 = general reset, 2 = reset of
    /// pending time-tagged information.
    pub fn reset_process(&self, qrp: u8) -> IecResult<Asdu> {
        if !(1..=2).contains(&qrp) {
            return Err(IecError::ValueOutOfDomain("reset qualifier not in {1,2}"));
        }
        self.build(
            TypeId::ResetProcessCommand,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &[qrp],
        )
    }

    /// C_CD_NA_1 delay acquisition.
    pub fn delay_acquisition(&self, delay: Cp16Time2a) -> IecResult<Asdu> {
        self.build(
            TypeId::DelayAcquisitionCommand,
            Cause::Activation,
            IRRELEVANT_OBJ_ADDR,
            &delay.to_bytes(),
        )
    }
}

/// Octet offset of the select flag within an information object body (the
/// element after the address), when the type has a select phase at all.
/// Single, double and regulating commands carry it in the first octet;
/// set-points carry it after the value.
pub fn select_flag_offset(type_id: TypeId) -> Option<usize> {
    match type_id {
        TypeId::SingleCommand
        | TypeId::DoubleCommand
        | TypeId::RegulatingStepCommand
        | TypeId::SingleCommandWithTime
        | TypeId::DoubleCommandWithTime
        | TypeId::RegulatingStepCommandWithTime => Some(0),
        TypeId::SetpointCommandNormal
        | TypeId::SetpointCommandScaled
        | TypeId::SetpointCommandNormalWithTime
        | TypeId::SetpointCommandScaledWithTime => Some(2),
        TypeId::SetpointCommandFloat | TypeId::SetpointCommandFloatWithTime => Some(4),
        _ => None,
    }
}

/// Whether a serialized command object carries the select flag, given the
/// full payload of a single-object ASDU.
pub fn is_select(params: &SystemParams, type_id: TypeId, payload: &[u8]) -> bool {
    let Some(offset) = select_flag_offset(type_id) else {
        return false;
    };
    payload
        .get(params.obj_addr_size() + offset)
        .is_some_and(|b| b & SELECT_FLAG != 0)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn builder() -> CommandBuilder {
        CommandBuilder::new(SystemParams::narrow(), 9, 0).unwrap()
    }

    #[test]
    fn single_command_bytes() {
        let u = builder()
            .single(17, SinglePoint::On, CmdQualifier::new(1).unwrap())
            .unwrap();
        assert_eq!(u.encode(&SystemParams::narrow()).unwrap(), [
            0x2D, 0x01, 0x06, 0x09, 0x11, 0x05,
        ]);
    }

    #[test]
    fn select_flag_set_and_found() {
        let q = CmdQualifier::new(0).unwrap().with_select();
        let u = builder().single(17, SinglePoint::Off, q).unwrap();
        assert!(is_select(&SystemParams::narrow(), u.type_id, &u.payload));

        let exec = builder()
            .single(17, SinglePoint::Off, CmdQualifier::new(0).unwrap())
            .unwrap();
        assert!(!is_select(&SystemParams::narrow(), exec.type_id, &exec.payload));
    }

    #[test]
    fn setpoint_select_sits_after_value() {
        let q = SetpointQualifier::new(0).unwrap().with_select();
        let u = builder().setpoint_float(5, 1.5, q).unwrap();
        // addr, 4 value octets, QOS
        assert_eq!(u.payload.len(), 6);
        assert_eq!(u.payload[5], SELECT_FLAG);
        assert!(is_select(&SystemParams::narrow(), u.type_id, &u.payload));
    }

    #[test]
    fn domains_enforced() {
        assert!(CmdQualifier::new(32).is_err());
        assert!(SetpointQualifier::new(128).is_err());
        assert!(builder().reset_process(3).is_err());
        assert!(InterrogationGroup::Group(17).qoi().is_err());
    }

    #[test]
    fn double_command_covers_all_states() {
        for state in [
            DoublePoint::Indeterminate,
            DoublePoint::DeterminedOff,
            DoublePoint::DeterminedOn,
            DoublePoint::IndeterminateHigh,
        ] {
            let u = builder().double(1, state, CmdQualifier::default()).unwrap();
            assert_eq!(u.payload[1] & 0x03, state as u8);
        }
    }

    #[test]
    fn global_addr_restricted() {
        let b = CommandBuilder::new(SystemParams::narrow(), GLOBAL_COMMON_ADDR, 0).unwrap();
        assert!(b.interrogation(InterrogationGroup::Global).is_ok());
        assert!(b.clock_sync(Cp56Time2a::from_bytes([0; 7])).is_ok());
        assert!(matches!(
            b.single(1, SinglePoint::On, CmdQualifier::default()),
            Err(IecError::GlobalAddrNotAllowed(45))
        ));
    }

    #[test]
    fn test_command_pattern() {
        let u = builder().test().unwrap();
        assert_eq!(u.payload, vec![0x00, 0xAA, 0x55]);
    }

    #[test]
    fn interrogation_group_codes() {
        assert_eq!(InterrogationGroup::Global.qoi().unwrap(), 20);
        assert_eq!(InterrogationGroup::Group(16).qoi().unwrap(), 36);
    }
}

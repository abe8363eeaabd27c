//! Monitor direction dispatch: walk an inbound ASDU's payload and hand each
//! information object to the matching handler callback.
//!
//! The input is untrusted network data. The payload structure is validated
//! against the type catalogue before any callback runs; a malformed body
//! yields a structural error and no callback at all.

use crate::asdu::{read_obj_addr, Asdu, TypeId};
use crate::common::{Quality, SystemParams};
use crate::error::IecResult;
use crate::information::{
    Bits32, Counter, DoublePoint, EventState, InitCause, Normal, OutCircuit, SinglePoint, StartEvents,
    StepPos,
};
use crate::time::{Cp16Time2a, Cp24Time2a, Cp56Time2a};

/// Receiver of monitor-direction information objects. Every method has a
/// no-op default; implement the ones the application cares about.
///
/// One inbound ASDU invokes exactly one callback per information object, in
/// encoded order. Types this implementation has no structure for go to
/// [`MonitorHandler::unhandled`] once, payload intact.
#[allow(unused_variables)]
pub trait MonitorHandler {
    fn single_point(&mut self, u: &Asdu, addr: u32, pt: SinglePoint, q: Quality) {}
    fn single_point_cp24(&mut self, u: &Asdu, addr: u32, pt: SinglePoint, q: Quality, t: Cp24Time2a) {}
    fn single_point_cp56(&mut self, u: &Asdu, addr: u32, pt: SinglePoint, q: Quality, t: Cp56Time2a) {}

    fn double_point(&mut self, u: &Asdu, addr: u32, pt: DoublePoint, q: Quality) {}
    fn double_point_cp24(&mut self, u: &Asdu, addr: u32, pt: DoublePoint, q: Quality, t: Cp24Time2a) {}
    fn double_point_cp56(&mut self, u: &Asdu, addr: u32, pt: DoublePoint, q: Quality, t: Cp56Time2a) {}

    fn step_position(&mut self, u: &Asdu, addr: u32, pos: StepPos, q: Quality) {}
    fn step_position_cp24(&mut self, u: &Asdu, addr: u32, pos: StepPos, q: Quality, t: Cp24Time2a) {}
    fn step_position_cp56(&mut self, u: &Asdu, addr: u32, pos: StepPos, q: Quality, t: Cp56Time2a) {}

    fn bitstring(&mut self, u: &Asdu, addr: u32, bits: Bits32, q: Quality) {}
    fn bitstring_cp24(&mut self, u: &Asdu, addr: u32, bits: Bits32, q: Quality, t: Cp24Time2a) {}
    fn bitstring_cp56(&mut self, u: &Asdu, addr: u32, bits: Bits32, q: Quality, t: Cp56Time2a) {}

    fn normal(&mut self, u: &Asdu, addr: u32, value: Normal, q: Quality) {}
    fn normal_cp24(&mut self, u: &Asdu, addr: u32, value: Normal, q: Quality, t: Cp24Time2a) {}
    fn normal_cp56(&mut self, u: &Asdu, addr: u32, value: Normal, q: Quality, t: Cp56Time2a) {}
    /// M_ME_ND_1: normalized value carrying no quality descriptor.
    fn normal_no_quality(&mut self, u: &Asdu, addr: u32, value: Normal) {}

    fn scaled(&mut self, u: &Asdu, addr: u32, value: i16, q: Quality) {}
    fn scaled_cp24(&mut self, u: &Asdu, addr: u32, value: i16, q: Quality, t: Cp24Time2a) {}
    fn scaled_cp56(&mut self, u: &Asdu, addr: u32, value: i16, q: Quality, t: Cp56Time2a) {}

    fn float(&mut self, u: &Asdu, addr: u32, value: f32, q: Quality) {}
    fn float_cp24(&mut self, u: &Asdu, addr: u32, value: f32, q: Quality, t: Cp24Time2a) {}
    fn float_cp56(&mut self, u: &Asdu, addr: u32, value: f32, q: Quality, t: Cp56Time2a) {}

    fn integrated_totals(&mut self, u: &Asdu, addr: u32, counter: Counter) {}
    fn integrated_totals_cp24(&mut self, u: &Asdu, addr: u32, counter: Counter, t: Cp24Time2a) {}
    fn integrated_totals_cp56(&mut self, u: &Asdu, addr: u32, counter: Counter, t: Cp56Time2a) {}

    fn protection_event(&mut self, u: &Asdu, addr: u32, event: EventState, q: Quality, elapsed: Cp16Time2a) {
    }
    fn protection_event_cp56(
        &mut self,
        u: &Asdu,
        addr: u32,
        event: EventState,
        q: Quality,
        elapsed: Cp16Time2a,
        t: Cp56Time2a,
    ) {
    }

    fn protection_start(
        &mut self,
        u: &Asdu,
        addr: u32,
        events: StartEvents,
        q: Quality,
        duration: Cp16Time2a,
    ) {
    }
    fn protection_start_cp56(
        &mut self,
        u: &Asdu,
        addr: u32,
        events: StartEvents,
        q: Quality,
        duration: Cp16Time2a,
        t: Cp56Time2a,
    ) {
    }

    fn protection_out(
        &mut self,
        u: &Asdu,
        addr: u32,
        circuits: OutCircuit,
        q: Quality,
        operating: Cp16Time2a,
    ) {
    }
    fn protection_out_cp56(
        &mut self,
        u: &Asdu,
        addr: u32,
        circuits: OutCircuit,
        q: Quality,
        operating: Cp16Time2a,
        t: Cp56Time2a,
    ) {
    }

    /// M_PS_NA_1: packed single points with status change detection.
    fn packed_single_point(&mut self, u: &Asdu, addr: u32, scd: Bits32, q: Quality) {}

    /// M_EI_NA_1: the controlled station finished (re)initialization.
    fn init_end(&mut self, u: &Asdu, addr: u32, cause: InitCause) {}

    /// Any type this implementation knows no structure for, or that does
    /// not belong to the monitor direction. The raw payload stays on `u`.
    fn unhandled(&mut self, u: &Asdu) {}
}

/// Walk `u`'s information objects and invoke `handler` once per object.
///
/// Fails without any callback when the payload length does not match the
/// variable structure qualifier, when the sequence flag sits on an
/// ineligible type, or when a sequence would overflow the address width.
pub fn dispatch<H: MonitorHandler>(
    params: &SystemParams,
    u: &Asdu,
    handler: &mut H,
) -> IecResult<()> {
    let Some(size) = u.type_id.object_size() else {
        handler.unhandled(u);
        return Ok(());
    };
    if !is_monitor_type(u.type_id) {
        u.check_structure(params)?;
        handler.unhandled(u);
        return Ok(());
    }
    u.check_structure(params)?;

    let aw = params.obj_addr_size();
    let count = usize::from(u.num_objects());

    if u.is_sequence() {
        let base = read_obj_addr(&u.payload, params);
        let elements = &u.payload[aw..];
        for (i, element) in elements.chunks_exact(size).take(count).enumerate() {
            dispatch_element(u, base + i as u32, element, handler);
        }
    } else {
        for chunk in u.payload.chunks_exact(aw + size).take(count) {
            let addr = read_obj_addr(chunk, params);
            dispatch_element(u, addr, &chunk[aw..], handler);
        }
    }
    Ok(())
}

fn is_monitor_type(t: TypeId) -> bool {
    matches!(t.to_byte(), 1..=21 | 30..=40 | 70)
}

fn cp24(b: &[u8]) -> Cp24Time2a {
    Cp24Time2a::from_bytes([b[0], b[1], b[2]])
}

fn cp56(b: &[u8]) -> Cp56Time2a {
    Cp56Time2a::from_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6]])
}

/// `element` is exactly `object_size` octets; guaranteed by the structure
/// check in [`dispatch`].
fn dispatch_element<H: MonitorHandler>(u: &Asdu, addr: u32, b: &[u8], h: &mut H) {
    match u.type_id {
        TypeId::SinglePoint => {
            let (pt, q) = SinglePoint::from_siq(b[0]);
            h.single_point(u, addr, pt, q);
        }
        TypeId::SinglePointWithTime => {
            let (pt, q) = SinglePoint::from_siq(b[0]);
            h.single_point_cp24(u, addr, pt, q, cp24(&b[1..]));
        }
        TypeId::SinglePointWithTime56 => {
            let (pt, q) = SinglePoint::from_siq(b[0]);
            h.single_point_cp56(u, addr, pt, q, cp56(&b[1..]));
        }
        TypeId::DoublePoint => {
            let (pt, q) = DoublePoint::from_diq(b[0]);
            h.double_point(u, addr, pt, q);
        }
        TypeId::DoublePointWithTime => {
            let (pt, q) = DoublePoint::from_diq(b[0]);
            h.double_point_cp24(u, addr, pt, q, cp24(&b[1..]));
        }
        TypeId::DoublePointWithTime56 => {
            let (pt, q) = DoublePoint::from_diq(b[0]);
            h.double_point_cp56(u, addr, pt, q, cp56(&b[1..]));
        }
        TypeId::StepPosition => {
            h.step_position(u, addr, StepPos::from_byte(b[0]), Quality::from_byte(b[1]));
        }
        TypeId::StepPositionWithTime => {
            h.step_position_cp24(
                u,
                addr,
                StepPos::from_byte(b[0]),
                Quality::from_byte(b[1]),
                cp24(&b[2..]),
            );
        }
        TypeId::StepPositionWithTime56 => {
            h.step_position_cp56(
                u,
                addr,
                StepPos::from_byte(b[0]),
                Quality::from_byte(b[1]),
                cp56(&b[2..]),
            );
        }
        TypeId::Bitstring32 => {
            let bits = Bits32::from_bytes([b[0], b[1], b[2], b[3]]);
            h.bitstring(u, addr, bits, Quality::from_byte(b[4]));
        }
        TypeId::Bitstring32WithTime => {
            let bits = Bits32::from_bytes([b[0], b[1], b[2], b[3]]);
            h.bitstring_cp24(u, addr, bits, Quality::from_byte(b[4]), cp24(&b[5..]));
        }
        TypeId::Bitstring32WithTime56 => {
            let bits = Bits32::from_bytes([b[0], b[1], b[2], b[3]]);
            h.bitstring_cp56(u, addr, bits, Quality::from_byte(b[4]), cp56(&b[5..]));
        }
        TypeId::MeasuredValueNormal => {
            let v = Normal::from_bytes([b[0], b[1]]);
            h.normal(u, addr, v, Quality::from_byte(b[2]));
        }
        TypeId::MeasuredValueNormalWithTime => {
            let v = Normal::from_bytes([b[0], b[1]]);
            h.normal_cp24(u, addr, v, Quality::from_byte(b[2]), cp24(&b[3..]));
        }
        TypeId::MeasuredValueNormalWithTime56 => {
            let v = Normal::from_bytes([b[0], b[1]]);
            h.normal_cp56(u, addr, v, Quality::from_byte(b[2]), cp56(&b[3..]));
        }
        TypeId::MeasuredValueNormalNoQuality => {
            h.normal_no_quality(u, addr, Normal::from_bytes([b[0], b[1]]));
        }
        TypeId::MeasuredValueScaled => {
            let v = i16::from_le_bytes([b[0], b[1]]);
            h.scaled(u, addr, v, Quality::from_byte(b[2]));
        }
        TypeId::MeasuredValueScaledWithTime => {
            let v = i16::from_le_bytes([b[0], b[1]]);
            h.scaled_cp24(u, addr, v, Quality::from_byte(b[2]), cp24(&b[3..]));
        }
        TypeId::MeasuredValueScaledWithTime56 => {
            let v = i16::from_le_bytes([b[0], b[1]]);
            h.scaled_cp56(u, addr, v, Quality::from_byte(b[2]), cp56(&b[3..]));
        }
        TypeId::MeasuredValueFloat => {
            let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            h.float(u, addr, v, Quality::from_byte(b[4]));
        }
        TypeId::MeasuredValueFloatWithTime => {
            let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            h.float_cp24(u, addr, v, Quality::from_byte(b[4]), cp24(&b[5..]));
        }
        TypeId::MeasuredValueFloatWithTime56 => {
            let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            h.float_cp56(u, addr, v, Quality::from_byte(b[4]), cp56(&b[5..]));
        }
        TypeId::IntegratedTotals => {
            h.integrated_totals(u, addr, Counter::from_bytes([b[0], b[1], b[2], b[3], b[4]]));
        }
        TypeId::IntegratedTotalsWithTime => {
            let c = Counter::from_bytes([b[0], b[1], b[2], b[3], b[4]]);
            h.integrated_totals_cp24(u, addr, c, cp24(&b[5..]));
        }
        TypeId::IntegratedTotalsWithTime56 => {
            let c = Counter::from_bytes([b[0], b[1], b[2], b[3], b[4]]);
            h.integrated_totals_cp56(u, addr, c, cp56(&b[5..]));
        }
        TypeId::ProtectionEvent => {
            let (ev, q) = EventState::from_sep(b[0]);
            h.protection_event(u, addr, ev, q, Cp16Time2a::from_bytes([b[1], b[2]]));
        }
        TypeId::ProtectionEventWithTime56 => {
            let (ev, q) = EventState::from_sep(b[0]);
            h.protection_event_cp56(u, addr, ev, q, Cp16Time2a::from_bytes([b[1], b[2]]), cp56(&b[3..]));
        }
        TypeId::ProtectionStartEvents => {
            let events = StartEvents::from_byte(b[0]);
            let q = Quality::from_byte(b[1]);
            h.protection_start(u, addr, events, q, Cp16Time2a::from_bytes([b[2], b[3]]));
        }
        TypeId::ProtectionStartEventsWithTime56 => {
            let events = StartEvents::from_byte(b[0]);
            let q = Quality::from_byte(b[1]);
            h.protection_start_cp56(u, addr, events, q, Cp16Time2a::from_bytes([b[2], b[3]]), cp56(&b[4..]));
        }
        TypeId::ProtectionOutCircuit => {
            let circuits = OutCircuit::from_byte(b[0]);
            let q = Quality::from_byte(b[1]);
            h.protection_out(u, addr, circuits, q, Cp16Time2a::from_bytes([b[2], b[3]]));
        }
        TypeId::ProtectionOutCircuitWithTime56 => {
            let circuits = OutCircuit::from_byte(b[0]);
            let q = Quality::from_byte(b[1]);
            h.protection_out_cp56(u, addr, circuits, q, Cp16Time2a::from_bytes([b[2], b[3]]), cp56(&b[4..]));
        }
        TypeId::PackedSinglePointWithScd => {
            let scd = Bits32::from_bytes([b[0], b[1], b[2], b[3]]);
            h.packed_single_point(u, addr, scd, Quality::from_byte(b[4]));
        }
        TypeId::EndOfInitialization => {
            h.init_end(u, addr, InitCause::from_byte(b[0]));
        }
        // Remaining catalogue entries are not monitor types; filtered out
        // before dispatch.
        _ => h.unhandled(u),
    }
}

#[cfg(test)]
mod tests {
    use crate::common::{Cause, CauseOfTransmission};
    use crate::error::IecError;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        singles: Vec<(u32, SinglePoint, u8)>,
        floats: Vec<(u32, f32, u8)>,
        starts: Vec<(u32, u8, u16)>,
        unhandled: usize,
    }

    impl MonitorHandler for Recorder {
        fn single_point(&mut self, _u: &Asdu, addr: u32, pt: SinglePoint, q: Quality) {
            self.singles.push((addr, pt, q.to_byte()));
        }

        fn float(&mut self, _u: &Asdu, addr: u32, value: f32, q: Quality) {
            self.floats.push((addr, value, q.to_byte()));
        }

        fn protection_start(
            &mut self,
            _u: &Asdu,
            addr: u32,
            events: StartEvents,
            _q: Quality,
            duration: Cp16Time2a,
        ) {
            self.starts.push((addr, events.to_byte(), duration.millis()));
        }

        fn unhandled(&mut self, _u: &Asdu) {
            self.unhandled += 1;
        }
    }

    fn narrow() -> SystemParams {
        SystemParams::narrow()
    }

    fn spont() -> CauseOfTransmission {
        CauseOfTransmission::new(Cause::Spontaneous)
    }

    #[test]
    fn addressed_single_points() {
        let u = Asdu::new(TypeId::SinglePoint, 2, spont(), 0, 3, vec![17, 0x31, 19, 0xC0]);
        let mut r = Recorder::default();
        dispatch(&narrow(), &u, &mut r).unwrap();
        assert_eq!(
            r.singles,
            vec![(17, SinglePoint::On, 0x30), (19, SinglePoint::Off, 0xC0)]
        );
    }

    #[test]
    fn sequence_yields_incrementing_addresses() {
        let u = Asdu::new(
            TypeId::SinglePoint,
            0x83,
            spont(),
            0,
            3,
            vec![40, 0x01, 0x00, 0x01],
        );
        let mut r = Recorder::default();
        dispatch(&narrow(), &u, &mut r).unwrap();
        let addrs: Vec<u32> = r.singles.iter().map(|s| s.0).collect();
        assert_eq!(addrs, vec![40, 41, 42]);
    }

    #[test]
    fn length_mismatch_invokes_nothing() {
        let u = Asdu::new(TypeId::SinglePoint, 2, spont(), 0, 3, vec![17, 0x31, 19]);
        let mut r = Recorder::default();
        let err = dispatch(&narrow(), &u, &mut r);
        assert!(matches!(err, Err(IecError::LengthMismatch { .. })));
        assert!(r.singles.is_empty());
        assert_eq!(r.unhandled, 0);
    }

    #[test]
    fn sequence_on_time_tagged_type_rejected() {
        let u = Asdu::new(
            TypeId::SinglePointWithTime,
            0x81,
            spont(),
            0,
            3,
            vec![17, 0x01, 0x0B, 0x0C, 0x0D],
        );
        let mut r = Recorder::default();
        assert!(matches!(
            dispatch(&narrow(), &u, &mut r),
            Err(IecError::SeqOnIneligibleType(2))
        ));
    }

    #[test]
    fn protection_start_objects_stay_aligned() {
        // Two objects of SPE + QDP + CP16 each; a wrong object size would
        // pull the second address out of the first object's tail.
        let u = Asdu::new(
            TypeId::ProtectionStartEvents,
            2,
            spont(),
            0,
            3,
            vec![5, 0x03, 0x00, 0xE8, 0x03, 6, 0x01, 0x10, 0x64, 0x00],
        );
        let mut r = Recorder::default();
        dispatch(&narrow(), &u, &mut r).unwrap();
        assert_eq!(r.starts, vec![(5, 0x03, 1000), (6, 0x01, 100)]);
    }

    #[test]
    fn unknown_structure_goes_raw() {
        let u = Asdu::new(TypeId::FileReady, 1, spont(), 0, 3, vec![1, 2, 3]);
        let mut r = Recorder::default();
        dispatch(&narrow(), &u, &mut r).unwrap();
        assert_eq!(r.unhandled, 1);
    }

    #[test]
    fn float_objects() {
        let mut payload = vec![16];
        payload.extend_from_slice(&99.0f32.to_le_bytes());
        payload.push(0x81);
        let u = Asdu::new(TypeId::MeasuredValueFloat, 1, spont(), 0, 3, payload);
        let mut r = Recorder::default();
        dispatch(&narrow(), &u, &mut r).unwrap();
        assert_eq!(r.floats, vec![(16, 99.0, 0x81)]);
    }

    #[test]
    fn arbitrary_header_values_never_panic() {
        // Brute force the count and flag space over a short junk payload.
        let payload = vec![0xAA; 13];
        for vsq in 0..=255u8 {
            for type_byte in [1u8, 2, 5, 7, 13, 15, 17, 21, 30, 36, 45, 70, 100, 120] {
                let Ok(type_id) = TypeId::try_from(type_byte) else {
                    continue;
                };
                let u = Asdu::new(type_id, vsq, spont(), 0, 3, payload.clone());
                let mut r = Recorder::default();
                let _ = dispatch(&narrow(), &u, &mut r);
            }
        }
    }
}

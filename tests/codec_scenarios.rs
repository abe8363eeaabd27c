//! End-to-end codec scenarios over concrete wire captures.

use pretty_assertions::assert_eq;

use iec60870::asdu::{Asdu, AsduBuilder, TypeId};
use iec60870::common::{
    Cause, CauseOfTransmission, CommonAddrSize, CotSize, InfoObjAddrSize, Quality, SystemParams,
    GLOBAL_COMMON_ADDR,
};
use iec60870::information::{Normal, SinglePoint};
use iec60870::monitor::{self, MonitorHandler};

fn narrow() -> SystemParams {
    SystemParams::narrow()
}

fn wide() -> SystemParams {
    SystemParams {
        cot_size: CotSize::TwoOctets,
        common_size: CommonAddrSize::TwoOctets,
        obj_size: InfoObjAddrSize::ThreeOctets,
    }
}

fn spont_test() -> CauseOfTransmission {
    CauseOfTransmission::new(Cause::Spontaneous).with_test()
}

#[test]
fn narrow_single_points_with_quality() {
    let q1 = Quality::new(Quality::BLOCKED | Quality::SUBSTITUTED);
    let q2 = Quality::new(Quality::NOT_TOPICAL | Quality::INVALID);
    let u = AsduBuilder::new(narrow(), TypeId::SinglePoint, spont_test(), GLOBAL_COMMON_ADDR)
        .unwrap()
        .object(17, &[SinglePoint::On.to_siq(q1)])
        .unwrap()
        .object(19, &[SinglePoint::Off.to_siq(q2)])
        .unwrap()
        .build();

    let bytes = u.encode(&narrow()).unwrap();
    assert_eq!(bytes, [0x01, 0x02, 0x83, 0xFF, 0x11, 0x31, 0x13, 0xC0]);

    let back = Asdu::decode(&bytes, &narrow()).unwrap();
    assert_eq!(back, u);
}

#[test]
fn wide_sequence_of_singles() {
    let u = AsduBuilder::new(wide(), TypeId::SinglePoint, spont_test(), GLOBAL_COMMON_ADDR)
        .unwrap()
        .originator(42)
        .sequence(17)
        .unwrap()
        .object(17, &[SinglePoint::On.to_siq(Quality::OK)])
        .unwrap()
        .object(18, &[SinglePoint::Off.to_siq(Quality::OK)])
        .unwrap()
        .build();

    let bytes = u.encode(&wide()).unwrap();
    assert_eq!(
        bytes,
        [0x01, 0x82, 0x83, 0x2A, 0xFF, 0xFF, 0x11, 0x00, 0x00, 0x01, 0x00]
    );

    let back = Asdu::decode(&bytes, &wide()).unwrap();
    assert_eq!(back, u);
    assert!(back.is_sequence());
    assert_eq!(back.num_objects(), 2);
}

#[test]
fn narrow_float_measurements() {
    let mut first = 99.0f32.to_le_bytes().to_vec();
    first.push(Quality::new(Quality::OVERFLOW | Quality::INVALID).to_byte());
    let mut second = (-1e9f32).to_le_bytes().to_vec();
    second.push(Quality::OK.to_byte());

    let u = AsduBuilder::new(narrow(), TypeId::MeasuredValueFloat, spont_test(), 3)
        .unwrap()
        .object(16, &first)
        .unwrap()
        .object(17, &second)
        .unwrap()
        .build();

    let bytes = u.encode(&narrow()).unwrap();
    assert_eq!(
        bytes,
        [
            0x0D, 0x02, 0x83, 0x03, 0x10, 0x00, 0x00, 0xC6, 0x42, 0x81, 0x11, 0x28, 0x6B, 0x6E,
            0xCE, 0x00,
        ]
    );

    #[derive(Default)]
    struct Floats(Vec<(u32, f32, bool)>);
    impl MonitorHandler for Floats {
        fn float(&mut self, _u: &Asdu, addr: u32, value: f32, q: Quality) {
            self.0.push((addr, value, q.invalid()));
        }
    }

    let back = Asdu::decode(&bytes, &narrow()).unwrap();
    let mut floats = Floats::default();
    monitor::dispatch(&narrow(), &back, &mut floats).unwrap();
    assert_eq!(floats.0, vec![(16, 99.0, true), (17, -1e9, false)]);
}

#[test]
fn round_trip_across_catalogue() {
    // One object of every fixed-size monitor type survives the codec
    // bit-for-bit.
    let params = wide();
    for type_byte in (1u8..=21).chain(30..=40).chain([70]) {
        let type_id = TypeId::try_from(type_byte).unwrap();
        let size = type_id.object_size().unwrap();
        let element: Vec<u8> = (0..size).map(|i| (i as u8).wrapping_mul(31).wrapping_add(7)).collect();
        let u = AsduBuilder::new(
            params,
            type_id,
            CauseOfTransmission::new(Cause::Spontaneous),
            7,
        )
        .unwrap()
        .originator(11)
        .object(0x01_02_03, &element)
        .unwrap()
        .build();

        let bytes = u.encode(&params).unwrap();
        let back = Asdu::decode(&bytes, &params).unwrap();
        assert_eq!(back, u, "type {type_byte}");
        back.check_structure(&params).unwrap();
    }
}

#[test]
fn normalized_round_trip_extremes() {
    for n in [i16::MIN, -1, 0, 1, i16::MAX] {
        let v = Normal(n);
        assert_eq!(Normal::from_bytes(v.to_bytes()), v);
        let f = v.float();
        assert!((-1.0..1.0).contains(&f));
        assert_eq!((f * 32768.0).round() as i32, i32::from(n));
    }
}

//! End-to-end loader runs against the chip emulator and, when attached,
//! real hardware

use utpu_driver::{
    open_transport, ChipEmulator, LoaderTiming, ProgramLoader, SerialConfig, Transport,
    TransportSelection, TransportType, BUFFER_SECTION_A, BUFFER_SECTION_B, BUFFER_SECTION_C,
};
use utpu_isa::{Int4, RunFlags};

fn int4s(v: &[i32]) -> Vec<Int4> {
    Int4::from_slice(v).unwrap()
}

fn matmul<T: Transport>(l: &mut ProgramLoader<T>, w: &[i32], x: &[i32]) -> [i8; 2] {
    l.execute_2x2_matmul(
        &int4s(w),
        &int4s(x),
        BUFFER_SECTION_B.into(),
        BUFFER_SECTION_A.into(),
        BUFFER_SECTION_C.into(),
        RunFlags::ALL,
    )
    .unwrap()
    .map(Int4::get)
}

#[test]
fn saturating_products_quantize_to_zero() {
    let t = open_transport(&TransportSelection::Emulator, &SerialConfig::default()).unwrap();
    assert_eq!(t.transport_type(), TransportType::Emulator);
    let mut l = ProgramLoader::with_timing(t, LoaderTiming::immediate());

    assert_eq!(matmul(&mut l, &[5, 6, 7, 7], &[1, 1]), [0, 0]);
    assert_eq!(matmul(&mut l, &[5, 6, 7, 1], &[1, 2]), [0, 0]);
}

#[test]
fn programs_after_halt_still_run() {
    let mut l = ProgramLoader::with_timing(ChipEmulator::new(), LoaderTiming::immediate());
    assert_eq!(matmul(&mut l, &[1, 1, 1, 1], &[2, 3]), [5, 5]);
    assert_eq!(matmul(&mut l, &[-2, -2, -2, -2], &[1, 1]), [-1, -1]);
    // compute program and fetch program each end in HALT
    assert_eq!(l.transport().halt_count(), 4);
}

#[test]
fn readback_of_result_word_shows_both_outputs() {
    let mut l = ProgramLoader::with_timing(ChipEmulator::new(), LoaderTiming::immediate());
    matmul(&mut l, &[1, 2, 3, 4], &[1, 1]);
    let rb = l.read_results(BUFFER_SECTION_C.into(), 4).unwrap();
    let values = rb.into_complete().unwrap();
    assert_eq!(values.iter().map(|v| v.get()).collect::<Vec<_>>(), [3, 0, 7, 0]);
}

#[test]
#[ignore] // Requires hardware
fn hardware_reference_matmul() {
    let port = std::env::var("UTPU_PORT").unwrap_or_else(|_| "/dev/ttyUSB1".into());
    let t = open_transport(&TransportSelection::Serial(port.into()), &SerialConfig::default())
        .expect("serial port");
    let mut l = ProgramLoader::new(t);
    l.reset_chip().unwrap();
    assert_eq!(matmul(&mut l, &[1, 2, 3, 4], &[1, 1]), [3, 7]);
}

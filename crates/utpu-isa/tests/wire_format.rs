//! Wire-format checks for the instruction encoder and assembler

use utpu_isa::asm::{assemble_file, disassemble_bytes};
use utpu_isa::{
    decode_nibble, encode_fetch, encode_halt, encode_load_inputs, encode_load_weights,
    encode_nibble, encode_run, encode_store_immediate, pack_nibbles, unpack_nibbles,
    validate_address, BufferSection, Int4, Opcode, ProgramBuilder, RunFlags,
};

fn int4s(values: &[i32]) -> Vec<Int4> {
    Int4::from_slice(values).unwrap()
}

#[test]
fn address_validation_is_identity_in_range() {
    for addr in 0..=511 {
        assert_eq!(i32::from(validate_address(addr).unwrap().get()), addr);
    }
    assert!(validate_address(-1).unwrap_err().is_range());
    assert!(validate_address(512).unwrap_err().is_range());
}

#[test]
fn nibble_round_trip_including_boundaries() {
    for v in -8..=7 {
        let x = Int4::new(v).unwrap();
        assert_eq!(decode_nibble(encode_nibble(x)).get(), i8::try_from(v).unwrap());
    }
}

#[test]
fn packed_lanes_keep_order() {
    let word = pack_nibbles(&int4s(&[1, 2, 3, 4])).unwrap();
    let lanes: Vec<i8> = unpack_nibbles(word).iter().map(|v| v.get()).collect();
    assert_eq!(lanes, vec![1, 2, 3, 4]);
}

#[test]
fn store_immediate_layout() {
    let bytes = encode_store_immediate(0x080, &int4s(&[1, 2, 3, 4])).unwrap().to_bytes();
    assert_eq!(bytes.len(), 6);
    let first = u16::from_le_bytes([bytes[0], bytes[1]]);
    let third = u16::from_le_bytes([bytes[4], bytes[5]]);
    assert_eq!(Opcode::from_word(first).unwrap(), Opcode::Store);
    assert_ne!(first & utpu_isa::opcode::store::IMMEDIATE, 0);
    assert_eq!(third, 0x080);
}

#[test]
fn run_layout() {
    let bytes = encode_run(0x100, true, true, true).unwrap().to_bytes();
    assert_eq!(bytes.len(), 2);
    let w = u16::from_le_bytes([bytes[0], bytes[1]]);
    assert_eq!(Opcode::from_word(w).unwrap(), Opcode::Run);
    assert_eq!(w >> 7, 0x100);
}

#[test]
fn matmul_program_image() {
    let mut b = ProgramBuilder::new();
    b.store(BufferSection::B.base().get().into(), &int4s(&[1, 2, 3, 4])).unwrap()
        .load_weights(0x080).unwrap()
        .store(0x000, &int4s(&[1, 1, 0, 0])).unwrap()
        .load_inputs(0x000).unwrap()
        .run(0x100, RunFlags::ALL).unwrap()
        .halt();
    let program = b.build();

    let expected: Vec<u8> = [
        encode_store_immediate(0x080, &int4s(&[1, 2, 3, 4])).unwrap().to_bytes(),
        encode_load_weights(0x080).unwrap().to_bytes(),
        encode_store_immediate(0x000, &int4s(&[1, 1])).unwrap().to_bytes(),
        encode_load_inputs(0x000).unwrap().to_bytes(),
        encode_run(0x100, true, true, true).unwrap().to_bytes(),
        encode_halt().to_bytes(),
    ]
    .concat();
    assert_eq!(program.as_bytes(), expected.as_slice());
    assert_eq!(program.instruction_count(), 6);
}

#[test]
fn fetch_pair_differs_only_in_half_bit() {
    let bottom = encode_fetch(0x100, false).unwrap().encode().words()[0];
    let top = encode_fetch(0x100, true).unwrap().encode().words()[0];
    assert_eq!(bottom ^ top, utpu_isa::opcode::fetch::TOP_HALF);
}

#[test]
fn assemble_file_writes_mem_and_bin() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("demo.asm");
    std::fs::write(
        &src,
        "; 2x2 demo\nSTORE #0x4321, 0x080\nLOADWEI 0x080\nRUN 0x100\nFETCHBOT 0x100\nHALT\n",
    )
    .unwrap();

    let out = assemble_file(&src, None).unwrap();
    assert_eq!(out.word_count, 3 + 1 + 1 + 1 + 1);
    assert_eq!(out.mem_path, dir.path().join("demo.mem"));

    let mem = std::fs::read_to_string(&out.mem_path).unwrap();
    assert_eq!(mem.lines().collect::<Vec<_>>(), ["0010", "4321", "0080", "400B", "803A", "8001", "0004"]);

    let bin = std::fs::read(&out.bin_path).unwrap();
    assert_eq!(bin.len(), 14);
    assert_eq!(disassemble_bytes(&bin).unwrap().len(), 5);
}

#[test]
fn assemble_file_honours_output_base() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("prog.asm");
    std::fs::write(&src, "NOP\nHALT\n").unwrap();

    let base = dir.path().join("out").join("image");
    std::fs::create_dir_all(base.parent().unwrap()).unwrap();
    let out = assemble_file(&src, Some(&base)).unwrap();
    assert_eq!(std::fs::read(out.bin_path).unwrap(), vec![0x05, 0x00, 0x04, 0x00]);
}

#[test]
fn assemble_file_reports_bad_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("bad.asm");
    std::fs::write(&src, "NOP\nLOADWEI 0x200\n").unwrap();
    let err = assemble_file(&src, None).unwrap_err();
    assert!(err.to_string().contains("Line 2"), "{err}");
}

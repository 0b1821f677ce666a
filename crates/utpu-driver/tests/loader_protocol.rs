//! Loader protocol tests against a scripted transport
//!
//! The scripted transport records every `send_bytes` call separately and
//! releases canned reply bytes after a chosen send, which is how the chip
//! behaves: nothing arrives until the FETCHes have gone out.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;
use utpu_driver::{LoaderTiming, ProgramLoader, Transport, TransportType, UtpuError};
use utpu_isa::{Int4, Opcode, ProgramBuilder, RunFlags};

#[derive(Debug, Default)]
struct ScriptedTransport {
    sends: Vec<Vec<u8>>,
    replies: Vec<(usize, Vec<u8>)>,
    rx: VecDeque<u8>,
    discards: usize,
    /// Reject any write once this many bytes have been accepted
    write_limit: Option<usize>,
}

impl ScriptedTransport {
    fn reply_after_send(mut self, send_number: usize, bytes: &[u8]) -> Self {
        self.replies.push((send_number, bytes.to_vec()));
        self
    }

    fn bytes_sent(&self) -> usize {
        self.sends.iter().map(Vec::len).sum()
    }
}

impl Transport for ScriptedTransport {
    fn send_bytes(&mut self, data: &[u8]) -> utpu_driver::Result<()> {
        if let Some(limit) = self.write_limit {
            if self.bytes_sent() + data.len() > limit {
                return Err(UtpuError::short_write(limit - self.bytes_sent(), data.len()));
            }
        }
        self.sends.push(data.to_vec());
        let n = self.sends.len();
        for (_, bytes) in self.replies.iter().filter(|(k, _)| *k == n) {
            self.rx.extend(bytes);
        }
        Ok(())
    }

    fn receive_up_to(&mut self, n: usize) -> utpu_driver::Result<Bytes> {
        let take = n.min(self.rx.len());
        Ok(self.rx.drain(..take).collect::<Vec<u8>>().into())
    }

    fn receive_exactly(&mut self, n: usize, _timeout: Duration) -> utpu_driver::Result<Bytes> {
        self.receive_up_to(n)
    }

    fn bytes_available(&mut self) -> utpu_driver::Result<usize> {
        Ok(self.rx.len())
    }

    fn discard_input(&mut self) -> utpu_driver::Result<()> {
        self.discards += 1;
        self.rx.clear();
        Ok(())
    }

    fn close(&mut self) -> utpu_driver::Result<()> {
        Ok(())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Custom
    }
}

fn loader(t: ScriptedTransport) -> ProgramLoader<ScriptedTransport> {
    ProgramLoader::with_timing(
        t,
        LoaderTiming::immediate().with_result_deadline(Duration::from_millis(20)),
    )
}

fn int4s(v: &[i32]) -> Vec<Int4> {
    Int4::from_slice(v).unwrap()
}

fn words(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks(2).map(|p| u16::from_le_bytes([p[0], p[1]])).collect()
}

#[test]
fn read_results_fetches_both_halves_and_decodes_low_nibble_first() {
    let t = ScriptedTransport::default().reply_after_send(1, &[0x21, 0x43, 0xF8, 0x07]);
    let mut l = loader(t);

    let rb = l.read_results(0x040, 7).unwrap();
    assert!(rb.is_complete());
    assert_eq!(rb.bytes_expected, 4);
    assert_eq!(
        rb.values().iter().map(|v| v.get()).collect::<Vec<_>>(),
        [1, 2, 3, 4, -8, -1, 7]
    );

    let t = l.into_inner();
    assert_eq!(t.sends.len(), 1);
    assert_eq!(words(&t.sends[0]), [0x2001, 0x2009, 0x2081, 0x2089]);
}

#[test]
fn short_delivery_is_reported_as_incomplete() {
    let t = ScriptedTransport::default().reply_after_send(1, &[0x21, 0x43, 0x65]);
    let mut l = loader(t);

    let rb = l.read_results(0x000, 7).unwrap();
    assert!(!rb.is_complete());
    assert_eq!(rb.bytes_received, 3);
    assert_eq!(rb.values().len(), 6);

    match rb.into_complete() {
        Err(UtpuError::ShortRead { received, expected, .. }) => {
            assert_eq!((received, expected), (3, 4));
        }
        other => panic!("expected ShortRead, got {other:?}"),
    }
}

#[test]
fn matmul_sends_compute_then_fetch_and_decodes_response() {
    // High nibbles are noise; only the low nibble of each byte is an output
    let t = ScriptedTransport::default().reply_after_send(2, &[0xF3, 0xA7]);
    let mut l = loader(t);

    let out = l
        .execute_2x2_matmul(&int4s(&[1, 2, 3, 4]), &int4s(&[1, 1]), 0x080, 0x000, 0x100, RunFlags::ALL)
        .unwrap();
    assert_eq!(out.map(Int4::get), [3, 7]);

    let mut compute = ProgramBuilder::new();
    compute
        .store(0x080, &int4s(&[1, 2, 3, 4])).unwrap()
        .load_weights(0x080).unwrap()
        .store(0x000, &int4s(&[1, 1, 0, 0])).unwrap()
        .load_inputs(0x000).unwrap()
        .run(0x100, RunFlags::ALL).unwrap()
        .halt();
    let mut fetch = ProgramBuilder::new();
    fetch.fetch(0x100, false).unwrap().fetch(0x100, true).unwrap().halt();

    let t = l.into_inner();
    assert_eq!(t.discards, 2);
    assert_eq!(t.sends, vec![compute.to_bytes().to_vec(), fetch.to_bytes().to_vec()]);
}

#[test]
fn matmul_quantize_and_relu_flags_reach_run_word() {
    let t = ScriptedTransport::default().reply_after_send(2, &[0, 0]);
    let mut l = loader(t);
    l.execute_2x2_matmul(
        &int4s(&[1, 1, 1, 1]),
        &int4s(&[1, 1]),
        0x080,
        0x000,
        0x100,
        RunFlags::new(false, false, false),
    )
    .unwrap();

    let t = l.into_inner();
    let run = words(&t.sends[0])
        .into_iter()
        .find(|w| Opcode::from_word(*w) == Ok(Opcode::Run))
        .unwrap();
    // compute is always on; quantize and relu stay off
    assert_eq!(run, (0x100 << 7) | utpu_isa::opcode::run::COMPUTE | Opcode::Run.bits());
}

#[test]
fn matmul_without_answer_is_short_read() {
    let t = ScriptedTransport::default().reply_after_send(2, &[0x01]);
    let mut l = loader(t);
    let err = l
        .execute_2x2_matmul(&int4s(&[1, 1, 1, 1]), &int4s(&[1, 1]), 0x080, 0x000, 0x100, RunFlags::ALL)
        .unwrap_err();
    assert!(err.is_short_read(), "{err}");
}

#[test]
fn long_programs_go_out_in_order_in_chunks() {
    let mut b = ProgramBuilder::new();
    for _ in 0..100 {
        b.nop();
    }
    let program = b.build();
    let mut l = loader(ScriptedTransport::default());
    l.send_program(&program).unwrap();

    let t = l.into_inner();
    assert_eq!(t.sends.iter().map(Vec::len).collect::<Vec<_>>(), [128, 72]);
    assert_eq!(t.sends.concat(), program.as_bytes());
}

#[test]
fn load_array_sends_one_store_per_word() {
    let mut l = loader(ScriptedTransport::default());
    let stores = l.load_array(0x180, &int4s(&[1, 2, 3, 4, 5, 6, 7, -8, -1])).unwrap();
    assert_eq!(stores, 3);

    let t = l.into_inner();
    assert_eq!(t.sends.len(), 3);
    let last = words(&t.sends[2]);
    assert_eq!(last, [0x0010, 0x000F, 0x182]);
}

#[test]
fn write_failure_stops_loading() {
    let t = ScriptedTransport {
        write_limit: Some(8),
        ..ScriptedTransport::default()
    };
    let mut l = loader(t);
    let err = l.load_array(0x000, &int4s(&[1, 2, 3, 4, 5])).unwrap_err();
    assert!(matches!(err, UtpuError::TransportWrite { .. }), "{err}");
    assert_eq!(l.into_inner().sends.len(), 1);
}

#[test]
fn reset_only_flushes() {
    let mut l = loader(ScriptedTransport::default());
    l.reset_chip().unwrap();
    let t = l.into_inner();
    assert!(t.sends.is_empty());
    assert_eq!(t.discards, 2);
}

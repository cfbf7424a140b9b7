//! Buffer Rotation Properties
//!
//! Random interleavings of packet arrival and reads on one device. Every
//! captured packet is delivered exactly once, in arrival order, and the
//! hold buffer is never overwritten while it holds unread records.

use std::sync::Arc;

use jiff::Timestamp;
use kernel_abi::SelectOps;
use kernel_bpf::Packet;
use kernel_bpfdev::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Ingest(usize),
    Read { nonblock: bool },
    Immediate(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (4usize..200).prop_map(Op::Ingest),
        3 => any::<bool>().prop_map(|nonblock| Op::Read { nonblock }),
        1 => any::<bool>().prop_map(Op::Immediate),
    ]
}

fn sequence_numbers(buf: &[u8]) -> Vec<u32> {
    records(buf)
        .map(|(_, data)| u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
        .collect()
}

struct Run {
    registry: DeviceRegistry,
    ifindex: IfIndex,
    dev: DeviceHandle,
    size: u32,
    delivered: Vec<u32>,
    next_seq: u32,
    next_id: u64,
}

impl Run {
    fn new(size: u32) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
        let mut registry = DeviceRegistry::with_capacity(1, clock);
        let ifindex = registry.add_interface(Arc::new(Loopback::new("lo0")));
        let dev = registry.open().unwrap();
        registry.control(dev, Control::SetBufferLen(size)).unwrap();
        registry.control(dev, Control::SetInterface("lo0")).unwrap();
        Self {
            registry,
            ifindex,
            dev,
            size,
            delivered: Vec::new(),
            next_seq: 0,
            next_id: 0,
        }
    }

    fn buffered(&self) -> (usize, usize) {
        self.registry.device(self.dev).unwrap().buffered()
    }

    fn read(&mut self, nonblock: bool) -> Result<ReadStatus, DeviceError> {
        self.next_id += 1;
        let mut request =
            ReadRequest::new(ConsumerId(1), RequestId(self.next_id), self.size as usize);
        if nonblock {
            request = request.nonblocking();
        }
        self.registry.read(self.dev, request)
    }

    fn collect(&mut self, buf: &[u8]) {
        self.delivered.extend(sequence_numbers(buf));
    }

    fn harvest(&mut self) {
        for reply in self.registry.take_replies() {
            if let Reply::Read { result: Ok(buf), .. } = reply {
                self.collect(&buf);
            }
        }
    }

    fn step(&mut self, op: &Op) -> Result<(), TestCaseError> {
        let (_, hold_before) = self.buffered();
        match *op {
            Op::Ingest(len) => {
                let mut pkt = vec![0u8; len];
                pkt[..4].copy_from_slice(&self.next_seq.to_be_bytes());
                self.next_seq += 1;
                self.registry
                    .tap(self.ifindex, &Packet::new(&pkt), Direction::Inbound);
            }
            Op::Read { nonblock } => match self.read(nonblock) {
                Ok(ReadStatus::Ready(buf)) => {
                    prop_assert!(!buf.is_empty());
                    self.collect(&buf);
                }
                Ok(ReadStatus::Suspended) => {}
                Err(DeviceError::WouldBlock) => {
                    prop_assert!(nonblock);
                }
                Err(DeviceError::Busy) => {
                    prop_assert!(self.registry.device(self.dev).unwrap().has_pending_read());
                }
                Err(err) => return Err(TestCaseError::fail(format!("read failed: {err}"))),
            },
            Op::Immediate(on) => {
                self.registry
                    .control(self.dev, Control::SetImmediate(on))
                    .unwrap();
            }
        }
        self.harvest();

        let (store, hold) = self.buffered();
        prop_assert!(store <= self.size as usize && hold <= self.size as usize);
        // a non-empty hold is only ever consumed, never replaced
        if hold_before > 0 && hold > 0 {
            prop_assert_eq!(hold, hold_before);
        }
        Ok(())
    }

    /// Drain everything still buffered by removing the interface.
    fn finish(&mut self) -> Result<(), TestCaseError> {
        self.registry.remove_interface(self.ifindex).unwrap();
        self.harvest();
        loop {
            match self.read(true) {
                Ok(ReadStatus::Ready(buf)) => self.collect(&buf),
                Err(DeviceError::Io) => break,
                other => return Err(TestCaseError::fail(format!("unexpected {other:?}"))),
            }
        }
        prop_assert_eq!(
            self.registry
                .select(self.dev, ConsumerId(1), SelectOps::READ, false)
                .unwrap(),
            SelectOps::READ
        );
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn captured_packets_delivered_once_in_order(
        size in prop::sample::select(vec![64u32, 128, 256, 1024]),
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let mut run = Run::new(size);
        for op in &ops {
            run.step(op)?;
        }
        run.finish()?;

        let stats = run.registry.device(run.dev).unwrap().stats();
        prop_assert_eq!(stats.recv, u64::from(run.next_seq));
        prop_assert_eq!(stats.capt + stats.drop, stats.recv);
        prop_assert_eq!(run.delivered.len() as u64, stats.capt);
        prop_assert!(run.delivered.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn drops_only_when_both_buffers_hold_data(
        lens in prop::collection::vec(4usize..120, 1..40),
    ) {
        let mut run = Run::new(128);
        for len in lens {
            let before = run.buffered();
            let drops = run.registry.device(run.dev).unwrap().stats().drop;
            run.step(&Op::Ingest(len))?;
            let after = run.registry.device(run.dev).unwrap().stats().drop;
            if after > drops {
                prop_assert!(before.0 > 0 && before.1 > 0);
                prop_assert_eq!(run.buffered(), before);
            }
        }
    }
}

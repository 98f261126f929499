use std::sync::{Arc, Mutex};

use gifunit::tag::encode;
use gifunit::{GifUnit, GsPacket, PacketSink, PathId, ReadCounter, Transfer};

use crate::vu::{GifKick, VectorUnit, VifRegs, VifSnapshot, VuMemory};
use crate::{Config, SnapshotError, SpawnError, VuThread};

#[derive(Debug, Default)]
struct Log {
    executes: Vec<(u32, u32, u32)>,
    micro: Vec<(u32, usize)>,
    unpacks: Vec<(VifRegs, Vec<u8>)>,
}

/// Records everything it is asked to do. Microprograms kick the packet at qword `itop`.
struct TestVu {
    log: Arc<Mutex<Log>>,
    cycles: u32,
}

impl VectorUnit for TestVu {
    fn execute(&mut self, mem: &mut VuMemory, pc: u32, kick: &mut GifKick) -> u32 {
        self.log
            .lock()
            .unwrap()
            .executes
            .push((pc, mem.top, mem.itop));

        if mem.data.iter().any(|&b| b != 0) {
            kick.xgkick(mem, mem.itop);
        }

        mem.tpc = pc + 8;
        self.cycles
    }

    fn micro_written(&mut self, addr: u32, len: usize) {
        self.log.lock().unwrap().micro.push((addr, len));
    }

    fn unpack(&mut self, _: &mut VuMemory, regs: &VifRegs, data: &[u8]) {
        self.log
            .lock()
            .unwrap()
            .unpacks
            .push((regs.clone(), data.to_vec()));
    }
}

fn spawn(config: Config, cycles: u32) -> (VuThread, Arc<Mutex<Log>>) {
    let log = Arc::new(Mutex::new(Log::default()));
    let vu = TestVu {
        log: log.clone(),
        cycles,
    };

    let thread = VuThread::spawn(config, Box::new(vu), Arc::default()).unwrap();
    (thread, log)
}

fn small_ring() -> Config {
    Config {
        ring_words: 64,
        commit_kick_words: 16,
        ..Default::default()
    }
}

fn gif_packet() -> Vec<u8> {
    let mut packet = encode(1, true, 0, 2, 0x51).to_vec();
    packet.extend_from_slice(&[0x44; 32]);
    packet
}

#[test]
fn bad_ring_size() {
    let vu = Box::new(crate::vu::NopVectorUnit);
    let config = Config {
        ring_words: 1000,
        ..Default::default()
    };

    assert!(matches!(
        VuThread::spawn(config, vu, Arc::default()),
        Err(SpawnError::RingSize { words: 1000 })
    ));
}

#[test]
fn execute_queues_one_packet() {
    let (mut thread, log) = spawn(Config::default(), 100);

    thread.submit_write_data(0, &gif_packet());
    thread.submit_execute(Some(0x10), 0x40, 0);
    thread.wait_idle();

    assert!(thread.is_done());
    assert_eq!(thread.packets().pending(), 1);
    assert_eq!(log.lock().unwrap().executes, [(0x10, 0x40, 0)]);

    let finished = thread.packets().pop().unwrap();
    assert_eq!(finished.data, gif_packet());
    assert_eq!(finished.packet.size, 48);
    assert_eq!(finished.packet.cycles, 2 + 64);
    assert!(finished.packet.done);

    assert_eq!(thread.vu_cycles(), 25);
}

#[test]
fn execute_resumes_from_tpc() {
    let (mut thread, log) = spawn(Config::default(), 1);

    thread.submit_execute(Some(0x100), 1, 2);
    thread.submit_execute(None, 3, 4);
    thread.wait_idle();

    assert_eq!(
        log.lock().unwrap().executes,
        [(0x100, 1, 2), (0x108, 3, 4)]
    );

    // programs that kick nothing still produce a packet for their placeholder
    assert_eq!(thread.packets().pending(), 2);
    assert_eq!(thread.packets().peek().map(|p| p.size), Some(0));
}

#[test]
fn cycle_heuristic_is_clamped() {
    let (mut thread, _) = spawn(Config::default(), 10_000);

    for _ in 0..4 {
        thread.submit_execute(None, 0, 0);
    }

    thread.wait_idle();
    assert_eq!(thread.vu_cycles(), 3000);
}

#[test]
fn micro_writes_are_reported() {
    let (mut thread, log) = spawn(Config::default(), 0);

    thread.submit_write_micro(0x80, &[0xAB; 24]);
    thread.wait_idle();
    assert_eq!(log.lock().unwrap().micro, [(0x80, 24)]);
}

#[test]
fn unpacks_see_row_and_col() {
    let (mut thread, log) = spawn(Config::default(), 0);

    let vif = VifSnapshot {
        num: 2,
        addr: 0x30,
        ..Default::default()
    };

    thread.submit_write_row([1, 2, 3, 4]);
    thread.submit_write_col([5, 6, 7, 8]);
    thread.submit_unpack(vif, &[1; 32]);
    thread.wait_idle();

    let log = log.lock().unwrap();
    let (regs, data) = &log.unpacks[0];
    assert_eq!(regs.vif, vif);
    assert_eq!(regs.row, [1, 2, 3, 4]);
    assert_eq!(regs.col, [5, 6, 7, 8]);
    assert_eq!(data, &[1; 32]);
}

#[test]
fn wrapping_is_lossless() {
    let (mut thread, log) = spawn(small_ring(), 0);

    let mut expected = Vec::new();
    for i in 0..300u32 {
        let vif = VifSnapshot {
            num: i,
            ..Default::default()
        };

        let data = vec![i as u8; (i % 41) as usize];
        thread.submit_unpack(vif, &data);
        expected.push((i, data));
    }

    thread.wait_idle();

    let log = log.lock().unwrap();
    let received = log
        .unpacks
        .iter()
        .map(|(regs, data)| (regs.vif.num, data.clone()))
        .collect::<Vec<_>>();

    assert_eq!(received, expected);
}

#[test]
fn largest_command_fits() {
    let (mut thread, log) = spawn(small_ring(), 0);

    // 62 words: tag, address, length and 59 data words
    let data = [7; 59 * 4];
    for _ in 0..3 {
        thread.submit_write_micro(0, &data);
    }

    thread.wait_idle();
    assert_eq!(log.lock().unwrap().micro.len(), 3);
}

#[test]
fn large_writes_are_split() {
    let (mut thread, log) = spawn(small_ring(), 0);

    // 236 bytes is the largest payload of a 64 word ring
    thread.submit_write_micro(0x100, &[3; 1000]);
    thread.wait_idle();

    assert_eq!(
        log.lock().unwrap().micro,
        [
            (0x100, 236),
            (0x100 + 236, 236),
            (0x100 + 472, 236),
            (0x100 + 708, 236),
            (0x100 + 944, 56)
        ]
    );
}

#[test]
fn snapshot_round_trip() {
    let (mut a, _) = spawn(small_ring(), 40);
    for _ in 0..5 {
        a.submit_execute(None, 0, 0);
    }

    let snapshot = a.snapshot();
    assert_eq!(snapshot.read, snapshot.write);
    assert_eq!(snapshot.history, [40; 4]);

    let blob = a.save().unwrap();
    let (mut b, _) = spawn(small_ring(), 0);
    b.load(&blob).unwrap();
    assert_eq!(b.snapshot(), snapshot);
    assert_eq!(b.vu_cycles(), 40);

    // the restored ring keeps working from the restored cursors
    b.submit_write_row([0; 4]);
    b.wait_idle();
    assert_eq!(b.ring().read_pos(), snapshot.write + 5);

    b.reset();
    assert_eq!(b.ring().read_pos(), 0);
    assert_eq!(b.vu_cycles(), 0);
}

#[test]
fn restore_rejects_bad_cursors() {
    let (mut thread, _) = spawn(small_ring(), 0);
    let mut snapshot = thread.snapshot();
    snapshot.write = 64;

    assert!(matches!(
        thread.restore(snapshot),
        Err(SnapshotError::Cursor {
            pos: 64,
            capacity: 64
        })
    ));

    snapshot.write = 12;
    assert!(matches!(
        thread.restore(snapshot),
        Err(SnapshotError::Pending { read: 0, write: 12 })
    ));
    assert_eq!(thread.ring().write_pos(), 0);
    assert!(matches!(
        thread.load(&[0xFF]),
        Err(SnapshotError::Decode { .. })
    ));
}

#[derive(Debug, Clone, Default)]
struct Placeholders(Arc<Mutex<Vec<PathId>>>);

impl PacketSink for Placeholders {
    fn packet(&mut self, _: PathId, packet: &GsPacket, _: &[u8], reads: &ReadCounter) {
        reads.release(packet.read_amount);
    }

    fn placeholder(&mut self, path: PathId) {
        self.0.lock().unwrap().push(path);
    }
}

#[test]
fn gif_unit_forwards_placeholders() {
    let sink = Placeholders::default();
    let mut gif = GifUnit::new(
        gifunit::Config {
            mtvu: true,
            ..Default::default()
        },
        Box::new(sink.clone()),
    );

    let log = Arc::new(Mutex::new(Log::default()));
    let vu = TestVu {
        log: log.clone(),
        cycles: 10,
    };

    let packets = gif.mtvu_packets().unwrap().clone();
    let mut thread = VuThread::spawn(Config::default(), Box::new(vu), packets.clone()).unwrap();

    thread.submit_write_data(0, &gif_packet());
    thread.submit_execute(Some(0), 0, 0);
    gif.transfer(Transfer::Mtvu, &[]);

    assert_eq!(*sink.0.lock().unwrap(), [PathId::Path1]);
    assert_eq!(packets.wait_pop().data, gif_packet());
}

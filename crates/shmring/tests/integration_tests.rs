use shmring::{
    Channel, Geometry, MpmcConsumer, MpmcProducer, MpscConsumer, MpscProducer, RingError,
    RingPublisher, RingSubscriber, Side, Spsc, SpscConsumer, SpscProducer,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn uniq(tag: &str) -> String {
    static N: AtomicUsize = AtomicUsize::new(0);
    format!(
        "/shmring_it_{tag}_{}_{}",
        std::process::id(),
        N.fetch_add(1, Ordering::Relaxed)
    )
}

#[test]
fn spsc_echo() {
    let name = uniq("echo");
    let geometry = Geometry::new(8, 4);
    let mut producer = SpscProducer::with_geometry(&name, geometry).unwrap();
    let mut consumer = SpscConsumer::with_geometry(&name, geometry).unwrap();
    producer.open().unwrap();
    consumer.open().unwrap();

    let payloads: [[u8; 8]; 3] = [
        [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07],
        [0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F],
        [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17],
    ];
    for payload in &payloads {
        producer.try_push(payload).unwrap();
    }

    let mut out = [0u8; 8];
    for payload in &payloads {
        consumer.try_pop(&mut out).unwrap();
        assert_eq!(&out, payload);
    }
    assert_eq!(consumer.pending(), 0);

    producer.close();
    consumer.close();
    SpscProducer::unlink(&name).unwrap();
}

#[test]
fn spsc_backpressure() {
    let name = uniq("backpressure");
    let geometry = Geometry::new(8, 2);
    let mut producer = SpscProducer::with_geometry(&name, geometry).unwrap();
    producer.open().unwrap();

    producer.try_push(&[1u8; 8]).unwrap();
    producer.try_push(&[2u8; 8]).unwrap();
    assert_eq!(producer.try_push(&[3u8; 8]), Err(RingError::WouldBlock));
    assert!(producer.full());
    assert_eq!(producer.available(), 0);

    // no consumer runs, so the timed push must hit its deadline
    let start = Instant::now();
    assert_eq!(
        producer.timed_push(&[3u8; 8], Duration::from_millis(50)),
        Err(RingError::TimedOut)
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(500), "deadline overshot: {elapsed:?}");

    producer.close();
    SpscProducer::unlink(&name).unwrap();
}

#[test]
fn mpsc_preserves_per_producer_order() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u32 = 10_000;

    let name = uniq("mpsc");
    let geometry = Geometry::new(8, 1024);

    let mut consumer = MpscConsumer::with_geometry(&name, geometry).unwrap();
    consumer.open().unwrap();

    let mut handles = vec![];
    for producer_id in 0..PRODUCERS {
        let seg_name = name.clone();
        handles.push(thread::spawn(move || {
            let mut producer = MpscProducer::with_geometry(&seg_name, geometry).unwrap();
            producer.open().unwrap();
            for seq in 0..PER_PRODUCER {
                let mut payload = [0u8; 8];
                payload[..4].copy_from_slice(&producer_id.to_le_bytes());
                payload[4..].copy_from_slice(&seq.to_le_bytes());
                producer.push(&payload).unwrap();
            }
            producer.close();
        }));
    }

    let mut next_seq = [0u32; PRODUCERS as usize];
    let mut out = [0u8; 8];
    for _ in 0..PRODUCERS * PER_PRODUCER {
        consumer.pop(&mut out).unwrap();
        let producer_id = u32::from_le_bytes(out[..4].try_into().unwrap()) as usize;
        let seq = u32::from_le_bytes(out[4..].try_into().unwrap());
        assert_eq!(
            seq, next_seq[producer_id],
            "per-producer FIFO violated for producer {producer_id}"
        );
        next_seq[producer_id] += 1;
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(next_seq.iter().all(|&n| n == PER_PRODUCER));
    assert_eq!(consumer.pending(), 0);

    consumer.close();
    MpscConsumer::unlink(&name).unwrap();
}

#[test]
fn mpmc_consumes_exactly_once() {
    const TOTAL: u64 = 100_000;

    let name = uniq("mpmc");
    let geometry = Geometry::new(8, 256);

    // keep one endpoint open so the segment name stays initialized for
    // everyone regardless of thread scheduling
    let mut anchor = MpmcProducer::with_geometry(&name, geometry).unwrap();
    anchor.open().unwrap();

    let popped = Arc::new(AtomicU64::new(0));
    let mut producers = vec![];
    for half in 0..2u64 {
        let seg_name = name.clone();
        producers.push(thread::spawn(move || {
            let mut producer = MpmcProducer::with_geometry(&seg_name, geometry).unwrap();
            producer.open().unwrap();
            let lo = half * (TOTAL / 2) + 1;
            let hi = (half + 1) * (TOTAL / 2);
            for value in lo..=hi {
                producer.push(&value.to_le_bytes()).unwrap();
            }
            producer.close();
        }));
    }

    let mut consumers = vec![];
    for _ in 0..2 {
        let seg_name = name.clone();
        let popped = Arc::clone(&popped);
        consumers.push(thread::spawn(move || {
            let mut consumer = MpmcConsumer::with_geometry(&seg_name, geometry).unwrap();
            consumer.open().unwrap();
            let mut seen = vec![];
            let mut out = [0u8; 8];
            while popped.load(Ordering::Acquire) < TOTAL {
                match consumer.timed_pop(&mut out, Duration::from_millis(200)) {
                    Ok(()) => {
                        popped.fetch_add(1, Ordering::AcqRel);
                        seen.push(u64::from_le_bytes(out));
                    }
                    Err(RingError::TimedOut) => {}
                    Err(err) => panic!("unexpected pop error: {err}"),
                }
            }
            consumer.close();
            seen
        }));
    }

    for handle in producers {
        handle.join().unwrap();
    }
    let mut all = vec![];
    for handle in consumers {
        all.extend(handle.join().unwrap());
    }

    assert_eq!(all.len() as u64, TOTAL);
    let mut seen = vec![false; TOTAL as usize + 1];
    for value in all {
        assert!(value >= 1 && value <= TOTAL, "value out of range: {value}");
        assert!(!seen[value as usize], "value consumed twice: {value}");
        seen[value as usize] = true;
    }

    anchor.close();
    MpmcProducer::unlink(&name).unwrap();
}

#[test]
fn geometry_mismatch_leaves_first_opener_intact() {
    let name = uniq("mismatch");
    let mut first = SpscProducer::with_geometry(&name, Geometry::new(64, 16)).unwrap();
    first.open().unwrap();

    let mut second = SpscConsumer::with_geometry(&name, Geometry::new(128, 16)).unwrap();
    assert_eq!(second.open(), Err(RingError::InvalidParam));
    assert!(!second.opened());

    // the surviving opener keeps operating normally
    first.try_push(&[7u8; 64]).unwrap();
    let mut matching = SpscConsumer::with_geometry(&name, Geometry::new(64, 16)).unwrap();
    matching.open().unwrap();
    let mut out = [0u8; 64];
    matching.try_pop(&mut out).unwrap();
    assert_eq!(out, [7u8; 64]);

    first.close();
    matching.close();
    SpscProducer::unlink(&name).unwrap();
}

#[test]
fn concurrent_fresh_open_initializes_once() {
    const OPENERS: usize = 8;

    let name = uniq("once");
    let geometry = Geometry::new(8, 32);

    let mut handles = vec![];
    for _ in 0..OPENERS {
        let seg_name = name.clone();
        handles.push(thread::spawn(move || {
            let mut producer = MpscProducer::with_geometry(&seg_name, geometry).unwrap();
            producer.open().unwrap();
            producer.push(&1u64.to_le_bytes()).unwrap();
            producer.close();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // every opener saw the same live header: all pushes landed
    let mut consumer = MpscConsumer::with_geometry(&name, geometry).unwrap();
    consumer.open().unwrap();
    assert_eq!(consumer.pending(), OPENERS as u64);

    let mut out = [0u8; 8];
    for _ in 0..OPENERS {
        consumer.try_pop(&mut out).unwrap();
    }
    assert!(consumer.empty());

    consumer.close();
    MpscConsumer::unlink(&name).unwrap();
}

#[test]
fn attach_does_not_reinitialize() {
    let name = uniq("attach");
    let geometry = Geometry::new(8, 16);

    let mut producer = SpscProducer::with_geometry(&name, geometry).unwrap();
    producer.open().unwrap();
    producer.try_push(&[1u8; 8]).unwrap();
    producer.try_push(&[2u8; 8]).unwrap();

    // late joiners must observe the existing contents, not a fresh header
    let mut consumer = SpscConsumer::with_geometry(&name, geometry).unwrap();
    consumer.open().unwrap();
    assert_eq!(consumer.pending(), 2);

    producer.close();
    consumer.close();
    SpscProducer::unlink(&name).unwrap();
}

#[test]
fn duplex_channel_carries_both_directions() {
    let name = uniq("duplex");
    let geometry = Geometry::new(16, 8);

    let peer_name = name.clone();
    let peer = thread::spawn(move || {
        let mut side_b: Channel<Spsc> =
            Channel::with_geometry(Side::B, &peer_name, geometry).unwrap();
        side_b.open().unwrap();
        let mut buf = [0u8; 16];
        side_b.receive(&mut buf).unwrap();
        // echo it back upper-cased marker
        buf[0] = b'B';
        side_b.send(&buf).unwrap();
        side_b.close();
    });

    let mut side_a: Channel<Spsc> = Channel::with_geometry(Side::A, &name, geometry).unwrap();
    side_a.open().unwrap();

    let mut message = *b"Ahello channel!!";
    side_a.send(&message).unwrap();
    side_a.receive(&mut message).unwrap();
    assert_eq!(&message, b"Bhello channel!!");

    peer.join().unwrap();
    side_a.close();
    Channel::<Spsc>::unlink(&name).unwrap();
}

#[test]
fn wait_notify_pacing_loses_no_wakeups() {
    const RECORDS: u64 = 5;

    let name = uniq("pacing");

    let mut publisher = RingPublisher::with_geometry(16, 16).unwrap();
    publisher.open(&name).unwrap();

    let sub_name = name.clone();
    let subscriber = thread::spawn(move || {
        let mut subscriber = RingSubscriber::with_geometry(16, 16).unwrap();
        subscriber.open(&sub_name).unwrap();
        let mut received = 0u64;
        let mut out = [0u8; 16];
        for _ in 0..RECORDS {
            subscriber.pop(&mut out).unwrap();
            received += 1;
            // deliberately lag behind the publisher
            thread::sleep(Duration::from_millis(30));
        }
        // every banked signal was consumed; nothing extra is pending
        let leftover = subscriber.timed_pop(&mut out, Duration::from_millis(50));
        subscriber.close();
        (received, leftover)
    });

    for i in 0..RECORDS {
        let mut record = [0u8; 16];
        record[..8].copy_from_slice(&i.to_le_bytes());
        publisher.push(&record).unwrap();
        thread::sleep(Duration::from_millis(40));
    }

    let (received, leftover) = subscriber.join().unwrap();
    assert_eq!(received, RECORDS);
    assert_eq!(leftover, Err(RingError::TimedOut));

    publisher.close();
}

#[test]
fn timed_pop_returns_within_bound() {
    let name = uniq("bound");
    let mut consumer = SpscConsumer::with_geometry(&name, Geometry::new(8, 4)).unwrap();
    consumer.open().unwrap();

    let timeout = Duration::from_millis(80);
    let start = Instant::now();
    let mut out = [0u8; 8];
    assert_eq!(
        consumer.timed_pop(&mut out, timeout),
        Err(RingError::TimedOut)
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= timeout);
    assert!(
        elapsed < timeout + Duration::from_millis(250),
        "deadline overshot: {elapsed:?}"
    );

    consumer.close();
    SpscConsumer::unlink(&name).unwrap();
}

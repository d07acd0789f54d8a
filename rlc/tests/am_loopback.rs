//! End-to-end tests driving two AM entities back to back

use std::collections::VecDeque;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rlc::{AmEntity, RlcEntity, RlcError, UpperLayer};

#[derive(Default)]
struct Endpoint {
    outgoing: VecDeque<Bytes>,
    received: Vec<Bytes>,
    delivered: Vec<Bytes>,
    failures: u32,
}

impl UpperLayer for Endpoint {
    fn pull_sdu(&mut self, _now_ms: u32, max_size: usize) -> Option<Bytes> {
        match self.outgoing.front() {
            Some(sdu) if sdu.len() <= max_size => self.outgoing.pop_front(),
            _ => None,
        }
    }

    fn sdu_received(&mut self, _now_ms: u32, sdu: Bytes) {
        self.received.push(sdu);
    }

    fn sdu_delivered(&mut self, _now_ms: u32, sdu: Bytes) {
        self.delivered.push(sdu);
    }

    fn radio_link_failure(&mut self, _now_ms: u32) {
        self.failures += 1;
    }
}

fn random_sdus(rng: &mut StdRng, count: usize, max_len: usize) -> Vec<Bytes> {
    (0..count)
        .map(|_| {
            let len = rng.gen_range(1..=max_len);
            Bytes::from((0..len).map(|_| rng.gen::<u8>()).collect::<Vec<_>>())
        })
        .collect()
}

fn entity(params: &str, outgoing: &[Bytes]) -> AmEntity<Endpoint> {
    let upper = Endpoint {
        outgoing: outgoing.iter().cloned().collect(),
        ..Default::default()
    };
    let mut entity = AmEntity::new(upper);
    entity.set_parameters(params).unwrap();
    entity
}

/// Lossy link in both directions with per-tick opportunity sizes
struct Link {
    rng: StdRng,
    loss: f64,
    min_opportunity: usize,
    max_opportunity: usize,
}

impl Link {
    fn opportunity(&mut self) -> usize {
        self.rng.gen_range(self.min_opportunity..=self.max_opportunity)
    }

    fn lost(&mut self) -> bool {
        self.loss > 0.0 && self.rng.gen_bool(self.loss)
    }

    /// One MAC tick: both sides get a send opportunity, then timers advance
    fn tick(&mut self, now: u32, a: &mut AmEntity<Endpoint>, b: &mut AmEntity<Endpoint>) {
        let mut buffer = vec![0u8; self.opportunity()];
        if let Some(n) = a.send_opportunity(now, &mut buffer) {
            if !self.lost() {
                b.received(now, &buffer[..n]);
            }
        }

        let mut buffer = vec![0u8; self.opportunity()];
        if let Some(n) = b.send_opportunity(now, &mut buffer) {
            if !self.lost() {
                a.received(now, &buffer[..n]);
            }
        }

        a.timer_tick(now + 1);
        b.timer_tick(now + 1);
    }
}

/// Run until every SDU is received and acknowledged. Returns the tick count.
fn run(
    link: &mut Link,
    a: &mut AmEntity<Endpoint>,
    b: &mut AmEntity<Endpoint>,
    expected: usize,
    max_ticks: u32,
) -> u32 {
    for now in 0..max_ticks {
        if b.upper().received.len() == expected && a.upper().delivered.len() == expected {
            return now;
        }
        link.tick(now, a, b);
    }
    panic!(
        "gave up after {} ticks: received {} delivered {} of {}",
        max_ticks,
        b.upper().received.len(),
        a.upper().delivered.len(),
        expected
    );
}

#[test]
fn test_lossless_delivery_in_order() {
    let mut rng = StdRng::seed_from_u64(1);
    let sdus = random_sdus(&mut rng, 200, 300);

    let mut a = entity("pollPDU=1", &sdus);
    let mut b = entity("", &[]);
    let mut link = Link {
        rng,
        loss: 0.0,
        min_opportunity: 100,
        max_opportunity: 100,
    };

    run(&mut link, &mut a, &mut b, sdus.len(), 5_000);
    assert_eq!(b.upper().received, sdus);
    assert_eq!(a.upper().delivered, sdus);
    assert_eq!(a.tx().vt_a(), a.tx().vt_s());
    assert_eq!(b.rx().vr_r(), a.tx().vt_s());
    assert_eq!(a.upper().failures, 0);
}

#[test]
fn test_large_sdus_span_many_pdus() {
    let mut rng = StdRng::seed_from_u64(2);
    let sdus = random_sdus(&mut rng, 10, 5000);

    let mut a = entity("pollPDU=1", &sdus);
    let mut b = entity("", &[]);
    let mut link = Link {
        rng,
        loss: 0.0,
        min_opportunity: 64,
        max_opportunity: 64,
    };

    run(&mut link, &mut a, &mut b, sdus.len(), 10_000);
    assert_eq!(b.upper().received, sdus);
}

#[test]
fn test_lossy_link_recovers_everything() {
    let mut rng = StdRng::seed_from_u64(3);
    let sdus = random_sdus(&mut rng, 150, 400);

    let mut a = entity("pollPDU=1 maxRetxThreshold=64", &sdus);
    let mut b = entity("maxRetxThreshold=64", &[]);
    let mut link = Link {
        rng,
        loss: 0.2,
        min_opportunity: 100,
        max_opportunity: 100,
    };

    run(&mut link, &mut a, &mut b, sdus.len(), 50_000);
    assert_eq!(b.upper().received, sdus);
    assert_eq!(a.upper().delivered, sdus);
}

#[test]
fn test_lossy_link_with_resegmentation() {
    let mut rng = StdRng::seed_from_u64(4);
    let sdus = random_sdus(&mut rng, 100, 600);

    let mut a = entity("pollPDU=1 maxRetxThreshold=64", &sdus);
    let mut b = entity("maxRetxThreshold=64", &[]);
    // Retransmissions often meet a smaller opportunity than the original
    let mut link = Link {
        rng,
        loss: 0.15,
        min_opportunity: 24,
        max_opportunity: 300,
    };

    run(&mut link, &mut a, &mut b, sdus.len(), 50_000);
    assert_eq!(b.upper().received, sdus);
    assert_eq!(a.upper().delivered, sdus);
}

/// At least 1500 * 20 bytes through 30 byte opportunities: more than 1024
/// PDUs, so VT(S) and VR(R) wrap at least once
fn wrapping_traffic(rng: &mut StdRng) -> Vec<Bytes> {
    (0..1500)
        .map(|_| {
            let len = rng.gen_range(20..=40);
            Bytes::from((0..len).map(|_| rng.gen::<u8>()).collect::<Vec<_>>())
        })
        .collect()
}

#[test]
fn test_sequence_numbers_wrap_lossless() {
    let mut rng = StdRng::seed_from_u64(6);
    let sdus = wrapping_traffic(&mut rng);

    let mut a = entity("", &sdus);
    let mut b = entity("", &[]);
    let mut link = Link {
        rng,
        loss: 0.0,
        min_opportunity: 30,
        max_opportunity: 30,
    };

    run(&mut link, &mut a, &mut b, sdus.len(), 20_000);
    assert_eq!(b.upper().received, sdus);
    assert_eq!(a.upper().delivered, sdus);
    assert_eq!(a.tx().vt_a(), a.tx().vt_s());
    assert_eq!(b.rx().vr_r(), a.tx().vt_s());
}

#[test]
fn test_sequence_numbers_wrap_lossy() {
    let mut rng = StdRng::seed_from_u64(7);
    let sdus = wrapping_traffic(&mut rng);

    for params in ["maxRetxThreshold=64", "amWindowSize=16 maxRetxThreshold=64"] {
        let mut a = entity(params, &sdus);
        let mut b = entity(params, &[]);
        let mut link = Link {
            rng: StdRng::seed_from_u64(8),
            loss: 0.1,
            min_opportunity: 30,
            max_opportunity: 30,
        };

        run(&mut link, &mut a, &mut b, sdus.len(), 200_000);
        assert_eq!(b.upper().received, sdus, "{}", params);
        assert_eq!(a.upper().delivered, sdus, "{}", params);
        assert_eq!(a.upper().failures, 0);
    }
}

#[test]
fn test_out_of_order_arrival() {
    let sdus = vec![
        Bytes::from_static(b"zero"),
        Bytes::from_static(b"one"),
        Bytes::from_static(b"two"),
    ];
    let mut a = entity("pollPDU=infinity pollByte=infinity", &sdus);
    let mut b = entity("", &[]);

    let mut pdus = Vec::new();
    for now in 0..3 {
        let mut buffer = [0u8; 6];
        let n = a.send_opportunity(now, &mut buffer).unwrap();
        pdus.push(buffer[..n].to_vec());
    }

    b.received(3, &pdus[2]);
    assert!(b.upper().received.is_empty());
    b.received(3, &pdus[0]);
    assert_eq!(b.upper().received, sdus[..1]);
    b.received(3, &pdus[1]);
    assert_eq!(b.upper().received, sdus);

    // Duplicates fall outside the window
    b.received(4, &pdus[1]);
    assert_eq!(b.upper().received.len(), 3);
}

#[test]
fn test_dead_link_reports_radio_link_failure() {
    let sdus = vec![Bytes::from_static(b"never acknowledged")];
    let mut a = entity("pollPDU=1 maxRetxThreshold=2 t-PollRetransmit=10", &sdus);
    let mut b = entity("", &[]);
    let mut link = Link {
        rng: StdRng::seed_from_u64(5),
        loss: 1.0,
        min_opportunity: 100,
        max_opportunity: 100,
    };

    for now in 0..200 {
        link.tick(now, &mut a, &mut b);
    }
    assert_eq!(a.upper().failures, 1);
    assert!(a.upper().delivered.is_empty());
    assert!(b.upper().received.is_empty());

    // Reset clears the failure so it can be reported again
    a.reset();
    a.upper_mut().outgoing.extend(sdus);
    for now in 200..400 {
        link.tick(now, &mut a, &mut b);
    }
    assert_eq!(a.upper().failures, 2);
}

#[test]
fn test_bad_parameters_rejected() {
    let mut a = entity("", &[]);
    assert!(matches!(
        a.set_parameters("pollPDU=lots"),
        Err(RlcError::InvalidParameter { .. })
    ));
    assert!(matches!(
        a.set_parameters("amWindowSize=1024"),
        Err(RlcError::InvalidConfiguration(_))
    ));
    a.set_parameters("unknownKey=1 rlc/debug=1").unwrap();
}

//! Rank communication layer.
//!
//! All parallelism across ranks is expressed through the explicit collectives
//! of the [`Comm`] trait: reductions, a barrier and a blocking ring
//! `send_recv`. Collectives act as global barriers; there are no suspension
//! points inside a rank.
//!
//! Two implementations are provided: [`SerialComm`] for single-process runs,
//! and [`LocalRingComm`] which drives several ranks as threads within one
//! process. The latter exists so that the parallel export loops (pair search
//! over the fully ghosted discretization, semi-Lagrangean ring export) can be
//! exercised in tests without an MPI launcher.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Explicit collective operations between ranks.
///
/// Every method is a global synchronisation point and must be called by all
/// ranks in the same order.
pub trait Comm {
    /// Id of the calling rank, in `0..num_ranks()`.
    fn rank(&self) -> usize;
    /// Total number of ranks participating in the collectives.
    fn num_ranks(&self) -> usize;
    /// Wait until all ranks have arrived here.
    fn barrier(&self);
    /// Global sum of `local` over all ranks.
    fn sum_all(&self, local: f64) -> f64;
    /// Global minimum of `local` over all ranks.
    fn min_all(&self, local: f64) -> f64;
    /// Global maximum of `local` over all ranks.
    fn max_all(&self, local: f64) -> f64;
    /// Global sum of an integer counter.
    fn sum_all_usize(&self, local: usize) -> usize;
    /// Logical AND over all ranks. Used for the "all procs done" check of
    /// iterative exports.
    fn all_done(&self, local: bool) -> bool;
    /// Blocking ring exchange: send `bytes` to rank `rank + 1 (mod N)` and
    /// receive the message sent by rank `rank - 1 (mod N)`.
    ///
    /// The ring direction is fixed; see the semi-Lagrangean export.
    fn ring_send_recv(&self, bytes: Vec<u8>) -> Vec<u8>;
}

/// Trivial implementation for a single process.
///
/// `ring_send_recv` returns its input unchanged (a ring of one).
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn num_ranks(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn sum_all(&self, local: f64) -> f64 {
        local
    }
    fn min_all(&self, local: f64) -> f64 {
        local
    }
    fn max_all(&self, local: f64) -> f64 {
        local
    }
    fn sum_all_usize(&self, local: usize) -> usize {
        local
    }
    fn all_done(&self, local: bool) -> bool {
        local
    }
    fn ring_send_recv(&self, bytes: Vec<u8>) -> Vec<u8> {
        bytes
    }
}

/// Accumulator state for one in-process collective round.
struct Round {
    generation: u64,
    arrived: usize,
    acc_sum: f64,
    acc_min: f64,
    acc_max: f64,
    acc_count: usize,
    acc_and: bool,
    // One inbox per rank for the ring exchange.
    inboxes: Vec<VecDeque<Vec<u8>>>,
}

struct SharedComm {
    num_ranks: usize,
    round: Mutex<Round>,
    cv: Condvar,
}

/// An in-process "MPI": `n` ranks running on `n` threads, synchronising
/// through a shared reduction buffer. Deterministic for the fixed collective
/// schedule the core uses.
#[derive(Clone)]
pub struct LocalRingComm {
    rank: usize,
    shared: Arc<SharedComm>,
}

impl LocalRingComm {
    /// Create communicators for `n` ranks. The returned vector holds one
    /// handle per rank; hand each to its own thread.
    pub fn group(n: usize) -> Vec<LocalRingComm> {
        assert!(n > 0);
        let shared = Arc::new(SharedComm {
            num_ranks: n,
            round: Mutex::new(Round {
                generation: 0,
                arrived: 0,
                acc_sum: 0.0,
                acc_min: f64::INFINITY,
                acc_max: f64::NEG_INFINITY,
                acc_count: 0,
                acc_and: true,
                inboxes: (0..n).map(|_| VecDeque::new()).collect(),
            }),
            cv: Condvar::new(),
        });
        (0..n)
            .map(|rank| LocalRingComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run one reduction round: deposit through `put`, read the result with
    /// `get` once everyone has arrived.
    fn reduce<T>(&self, put: impl FnOnce(&mut Round), get: impl FnOnce(&Round) -> T) -> T {
        let shared = &*self.shared;
        let mut round = shared.round.lock().unwrap();
        let gen = round.generation;
        put(&mut round);
        round.arrived += 1;
        if round.arrived == shared.num_ranks {
            shared.cv.notify_all();
        } else {
            while round.generation == gen && round.arrived < shared.num_ranks {
                round = shared.cv.wait(round).unwrap();
            }
        }
        let result = get(&round);
        round.arrived -= 1;
        if round.arrived == 0 {
            // Last rank out resets the accumulators for the next round.
            round.generation = round.generation.wrapping_add(1);
            round.acc_sum = 0.0;
            round.acc_min = f64::INFINITY;
            round.acc_max = f64::NEG_INFINITY;
            round.acc_count = 0;
            round.acc_and = true;
            shared.cv.notify_all();
        } else {
            let target = round.generation.wrapping_add(1);
            while round.generation != target {
                round = shared.cv.wait(round).unwrap();
            }
        }
        result
    }
}

impl Comm for LocalRingComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.shared.num_ranks
    }

    fn barrier(&self) {
        self.reduce(|_| {}, |_| ());
    }

    fn sum_all(&self, local: f64) -> f64 {
        self.reduce(|r| r.acc_sum += local, |r| r.acc_sum)
    }

    fn min_all(&self, local: f64) -> f64 {
        self.reduce(|r| r.acc_min = r.acc_min.min(local), |r| r.acc_min)
    }

    fn max_all(&self, local: f64) -> f64 {
        self.reduce(|r| r.acc_max = r.acc_max.max(local), |r| r.acc_max)
    }

    fn sum_all_usize(&self, local: usize) -> usize {
        self.reduce(|r| r.acc_count += local, |r| r.acc_count)
    }

    fn all_done(&self, local: bool) -> bool {
        self.reduce(|r| r.acc_and &= local, |r| r.acc_and)
    }

    fn ring_send_recv(&self, bytes: Vec<u8>) -> Vec<u8> {
        let dest = (self.rank + 1) % self.num_ranks();
        let shared = &*self.shared;
        {
            let mut round = shared.round.lock().unwrap();
            round.inboxes[dest].push_back(bytes);
            shared.cv.notify_all();
        }
        let mut round = shared.round.lock().unwrap();
        loop {
            if let Some(msg) = round.inboxes[self.rank].pop_front() {
                return msg;
            }
            round = shared.cv.wait(round).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_are_identity() {
        let comm = SerialComm;
        assert_eq!(comm.sum_all(2.5), 2.5);
        assert_eq!(comm.min_all(-1.0), -1.0);
        assert_eq!(comm.ring_send_recv(vec![1, 2, 3]), vec![1, 2, 3]);
        assert!(comm.all_done(true));
        assert!(!comm.all_done(false));
    }

    #[test]
    fn local_ring_reductions() {
        let comms = LocalRingComm::group(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let s = comm.sum_all(comm.rank() as f64);
                    let mn = comm.min_all(comm.rank() as f64);
                    let mx = comm.max_all(comm.rank() as f64);
                    let done = comm.all_done(comm.rank() != 2);
                    (s, mn, mx, done)
                })
            })
            .collect();
        for h in handles {
            let (s, mn, mx, done) = h.join().unwrap();
            assert_eq!(s, 6.0);
            assert_eq!(mn, 0.0);
            assert_eq!(mx, 3.0);
            assert!(!done);
        }
    }

    #[test]
    fn local_ring_send_recv_rotates() {
        let comms = LocalRingComm::group(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let recv = comm.ring_send_recv(vec![comm.rank() as u8]);
                    (comm.rank(), recv)
                })
            })
            .collect();
        for h in handles {
            let (rank, recv) = h.join().unwrap();
            let expect = ((rank + 3 - 1) % 3) as u8;
            assert_eq!(recv, vec![expect]);
        }
    }
}

//! Finite-element-style additive assembly with off-rank support.
//!
//! `add(row, col, value)` accepts rows the current rank does not own;
//! such entries are buffered and shipped around the rank ring in a single
//! collective when `complete()` is called. Skipping the off-rank path would
//! produce silently wrong Jacobians whenever a pair straddles a partition
//! boundary, so every contribution goes through this assembler.

use crate::comm::Comm;
use crate::mesh::DofId;
use crate::Error;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Triplet {
    row: usize,
    col: usize,
    val: f64,
}

/// Additive sparse-matrix assembler producing a `sprs::CsMat` on `complete`.
pub struct FeMatrix {
    nrows: usize,
    ncols: usize,
    rank: usize,
    /// Owning rank per global row id.
    row_owner: Vec<usize>,
    local: Vec<Triplet>,
    off_rank: Vec<Triplet>,
}

impl FeMatrix {
    pub fn new(nrows: usize, ncols: usize, row_owner: Vec<usize>, rank: usize) -> Self {
        debug_assert_eq!(row_owner.len(), nrows);
        FeMatrix {
            nrows,
            ncols,
            rank,
            row_owner,
            local: Vec::new(),
            off_rank: Vec::new(),
        }
    }

    /// Add `val` at `(row, col)`. Entries in rows owned elsewhere are
    /// buffered until `complete`.
    pub fn add(&mut self, row: DofId, col: DofId, val: f64) {
        if val == 0.0 {
            return;
        }
        let t = Triplet {
            row: row.index(),
            col: col.index(),
            val,
        };
        if self.row_owner[t.row] == self.rank {
            self.local.push(t);
        } else {
            self.off_rank.push(t);
        }
    }

    /// Scale every buffered entry. Applied by the driver for the
    /// generalised-alpha factor on new stiffness contributions.
    pub fn scale(&mut self, s: f64) {
        for t in self.local.iter_mut().chain(self.off_rank.iter_mut()) {
            t.val *= s;
        }
    }

    /// Ship off-rank entries around the ring and build the owned rows as a
    /// compressed sparse matrix. Collective: all ranks must call this.
    pub fn complete(mut self, comm: &dyn Comm) -> Result<CsMat<f64>, Error> {
        let mut outbound = std::mem::take(&mut self.off_rank);
        for _ in 1..comm.num_ranks() {
            let bytes = bincode::serialize(&outbound).map_err(|e| Error::Pack(e.to_string()))?;
            let recv = comm.ring_send_recv(bytes);
            let incoming: Vec<Triplet> =
                bincode::deserialize(&recv).map_err(|e| Error::Pack(e.to_string()))?;
            outbound.clear();
            for t in incoming {
                if self.row_owner[t.row] == self.rank {
                    self.local.push(t);
                } else {
                    outbound.push(t);
                }
            }
        }
        if !outbound.is_empty() {
            return Err(Error::Pack(format!(
                "{} assembled entries have no owning rank",
                outbound.len()
            )));
        }
        let mut tri = TriMat::new((self.nrows, self.ncols));
        for t in &self.local {
            tri.add_triplet(t.row, t.col, t.val);
        }
        Ok(tri.to_csr())
    }
}

/// Additive distributed vector with the same off-rank discipline.
pub struct FeVector {
    rank: usize,
    row_owner: Vec<usize>,
    values: Vec<f64>,
    off_rank: Vec<(usize, f64)>,
}

impl FeVector {
    pub fn new(len: usize, row_owner: Vec<usize>, rank: usize) -> Self {
        debug_assert_eq!(row_owner.len(), len);
        FeVector {
            rank,
            row_owner,
            values: vec![0.0; len],
            off_rank: Vec::new(),
        }
    }

    pub fn add(&mut self, row: DofId, val: f64) {
        if val == 0.0 {
            return;
        }
        let i = row.index();
        if self.row_owner[i] == self.rank {
            self.values[i] += val;
        } else {
            self.off_rank.push((i, val));
        }
    }

    pub fn scale(&mut self, s: f64) {
        for v in &mut self.values {
            *v *= s;
        }
        for (_, v) in &mut self.off_rank {
            *v *= s;
        }
    }

    /// `self += s * other`, entrywise over owned rows. `other` must be
    /// completed already.
    pub fn axpy(&mut self, s: f64, other: &[f64]) {
        debug_assert_eq!(other.len(), self.values.len());
        for (v, o) in self.values.iter_mut().zip(other) {
            *v += s * o;
        }
    }

    /// Ship off-rank entries and finish assembly. Collective.
    pub fn complete(&mut self, comm: &dyn Comm) -> Result<(), Error> {
        let mut outbound = std::mem::take(&mut self.off_rank);
        for _ in 1..comm.num_ranks() {
            let bytes = bincode::serialize(&outbound).map_err(|e| Error::Pack(e.to_string()))?;
            let recv = comm.ring_send_recv(bytes);
            let incoming: Vec<(usize, f64)> =
                bincode::deserialize(&recv).map_err(|e| Error::Pack(e.to_string()))?;
            outbound.clear();
            for (i, v) in incoming {
                if self.row_owner[i] == self.rank {
                    self.values[i] += v;
                } else {
                    outbound.push((i, v));
                }
            }
        }
        if !outbound.is_empty() {
            return Err(Error::Pack(format!(
                "{} vector entries have no owning rank",
                outbound.len()
            )));
        }
        Ok(())
    }

    /// Owned entries (zeros in rows owned elsewhere).
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Maximum absolute owned entry, reduced over all ranks.
    pub fn inf_norm(&self, comm: &dyn Comm) -> f64 {
        let local = utils::inf_norm(
            self.values
                .iter()
                .enumerate()
                .filter(|(i, _)| self.row_owner[*i] == self.rank)
                .map(|(_, &v)| v),
        );
        comm.max_all(local)
    }
}

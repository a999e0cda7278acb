//! Row-parallel matrix addition over a fixed-size process group.
//!
//! Every rank owns exactly one row of each input matrix, so the group must
//! have exactly N ranks for N×N matrices. The coordinator generates the
//! inputs, both matrices are distributed (replicated or partitioned,
//! depending on the chosen [`Distribution`]), each rank adds its row pair
//! locally, and a gather reassembles the sum on the coordinator.

use std::time::{Duration, Instant};

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::comm::Group;
use crate::matrix::{Elem, Matrix};
use crate::{Error, Result};

/// Run parameters, passed in explicitly instead of living as file-scope
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    /// Matrix dimension N; also the required group size.
    pub matrix_size: usize,
    /// Rank that generates the inputs and reports the result.
    pub coordinator_rank: i32,
    /// Seed for the coordinator's input generator. Reusing a seed reruns
    /// the same inputs and therefore produces the same sum.
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            matrix_size: 4,
            coordinator_rank: 0,
            seed: 1,
        }
    }
}

/// How the coordinator's matrices reach the other ranks. Both strategies
/// leave every rank holding exactly its own row pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Replicate both full matrices to every rank; each rank slices out
    /// the row matching its own rank.
    Broadcast,
    /// Partition both matrices into rows and send rank `i` only row `i`.
    Scatter,
}

/// Wall-clock intervals for one run, measured on every rank around the
/// collective calls.
///
/// `comm` covers the distribution and collection spans, `compute` the local
/// row addition between them, and `total` the whole stretch from first
/// collective to last, so `comm + compute <= total` always holds.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub comm: Duration,
    pub compute: Duration,
    pub total: Duration,
}

/// What the coordinator gets back from a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub timings: Timings,
}

/// Check the row-per-rank precondition: the group must have exactly one
/// rank per matrix row.
pub fn ensure_group_size(actual: i32, required: usize) -> Result<()> {
    if actual as usize != required {
        return Err(Error::GroupSizeMismatch { actual, required });
    }
    Ok(())
}

/// Elementwise sum of one row pair.
pub fn add_rows(a: &[Elem], b: &[Elem]) -> Vec<Elem> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Run one row-parallel addition on the calling rank.
///
/// Collective: every rank of the group must call this with the same config
/// and distribution. Each rank moves linearly through verify, distribute,
/// compute, and collect; the coordinator additionally generates the inputs
/// before distribution and prints the three matrices and the timing report
/// after collection.
///
/// Returns `Some(RunReport)` on the coordinator and `None` on every other
/// rank. Fails on every rank with [`Error::GroupSizeMismatch`] if the group
/// size differs from `config.matrix_size`; the caller is expected to abort
/// the group, since row ownership is rank-indexed and the run cannot
/// proceed.
pub fn run(
    group: &Group,
    config: &RunConfig,
    distribution: Distribution,
) -> Result<Option<RunReport>> {
    // Checked independently on every rank, before any communication.
    ensure_group_size(group.size(), config.matrix_size)?;

    let n = config.matrix_size;
    let rank = group.rank();
    let root = config.coordinator_rank;

    let inputs = if rank == root {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let a = Matrix::random(n, &mut rng);
        let b = Matrix::random(n, &mut rng);
        println!("Matrix A:");
        print!("{}", a);
        println!("Matrix B:");
        print!("{}", b);
        Some((a, b))
    } else {
        None
    };

    let start = Instant::now();

    debug!("rank {} distributing via {:?}", rank, distribution);
    let (local_a, local_b) = match distribution {
        Distribution::Broadcast => {
            let a = group.broadcast(inputs.as_ref().map(|(a, _)| a), root)?;
            let b = group.broadcast(inputs.as_ref().map(|(_, b)| b), root)?;
            (a.row(rank as usize).to_vec(), b.row(rank as usize).to_vec())
        }
        Distribution::Scatter => {
            let a_rows = inputs.as_ref().map(|(a, _)| a.to_rows());
            let b_rows = inputs.as_ref().map(|(_, b)| b.to_rows());
            let local_a = group.scatter(a_rows.as_deref(), root)?;
            let local_b = group.scatter(b_rows.as_deref(), root)?;
            (local_a, local_b)
        }
    };
    let distributed = Instant::now();

    let local_c = add_rows(&local_a, &local_b);
    let computed = Instant::now();

    debug!("rank {} contributing row to gather", rank);
    let gathered = group.gather(&local_c, root)?;
    let end = Instant::now();

    let timings = Timings {
        comm: distributed.duration_since(start) + end.duration_since(computed),
        compute: computed.duration_since(distributed),
        total: end.duration_since(start),
    };

    match (inputs, gathered) {
        (Some((a, b)), Some(rows)) => {
            let c = Matrix::from_rows(&rows);
            println!("Matrix C (A + B):");
            print!("{}", c);
            println!(
                "Communication time: {:.6} seconds",
                timings.comm.as_secs_f64()
            );
            println!(
                "Computation time: {:.6} seconds",
                timings.compute.as_secs_f64()
            );
            println!("Execution time: {:.6} seconds", timings.total.as_secs_f64());
            Ok(Some(RunReport { a, b, c, timings }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> (Matrix, Matrix) {
        let a = Matrix::from_rows(&[
            vec![1, 2, 3, 4],
            vec![5, 6, 7, 8],
            vec![9, 10, 11, 12],
            vec![13, 14, 15, 16],
        ]);
        let b = Matrix::from_rows(&[
            vec![1, 0, 0, 0],
            vec![0, 1, 0, 0],
            vec![0, 0, 1, 0],
            vec![0, 0, 0, 1],
        ]);
        (a, b)
    }

    /// Drive the per-rank pipeline without a process group: select each
    /// rank's rows the way the given distribution would, add locally, and
    /// reassemble in rank order.
    fn simulate(a: &Matrix, b: &Matrix, distribution: Distribution) -> Matrix {
        let n = a.size();
        let rows: Vec<Vec<Elem>> = (0..n)
            .map(|rank| {
                let (local_a, local_b) = match distribution {
                    Distribution::Broadcast => (a.row(rank).to_vec(), b.row(rank).to_vec()),
                    Distribution::Scatter => {
                        (a.to_rows()[rank].clone(), b.to_rows()[rank].clone())
                    }
                };
                add_rows(&local_a, &local_b)
            })
            .collect();
        Matrix::from_rows(&rows)
    }

    #[test]
    fn group_size_must_match_matrix_size() {
        assert!(ensure_group_size(4, 4).is_ok());
        match ensure_group_size(3, 4) {
            Err(Error::GroupSizeMismatch { actual, required }) => {
                assert_eq!(actual, 3);
                assert_eq!(required, 4);
            }
            other => panic!("expected GroupSizeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn add_rows_is_elementwise() {
        assert_eq!(add_rows(&[1, 2, 3], &[10, 20, 30]), vec![11, 22, 33]);
        assert_eq!(add_rows(&[0, 0], &[0, 0]), vec![0, 0]);
        assert_eq!(add_rows(&[-1, 5], &[1, -5]), vec![0, 0]);
    }

    #[test]
    fn known_inputs_add_to_the_expected_sum() {
        let (a, b) = sample_inputs();
        let expected = Matrix::from_rows(&[
            vec![2, 2, 3, 4],
            vec![5, 7, 7, 8],
            vec![9, 10, 12, 12],
            vec![13, 14, 15, 17],
        ]);
        assert_eq!(simulate(&a, &b, Distribution::Broadcast), expected);
    }

    #[test]
    fn broadcast_and_scatter_are_observationally_equivalent() {
        let (a, b) = sample_inputs();
        assert_eq!(
            simulate(&a, &b, Distribution::Broadcast),
            simulate(&a, &b, Distribution::Scatter)
        );

        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let a = Matrix::random(6, &mut rng);
        let b = Matrix::random(6, &mut rng);
        assert_eq!(
            simulate(&a, &b, Distribution::Broadcast),
            simulate(&a, &b, Distribution::Scatter)
        );
    }

    #[test]
    fn all_zero_inputs_sum_to_zero() {
        let a = Matrix::zeros(4);
        let b = Matrix::zeros(4);
        let c = simulate(&a, &b, Distribution::Scatter);
        assert_eq!(c, Matrix::zeros(4));
    }

    #[test]
    fn postcondition_holds_for_generated_inputs() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let a = Matrix::random(5, &mut rng);
        let b = Matrix::random(5, &mut rng);
        let c = simulate(&a, &b, Distribution::Broadcast);
        for i in 0..5 {
            for j in 0..5 {
                assert_eq!(c.row(i)[j], a.row(i)[j] + b.row(i)[j]);
            }
        }
    }

    #[test]
    fn same_seed_produces_the_same_sum() {
        let gen = |seed| {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let a = Matrix::random(4, &mut rng);
            let b = Matrix::random(4, &mut rng);
            simulate(&a, &b, Distribution::Broadcast)
        };
        assert_eq!(gen(1), gen(1));
    }

    #[test]
    fn reassembly_places_rows_by_rank() {
        let rows: Vec<Vec<Elem>> = (0..4).map(|r| vec![r as Elem; 4]).collect();
        let m = Matrix::from_rows(&rows);
        for r in 0..4 {
            assert_eq!(m.row(r), &rows[r][..]);
        }
    }

    #[test]
    fn timing_intervals_partition_the_total() {
        let start = Instant::now();
        let distributed = Instant::now();
        let sink: Vec<Elem> = add_rows(&[1; 64], &[2; 64]);
        assert_eq!(sink.len(), 64);
        let computed = Instant::now();
        let end = Instant::now();

        let timings = Timings {
            comm: distributed.duration_since(start) + end.duration_since(computed),
            compute: computed.duration_since(distributed),
            total: end.duration_since(start),
        };
        assert!(timings.comm + timings.compute <= timings.total);
    }
}

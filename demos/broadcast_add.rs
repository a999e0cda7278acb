//! Broadcast-based variant: the coordinator replicates both full matrices to
//! every rank and each rank slices out the row matching its own rank.
//!
//! Usage: `cargo run --example broadcast_add [workers] [seed]`
//! (workers defaults to the matrix size; any other count aborts the group).

use matadd::{rowadd, Distribution, Error, Group, RunConfig};

fn main() {
    env_logger::init();

    let defaults = RunConfig::default();
    let mut args = std::env::args().skip(1);
    let workers: i32 = args
        .next()
        .map(|s| s.parse().expect("worker count must be an integer"))
        .unwrap_or(defaults.matrix_size as i32);
    let seed: u64 = args
        .next()
        .map(|s| s.parse().expect("seed must be an integer"))
        .unwrap_or(defaults.seed);
    let config = RunConfig { seed, ..defaults };

    // Spawned ranks re-enter main with identical arguments, so every rank
    // computes the same worker count and config here.
    let group = Group::init(workers).unwrap();

    match rowadd::run(&group, &config, Distribution::Broadcast) {
        Ok(_) => group.shutdown(),
        Err(Error::GroupSizeMismatch { required, .. }) => {
            // Only the coordinator prints the diagnostic; every rank aborts.
            if group.rank() == config.coordinator_rank {
                eprintln!(
                    "The number of processes must equal the matrix size ({}).",
                    required
                );
            }
            group.abort(1);
        }
        Err(e) => {
            eprintln!("rank {}: {}", group.rank(), e);
            group.abort(1);
        }
    }
}

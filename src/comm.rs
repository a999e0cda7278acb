//! The fixed-size process group and its collective operations.
//!
//! A [`Group`] spans a fixed number of OS processes communicating through a
//! POSIX shared memory segment (`/dev/shm` on Linux). The initializing
//! process claims rank 0 and spawns the remaining ranks by re-executing the
//! current binary; spawned processes detect this through the environment,
//! open the same segment, and claim a free rank. Each ordered (source,
//! destination) pair owns a dedicated message slot in the segment, so any
//! rank can exchange serialized payloads with any other without locks.
//!
//! All operations are blocking: a send completes only once the receiver has
//! acknowledged the message, and the collectives ([`Group::broadcast`],
//! [`Group::scatter`], [`Group::gather`]) do not return on any rank until
//! every member of the group has participated.

use shared_memory::{Shmem, ShmemConf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::debug;
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

/// Largest serialized payload a message slot can hold.
const MAX_MSG_SIZE: usize = 64 * 1024;
/// Largest group the shared state block is dimensioned for.
const MAX_RANKS: usize = 32;
const HEADER_SIZE: usize = std::mem::size_of::<MessageHeader>();

/// Set in the environment of spawned ranks so they join instead of spawning.
const SPAWNED_ENV: &str = "MATADD_SPAWNED";
/// Carries the per-run segment name from rank 0 to the spawned ranks.
const SEGMENT_ENV: &str = "MATADD_SEGMENT";

#[repr(C)]
#[derive(Default)]
struct MessageHeader {
    valid: AtomicBool,
    received: AtomicBool,
    tag: i32,
    source: i32,
    size: usize,
}

impl MessageHeader {
    fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            received: AtomicBool::new(false),
            tag: 0,
            source: -1,
            size: 0,
        }
    }
}

#[repr(C)]
struct SharedState {
    size: AtomicUsize,
    initialized: AtomicBool,
    process_ids: [AtomicUsize; MAX_RANKS], // Process IDs for each rank
    init_flags: [AtomicBool; MAX_RANKS],   // Flags for initialization synchronization
    done_flags: [AtomicBool; MAX_RANKS],   // Flags for shutdown synchronization
    released: AtomicBool,                  // Rank 0 sets this once every rank has checked in
}

/// Offset of the message slot for the ordered pair `src -> dst`, relative to
/// the start of the slot region.
fn slot_offset(src: i32, dst: i32, size: i32) -> usize {
    let slot_size = HEADER_SIZE + MAX_MSG_SIZE;
    (src * size + dst) as usize * slot_size
}

/// A fixed-size group of cooperating processes.
///
/// `Group` is the communication context for one run: it knows this process's
/// rank, the total number of ranks, and owns this process's mapping of the
/// shared segment. It provides point-to-point messaging and the three
/// collectives the row-parallel addition needs.
///
/// # Examples
///
/// ```rust,no_run
/// use matadd::Group;
///
/// // Rank 0 creates the segment and spawns three more ranks; each spawned
/// // process re-enters main and lands here too.
/// let group = Group::init(4).unwrap();
/// println!("rank {} of {}", group.rank(), group.size());
///
/// group.shutdown();
/// ```
pub struct Group {
    rank: i32,
    size: i32,
    shmem: Shmem,
}

impl Group {
    /// Initialize the process group.
    ///
    /// In the launching process this creates a uniquely named shared segment,
    /// claims rank 0, spawns `size - 1` copies of the current executable
    /// (with the original command-line arguments, so every rank derives the
    /// same configuration), and blocks until all ranks have joined. In a
    /// spawned process it opens the existing segment, claims a free rank,
    /// and blocks the same way; `size` is then taken from the segment, not
    /// from the argument.
    ///
    /// # Arguments
    ///
    /// * `size` - The total number of ranks, in `1..=32`
    ///
    /// # Errors
    ///
    /// Fails if the size is out of range, the segment cannot be created or
    /// opened, or a child process cannot be spawned.
    pub fn init(size: i32) -> Result<Self> {
        if size <= 0 || size as usize > MAX_RANKS {
            return Err(Error::Init(format!(
                "group size must be in 1..={}, got {}",
                MAX_RANKS, size
            )));
        }

        if std::env::var(SPAWNED_ENV).is_ok() {
            return Self::init_spawned();
        }

        debug!("initializing group with {} ranks", size);

        // One slot for each ordered (src, dst) pair.
        let state_size = std::mem::size_of::<SharedState>();
        let total_slots = (size * size) as usize;
        let total_size = state_size + total_slots * (HEADER_SIZE + MAX_MSG_SIZE);

        // The segment name is unique per run so a leftover link file from an
        // aborted run cannot collide with this one.
        let segment = format!("matadd_{}", std::process::id());

        debug!("creating segment {} of {} bytes", segment, total_size);

        let shmem = ShmemConf::new()
            .size(total_size)
            .flink(&segment)
            .create()
            .map_err(|e| Error::SharedMemory(e.to_string()))?;

        unsafe {
            let state = &mut *(shmem.as_ptr() as *mut SharedState);
            state.size.store(size as usize, Ordering::SeqCst);
            state.released.store(false, Ordering::SeqCst);
            for i in 0..size as usize {
                state.process_ids[i].store(0, Ordering::SeqCst);
                state.init_flags[i].store(false, Ordering::SeqCst);
                state.done_flags[i].store(false, Ordering::SeqCst);
            }
            state.process_ids[0].store(std::process::id() as usize, Ordering::SeqCst);
            state.init_flags[0].store(true, Ordering::SeqCst);

            let base_ptr = shmem.as_ptr().add(state_size);
            for i in 0..total_slots {
                let header_ptr = base_ptr.add(i * (HEADER_SIZE + MAX_MSG_SIZE)) as *mut MessageHeader;
                std::ptr::write(header_ptr, MessageHeader::new());
            }

            // Everything the children need is in place; mark the segment live.
            state.initialized.store(true, Ordering::SeqCst);
        }

        let exe = std::env::current_exe().map_err(|e| Error::Process(e.to_string()))?;
        for _ in 1..size {
            Command::new(&exe)
                .args(std::env::args().skip(1))
                .env(SPAWNED_ENV, "1")
                .env(SEGMENT_ENV, &segment)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| Error::Process(e.to_string()))?;
        }

        debug!("launching process joined as rank 0");

        let group = Group {
            rank: 0,
            size,
            shmem,
        };
        group.wait_all_joined();
        Ok(group)
    }

    /// Join an existing group as a spawned rank.
    fn init_spawned() -> Result<Self> {
        let segment = std::env::var(SEGMENT_ENV)
            .map_err(|_| Error::Init("spawned process is missing the segment name".into()))?;

        debug!("spawned process opening segment {}", segment);

        let shmem = ShmemConf::new()
            .flink(&segment)
            .open()
            .map_err(|e| Error::SharedMemory(e.to_string()))?;

        let (rank, size) = unsafe {
            let state = &*(shmem.as_ptr() as *const SharedState);
            while !state.initialized.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            let size = state.size.load(Ordering::SeqCst) as i32;

            // Claim a free rank by swinging its process ID from 0 to ours.
            let pid = std::process::id() as usize;
            let mut rank = -1;
            for i in 1..size {
                if state.process_ids[i as usize]
                    .compare_exchange(0, pid, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    rank = i;
                    break;
                }
            }
            if rank == -1 {
                return Err(Error::Init(format!("no free rank for process {}", pid)));
            }

            state.init_flags[rank as usize].store(true, Ordering::SeqCst);
            (rank, size)
        };

        debug!("process {} joined as rank {}", std::process::id(), rank);

        let group = Group { rank, size, shmem };
        group.wait_all_joined();
        Ok(group)
    }

    fn state(&self) -> &SharedState {
        unsafe { &*(self.shmem.as_ptr() as *const SharedState) }
    }

    fn wait_all_joined(&self) {
        let state = self.state();
        loop {
            let joined = (0..self.size as usize)
                .all(|i| state.init_flags[i].load(Ordering::SeqCst));
            if joined {
                break;
            }
            std::hint::spin_loop();
        }
    }

    /// The rank of this process, in `[0, size)`.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// The total number of ranks in the group, fixed at [`Group::init`].
    pub fn size(&self) -> i32 {
        self.size
    }

    fn check_rank(&self, rank: i32) -> Result<()> {
        if rank < 0 || rank >= self.size {
            return Err(Error::InvalidRank(rank));
        }
        Ok(())
    }

    fn slot_ptr(&self, src: i32, dst: i32) -> *mut u8 {
        let state_size = std::mem::size_of::<SharedState>();
        unsafe {
            self.shmem
                .as_ptr()
                .add(state_size + slot_offset(src, dst, self.size))
        }
    }

    /// Send a value to another rank, blocking until it has been received.
    ///
    /// The value is serialized with bincode into the slot owned by the
    /// `(self, dest)` pair. If a previous message in that slot has not been
    /// consumed yet, the call waits for the slot to free up first.
    ///
    /// # Arguments
    ///
    /// * `data` - The value to send
    /// * `dest` - The receiving rank
    /// * `tag` - Message identifier matched by the receiver
    pub fn send<T: Serialize>(&self, data: &T, dest: i32, tag: i32) -> Result<()> {
        self.check_rank(dest)?;

        debug!("rank {} sending to rank {} with tag {}", self.rank, dest, tag);

        let payload =
            bincode::serialize(data).map_err(|e| Error::Serialization(e.to_string()))?;
        if payload.len() > MAX_MSG_SIZE {
            return Err(Error::Communication(format!(
                "message of {} bytes exceeds the {} byte slot",
                payload.len(),
                MAX_MSG_SIZE
            )));
        }

        let slot_ptr = self.slot_ptr(self.rank, dest);
        let header = unsafe { &mut *(slot_ptr as *mut MessageHeader) };

        while header.valid.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }

        unsafe {
            header.tag = tag;
            header.source = self.rank;
            header.size = payload.len();
            header.received.store(false, Ordering::SeqCst);

            let data_ptr = slot_ptr.add(HEADER_SIZE);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), data_ptr, payload.len());

            header.valid.store(true, Ordering::SeqCst);

            while !header.received.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
        }

        debug!("rank {} completed send to rank {}", self.rank, dest);
        Ok(())
    }

    /// Receive a value from another rank, blocking until one with a matching
    /// tag arrives.
    pub fn recv<T: DeserializeOwned>(&self, source: i32, tag: i32) -> Result<T> {
        self.check_rank(source)?;

        debug!(
            "rank {} receiving from rank {} with tag {}",
            self.rank, source, tag
        );

        let slot_ptr = self.slot_ptr(source, self.rank);
        let header = unsafe { &mut *(slot_ptr as *mut MessageHeader) };

        while !header.valid.load(Ordering::SeqCst)
            || header.source != source
            || header.tag != tag
        {
            std::hint::spin_loop();
        }

        let result = unsafe {
            let data_ptr = slot_ptr.add(HEADER_SIZE);
            let data = std::slice::from_raw_parts(data_ptr, header.size);
            bincode::deserialize(data).map_err(|e| Error::Serialization(e.to_string()))?
        };

        header.received.store(true, Ordering::SeqCst);
        header.valid.store(false, Ordering::SeqCst);

        debug!("rank {} completed receive from rank {}", self.rank, source);
        Ok(result)
    }

    /// Block until every rank in the group has reached this call.
    fn barrier(&self) -> Result<()> {
        const BARRIER_ARRIVE_TAG: i32 = -1;
        const BARRIER_COMPLETE_TAG: i32 = -2;

        debug!("rank {} entering barrier", self.rank);

        // First phase: everyone reports to rank 0.
        if self.rank == 0 {
            for rank in 1..self.size {
                self.recv::<()>(rank, BARRIER_ARRIVE_TAG)?;
            }
        } else {
            self.send(&(), 0, BARRIER_ARRIVE_TAG)?;
        }

        // Second phase: rank 0 releases everyone.
        if self.rank == 0 {
            for rank in 1..self.size {
                self.send(&(), rank, BARRIER_COMPLETE_TAG)?;
            }
        } else {
            self.recv::<()>(0, BARRIER_COMPLETE_TAG)?;
        }

        debug!("rank {} exiting barrier", self.rank);
        Ok(())
    }

    /// Replicate one value from `root` to every rank.
    ///
    /// Collective: every rank must call this with the same `root`. The root
    /// passes `Some(value)`, everyone else `None`; all ranks return the
    /// root's value.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use matadd::Group;
    ///
    /// let group = Group::init(4).unwrap();
    ///
    /// let data = if group.rank() == 0 { Some(vec![1, 2, 3]) } else { None };
    /// let result = group.broadcast(data.as_ref(), 0).unwrap();
    /// assert_eq!(result, vec![1, 2, 3]);
    ///
    /// group.shutdown();
    /// ```
    pub fn broadcast<T: Serialize + DeserializeOwned + Clone>(
        &self,
        data: Option<&T>,
        root: i32,
    ) -> Result<T> {
        self.check_rank(root)?;

        debug!("rank {} entering broadcast", self.rank);

        let result = if self.rank == root {
            let data =
                data.ok_or_else(|| Error::Init("root must provide data for broadcast".into()))?;
            for rank in 0..self.size {
                if rank != root {
                    self.send(data, rank, 0)?;
                }
            }
            Ok(data.clone())
        } else {
            self.recv(root, 0)
        };

        debug!("rank {} completed broadcast", self.rank);
        result
    }

    /// Partition a slice across the group, one element per rank.
    ///
    /// Collective: the root passes `Some(slice)` with exactly `size`
    /// elements; element `i` goes to rank `i`. Every rank returns its own
    /// element.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use matadd::Group;
    ///
    /// let group = Group::init(4).unwrap();
    ///
    /// let data = if group.rank() == 0 {
    ///     Some((0..4).map(|i| i * 10).collect::<Vec<i32>>())
    /// } else {
    ///     None
    /// };
    /// let piece = group.scatter(data.as_deref(), 0).unwrap();
    /// assert_eq!(piece, group.rank() * 10);
    ///
    /// group.shutdown();
    /// ```
    pub fn scatter<T: Serialize + DeserializeOwned + Clone>(
        &self,
        data: Option<&[T]>,
        root: i32,
    ) -> Result<T> {
        self.check_rank(root)?;

        debug!("rank {} entering scatter", self.rank);

        let result = if self.rank == root {
            let data =
                data.ok_or_else(|| Error::Init("root must provide data for scatter".into()))?;
            if data.len() != self.size as usize {
                return Err(Error::Init(format!(
                    "scatter data has {} elements for {} ranks",
                    data.len(),
                    self.size
                )));
            }

            for (rank, item) in data.iter().enumerate() {
                if rank as i32 != root {
                    self.send(item, rank as i32, 0)?;
                }
            }
            data[root as usize].clone()
        } else {
            self.recv(root, 0)?
        };

        self.barrier()?;

        debug!("rank {} completed scatter", self.rank);
        Ok(result)
    }

    /// Collect one value from every rank onto `root`, ordered by rank.
    ///
    /// Collective: every rank contributes its value; the root returns
    /// `Some(values)` with the contribution of rank `i` at index `i`,
    /// everyone else returns `None`. The placement depends only on rank,
    /// never on arrival order.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use matadd::Group;
    ///
    /// let group = Group::init(4).unwrap();
    ///
    /// let gathered = group.gather(&group.rank(), 0).unwrap();
    /// if let Some(ranks) = gathered {
    ///     assert_eq!(ranks, vec![0, 1, 2, 3]);
    /// }
    ///
    /// group.shutdown();
    /// ```
    pub fn gather<T: Serialize + DeserializeOwned + Clone>(
        &self,
        data: &T,
        root: i32,
    ) -> Result<Option<Vec<T>>> {
        self.check_rank(root)?;

        debug!("rank {} entering gather", self.rank);

        let result = if self.rank == root {
            let mut result = Vec::with_capacity(self.size as usize);
            for rank in 0..self.size {
                if rank == self.rank {
                    result.push(data.clone());
                } else {
                    result.push(self.recv(rank, 0)?);
                }
            }
            Some(result)
        } else {
            self.send(data, root, 0)?;
            None
        };

        self.barrier()?;

        debug!("rank {} completed gather", self.rank);
        Ok(result)
    }

    /// Leave the group cleanly, synchronizing shutdown across all ranks.
    ///
    /// Every rank checks in, rank 0 waits for the full roster and then
    /// releases the others; only then is the segment's link file removed.
    /// Call this exactly once per rank, after the last communication.
    pub fn shutdown(self) {
        let state = self.state();
        state.done_flags[self.rank as usize].store(true, Ordering::SeqCst);

        if self.rank == 0 {
            loop {
                let done = (0..self.size as usize)
                    .all(|i| state.done_flags[i].load(Ordering::SeqCst));
                if done {
                    break;
                }
                std::hint::spin_loop();
            }
            state.released.store(true, Ordering::SeqCst);
            // Dropping the owning mapping unlinks the segment; the other
            // ranks keep their own mappings until they return.
        } else {
            while !state.released.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
        }
        debug!("rank {} left the group", self.rank);
    }

    /// Terminate this process abnormally with the given exit code.
    ///
    /// The group has no meaning once a precondition fails, so there is no
    /// recovery path: each rank that detects the failure calls this
    /// independently and the whole group dies. Skips shutdown
    /// synchronization and segment cleanup on purpose.
    pub fn abort(&self, code: i32) -> ! {
        debug!("rank {} aborting with code {}", self.rank, code);
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_offsets_are_distinct_per_pair() {
        let size = 4;
        let mut seen = std::collections::HashSet::new();
        for src in 0..size {
            for dst in 0..size {
                assert!(seen.insert(slot_offset(src, dst, size)));
            }
        }
    }

    #[test]
    fn slot_offsets_are_slot_aligned() {
        let slot = HEADER_SIZE + MAX_MSG_SIZE;
        assert_eq!(slot_offset(0, 0, 4), 0);
        assert_eq!(slot_offset(0, 1, 4), slot);
        assert_eq!(slot_offset(1, 0, 4), 4 * slot);
        assert_eq!(slot_offset(3, 3, 4), 15 * slot);
    }
}

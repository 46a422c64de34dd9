//! Process group collaborators
//!
//! A process group answers "which rank am I, out of how many" and provides a
//! barrier. Dataset sources receive one by injection; nothing here is global.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StrataError};

/// Rank/world-size query plus a collective barrier
pub trait ProcessGroup: Send + Sync + fmt::Debug {
    /// `(rank, world_size)` of the calling process
    fn rank_and_world_size(&self) -> (usize, usize);

    /// Block until every rank in the group has called `barrier`
    fn barrier(&self) -> Result<()>;

    fn rank(&self) -> usize {
        self.rank_and_world_size().0
    }

    fn world_size(&self) -> usize {
        self.rank_and_world_size().1
    }

    /// Returns true on rank 0
    fn is_main(&self) -> bool {
        self.rank() == 0
    }
}

/// Non-distributed run: rank 0 of 1
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank_and_world_size(&self) -> (usize, usize) {
        (0, 1)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

struct BarrierState {
    arrived: Vec<usize>,
    generation: u64,
}

/// Generation-counted barrier shared by the ranks of a `LocalGroup`
struct SharedBarrier {
    state: Mutex<BarrierState>,
    released: Condvar,
    world_size: usize,
}

impl SharedBarrier {
    fn wait(&self, rank: usize) {
        let mut state = self.state.lock();
        let generation = state.generation;
        if !state.arrived.contains(&rank) {
            state.arrived.push(rank);
        }

        if state.arrived.len() >= self.world_size {
            // Last arrival releases everyone and opens the next generation
            state.arrived.clear();
            state.generation += 1;
            self.released.notify_all();
            return;
        }

        while state.generation == generation {
            self.released.wait(&mut state);
        }
    }
}

/// In-process group whose ranks run on threads of one process
#[derive(Clone)]
pub struct LocalGroup {
    rank: usize,
    barrier: Arc<SharedBarrier>,
}

impl LocalGroup {
    /// Create `world_size` connected ranks, indexed by rank
    pub fn new(world_size: usize) -> Vec<LocalGroup> {
        let barrier = Arc::new(SharedBarrier {
            state: Mutex::new(BarrierState {
                arrived: Vec::with_capacity(world_size),
                generation: 0,
            }),
            released: Condvar::new(),
            world_size: world_size.max(1),
        });
        (0..world_size.max(1))
            .map(|rank| LocalGroup {
                rank,
                barrier: barrier.clone(),
            })
            .collect()
    }
}

impl fmt::Debug for LocalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalGroup")
            .field("rank", &self.rank)
            .field("world_size", &self.barrier.world_size)
            .finish()
    }
}

impl ProcessGroup for LocalGroup {
    fn rank_and_world_size(&self) -> (usize, usize) {
        (self.rank, self.barrier.world_size)
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait(self.rank);
        Ok(())
    }
}

/// Multi-process group configured from `RANK` / `WORLD_SIZE` / `JOB_ID`
///
/// The barrier is a directory of marker files on storage every rank can see.
/// Each rank writes `<dir>/job-<id>/gen-NNNNNN/rank-RRRR` holding the job id
/// and polls until every marker of the generation exists and carries that id.
/// Markers left behind by other jobs are never counted.
#[derive(Debug)]
pub struct EnvGroup {
    rank: usize,
    world_size: usize,
    job_id: String,
    barrier_dir: PathBuf,
    generation: AtomicU64,
    poll_interval: Duration,
}

impl EnvGroup {
    /// Group for `rank` of `world_size`; `job_id` must be unique to the run
    pub fn new(
        rank: usize,
        world_size: usize,
        barrier_root: impl Into<PathBuf>,
        job_id: impl Into<String>,
    ) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(StrataError::InvalidConfig {
                reason: format!("rank {} invalid for world size {}", rank, world_size),
            });
        }
        let job_id = job_id.into();
        let valid_id = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_id {
            return Err(StrataError::InvalidConfig {
                reason: format!(
                    "job id '{}' must be non-empty ASCII alphanumerics, '-', '_' or '.'",
                    job_id
                ),
            });
        }
        let barrier_dir = barrier_root.into().join(format!("job-{}", job_id));
        Ok(Self {
            rank,
            world_size,
            job_id,
            barrier_dir,
            generation: AtomicU64::new(0),
            poll_interval: Duration::from_millis(50),
        })
    }

    /// Read `RANK`, `WORLD_SIZE` and `JOB_ID`, defaulting to a single process
    ///
    /// `JOB_ID` is required when `WORLD_SIZE > 1`.
    pub fn from_env(barrier_root: impl Into<PathBuf>) -> Result<Self> {
        let rank = env_usize("RANK", 0)?;
        let world_size = env_usize("WORLD_SIZE", 1)?;
        let job_id = match std::env::var("JOB_ID") {
            Ok(id) => id,
            Err(_) if world_size == 1 => "local".to_string(),
            Err(_) => {
                return Err(StrataError::InvalidConfig {
                    reason: format!("JOB_ID must be set when WORLD_SIZE={}", world_size),
                })
            }
        };
        Self::new(rank, world_size, barrier_root, job_id)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Directory holding this job's barrier generations
    pub fn barrier_dir(&self) -> &Path {
        &self.barrier_dir
    }

    /// Markers in `dir` written by `job_id`
    fn arrived(dir: &Path, job_id: &str) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("rank-") || name.ends_with(".part") {
                continue;
            }
            // A marker may vanish or be rewritten between listing and reading
            match fs::read_to_string(entry.path()) {
                Ok(owner) if owner == job_id => count += 1,
                Ok(_) | Err(_) => {}
            }
        }
        Ok(count)
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| StrataError::InvalidConfig {
            reason: format!("{}={} is not a non-negative integer", name, value),
        }),
        Err(_) => Ok(default),
    }
}

impl ProcessGroup for EnvGroup {
    fn rank_and_world_size(&self) -> (usize, usize) {
        (self.rank, self.world_size)
    }

    fn barrier(&self) -> Result<()> {
        if self.world_size == 1 {
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let dir = self.barrier_dir.join(format!("gen-{:06}", generation));
        fs::create_dir_all(&dir)?;

        let marker = dir.join(format!("rank-{:04}", self.rank));
        let partial = dir.join(format!("rank-{:04}.part", self.rank));
        fs::write(&partial, self.job_id.as_bytes())?;
        fs::rename(&partial, &marker)?;
        debug!(
            "Rank {} entered barrier generation {} at {}",
            self.rank,
            generation,
            dir.display()
        );

        while Self::arrived(&dir, &self.job_id)? < self.world_size {
            std::thread::sleep(self.poll_interval);
        }

        debug!("Rank {} released from barrier generation {}", self.rank, generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    #[test]
    fn test_single_process() {
        let group = SingleProcess;
        assert_eq!(group.rank_and_world_size(), (0, 1));
        assert!(group.is_main());
        group.barrier().unwrap();
    }

    #[test]
    fn test_local_group_barrier_orders_phases() {
        let ranks = LocalGroup::new(4);
        let before = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = ranks
            .into_iter()
            .map(|group| {
                let before = before.clone();
                thread::spawn(move || {
                    for round in 1..=3 {
                        before.fetch_add(1, Ordering::SeqCst);
                        group.barrier().unwrap();
                        assert!(before.load(Ordering::SeqCst) >= 4 * round);
                        group.barrier().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(before.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_env_group_rejects_bad_rank() {
        assert!(EnvGroup::new(2, 2, "/tmp/unused", "job").is_err());
        assert!(EnvGroup::new(0, 0, "/tmp/unused", "job").is_err());
        assert!(EnvGroup::new(0, 2, "/tmp/unused", "").is_err());
        assert!(EnvGroup::new(0, 2, "/tmp/unused", "../escape").is_err());
    }

    #[test]
    fn test_env_group_file_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..3)
            .map(|rank| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    let group = EnvGroup::new(rank, 3, path, "train-1")
                        .unwrap()
                        .with_poll_interval(Duration::from_millis(5));
                    group.barrier().unwrap();
                    group.barrier().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        let generation = dir.path().join("job-train-1").join("gen-000001");
        assert_eq!(EnvGroup::arrived(&generation, "train-1").unwrap(), 3);
    }

    #[test]
    fn test_env_group_ignores_stale_markers() {
        let dir = tempfile::tempdir().unwrap();

        // A finished two-rank run of an earlier job
        let earlier: Vec<_> = (0..2)
            .map(|rank| {
                let path = dir.path().to_path_buf();
                thread::spawn(move || {
                    EnvGroup::new(rank, 2, path, "run-a")
                        .unwrap()
                        .with_poll_interval(Duration::from_millis(5))
                        .barrier()
                        .unwrap();
                })
            })
            .collect();
        for handle in earlier {
            handle.join().unwrap();
        }

        // Leftover marker from another job inside the new job's generation
        let stale = dir.path().join("job-run-b").join("gen-000000");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("rank-0000"), b"run-a").unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let lone = {
            let path = dir.path().to_path_buf();
            let released = released.clone();
            thread::spawn(move || {
                EnvGroup::new(1, 2, path, "run-b")
                    .unwrap()
                    .with_poll_interval(Duration::from_millis(5))
                    .barrier()
                    .unwrap();
                released.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!released.load(Ordering::SeqCst));

        EnvGroup::new(0, 2, dir.path(), "run-b")
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
            .barrier()
            .unwrap();
        lone.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }
}

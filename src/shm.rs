//! Anonymous shared-memory regions, pools, and pixel buffers.
//!
//! The allocator produces unlinked memory-backed descriptors: a short
//! clock-seeded name is created exclusively, then unlinked immediately,
//! leaving a region reachable only through the open descriptor. The
//! region is handed to the compositor by fd and carved into buffers;
//! a buffer stays logically busy from submission until the compositor's
//! release event.

use std::cell::Cell;
use std::num::NonZeroUsize;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::AllocError;

/// How many fresh names to try before giving up on pathological
/// collision behavior.
pub const ALLOC_RETRY_BUDGET: u32 = 100;

static REGION_SEQ: AtomicU32 = AtomicU32::new(0);

fn region_name() -> String {
    // uniqueness, not secrecy: the name lives only between create and
    // unlink, so clock jitter plus a process-local counter is enough
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let seq = REGION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("/wayline-shm-{:08x}-{:04x}", nanos, seq)
}

/// Allocate an anonymous shared-memory region of `len` bytes and return
/// its descriptor. The backing name is already unlinked on return; the
/// region lives until every descriptor and mapping referencing it is
/// gone.
pub fn alloc_shm_region(len: usize) -> Result<RawFd, AllocError> {
    alloc_shm_region_with(len, ALLOC_RETRY_BUDGET, region_name)
}

pub(crate) fn alloc_shm_region_with<F>(len: usize, budget: u32, mut name: F) -> Result<RawFd, AllocError>
where
    F: FnMut() -> String,
{
    for _ in 0..budget {
        let path = name();
        match mman::shm_open(
            path.as_str(),
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_CLOEXEC,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => {
                // unlink right away so the region is anonymous, then
                // size it for the caller
                if mman::shm_unlink(path.as_str()).is_err()
                    || unistd::ftruncate(fd, len as i64).is_err()
                {
                    let _ = unistd::close(fd);
                    return Err(AllocError::ResourceExhausted);
                }
                trace!("allocated {} byte shm region as {}", len, path);
                return Ok(fd);
            }
            // somebody holds this name right now; roll a fresh one
            Err(Errno::EEXIST) | Err(Errno::EINTR) => continue,
            Err(_) => return Err(AllocError::ResourceExhausted),
        }
    }
    Err(AllocError::ResourceExhausted)
}

/// A writable memory mapping over a region descriptor. Owns both the
/// mapping and the descriptor; the region is freed once the compositor
/// side lets go as well.
#[derive(Debug)]
pub struct ShmMapping {
    ptr: *mut std::ffi::c_void,
    len: usize,
    fd: RawFd,
}

impl ShmMapping {
    /// Map `len` bytes of `fd`, taking ownership of the descriptor.
    pub fn new(fd: RawFd, len: usize) -> Result<ShmMapping, AllocError> {
        let size = match NonZeroUsize::new(len) {
            Some(size) => size,
            None => {
                let _ = unistd::close(fd);
                return Err(AllocError::ResourceExhausted);
            }
        };
        let ptr = unsafe {
            mman::mmap(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        };
        match ptr {
            Ok(ptr) => Ok(ShmMapping { ptr, len, fd }),
            Err(_) => {
                let _ = unistd::close(fd);
                Err(AllocError::ResourceExhausted)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len) }
    }
}

impl Drop for ShmMapping {
    fn drop(&mut self) {
        unsafe {
            let _ = mman::munmap(self.ptr, self.len);
        }
        let _ = unistd::close(self.fd);
    }
}

/// A compositor-side pool carved out of one shared region, plus the
/// local mapping of the same bytes.
#[derive(Debug)]
pub struct ShmPool {
    pub(crate) id: u32,
    pub(crate) mapping: ShmMapping,
}

impl ShmPool {
    /// Protocol id of the pool object.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// The pool bytes, shared with the compositor. While any buffer
    /// carved from this pool is busy, the compositor may still be
    /// reading these bytes; check [`Buffer::is_busy`] before drawing
    /// over a submitted region.
    pub fn canvas(&mut self) -> &mut [u8] {
        self.mapping.bytes_mut()
    }
}

/// A pixel buffer carved from a [`ShmPool`], jointly owned with the
/// compositor from submission until its release event.
#[derive(Clone, Debug)]
pub struct Buffer {
    pub(crate) id: u32,
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub(crate) busy: Rc<Cell<bool>>,
}

impl Buffer {
    /// Protocol id of the buffer object.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the compositor still holds this buffer. Set on
    /// submission, cleared by the release event; the backing bytes must
    /// not be touched while this is true.
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }
}

/// Failure to create a pool through the session.
#[derive(Clone, Debug)]
pub enum PoolError {
    /// The compositor did not advertise `wl_shm`.
    ShmUnavailable,
    /// The local region could not be allocated or mapped.
    Alloc(AllocError),
    /// The session is no longer usable.
    Session(crate::SessionError),
}

impl std::error::Error for PoolError {}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PoolError::ShmUnavailable => f.write_str("compositor does not advertise wl_shm"),
            PoolError::Alloc(e) => write!(f, "shared memory allocation failed: {}", e),
            PoolError::Session(e) => write!(f, "session failure: {}", e),
        }
    }
}

impl From<AllocError> for PoolError {
    fn from(e: AllocError) -> PoolError {
        PoolError::Alloc(e)
    }
}

impl From<crate::SessionError> for PoolError {
    fn from(e: crate::SessionError) -> PoolError {
        PoolError::Session(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str, n: u32) -> String {
        format!("/wayline-test-{}-{}-{}", tag, std::process::id(), n)
    }

    #[test]
    fn regions_are_anonymous_on_return() {
        let fd = alloc_shm_region(4096).unwrap();
        let stat = nix::sys::stat::fstat(fd).unwrap();
        assert_eq!(stat.st_nlink as u64, 0, "backing name must be unlinked");
        assert_eq!(stat.st_size as u64, 4096);
        unistd::close(fd).unwrap();
    }

    #[test]
    fn regions_are_readable_and_writable_through_a_mapping() {
        let fd = alloc_shm_region(64).unwrap();
        let mut mapping = ShmMapping::new(fd, 64).unwrap();
        for (i, byte) in mapping.bytes_mut().iter_mut().enumerate() {
            *byte = i as u8;
        }
        assert_eq!(mapping.bytes_mut()[63], 63);
    }

    #[test]
    fn unique_names_never_exhaust_a_budget_of_one() {
        for n in 0..16 {
            let mut names = vec![test_name("unique", n)].into_iter();
            let fd = alloc_shm_region_with(128, 1, move || names.next().unwrap()).unwrap();
            unistd::close(fd).unwrap();
        }
    }

    #[test]
    fn collisions_retry_within_the_budget() {
        // occupy a name so the allocator's first attempt collides
        let taken = test_name("taken", 0);
        let holder = mman::shm_open(
            taken.as_str(),
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .unwrap();

        let mut sequence = vec![taken.clone(), test_name("fresh", 1)].into_iter();
        let fd = alloc_shm_region_with(128, 2, move || sequence.next().unwrap()).unwrap();
        unistd::close(fd).unwrap();

        // with a budget of one, the same collision is an exhaustion
        let mut sequence = vec![taken.clone()].into_iter();
        match alloc_shm_region_with(128, 1, move || sequence.next().unwrap()) {
            Err(AllocError::ResourceExhausted) => {}
            other => panic!("expected exhaustion, got {:?}", other),
        }

        mman::shm_unlink(taken.as_str()).unwrap();
        unistd::close(holder).unwrap();
    }
}

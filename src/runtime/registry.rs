//! Registry of watched descriptors.
//!
//! Two parallel vectors: the `pollfd` array handed to `poll(2)` (descriptor,
//! interest mask, readiness mask) and the entries owning those descriptors.
//! Capacity is managed in fixed chunks with hysteresis: it grows by one chunk
//! when an add would overflow it, and shrinks by one chunk only once the
//! count falls two chunks below it, so churn around a chunk boundary never
//! reallocates back and forth.
//!
//! Removal is a swap-remove. A caller iterating by index while removing must
//! look at the same index again, since the former last entry now lives there.

use std::io;
use std::os::unix::io::AsRawFd;

/// Default growth/shrink step, in entries.
pub const DEFAULT_CHUNK: usize = 1024;

/// Readiness the caller wants to be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(libc::c_short);

impl Interest {
    pub const READABLE: Interest = Interest(libc::POLLIN);
    pub const WRITABLE: Interest = Interest(libc::POLLOUT);

    pub fn bits(self) -> libc::c_short {
        self.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

/// Readiness reported by the last wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness(libc::c_short);

impl Readiness {
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(self) -> bool {
        self.0 & libc::POLLIN != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & libc::POLLOUT != 0
    }

    /// Peer hung up, or the descriptor is in an error state.
    pub fn is_hangup(self) -> bool {
        self.0 & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
    }
}

/// Chunked, index-addressed collection of descriptor-owning entries.
pub struct Registry<T> {
    polls: Vec<libc::pollfd>,
    entries: Vec<T>,
    capacity: usize,
    chunk: usize,
}

impl<T: AsRawFd> Registry<T> {
    pub fn new() -> Self {
        Self::with_chunk(DEFAULT_CHUNK)
    }

    /// Create an empty registry growing and shrinking by `chunk` entries.
    pub fn with_chunk(chunk: usize) -> Self {
        assert!(chunk > 0, "registry chunk must be non-zero");
        Self {
            polls: Vec::new(),
            entries: Vec::new(),
            capacity: 0,
            chunk,
        }
    }

    /// Append an entry watched for `interest`, returning its index.
    ///
    /// Fails only if growing the capacity cannot allocate.
    pub fn add(&mut self, entry: T, interest: Interest) -> io::Result<usize> {
        if self.entries.len() + 1 > self.capacity {
            self.grow()?;
        }

        self.polls.push(libc::pollfd {
            fd: entry.as_raw_fd(),
            events: interest.bits(),
            revents: 0,
        });
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Remove the entry at `index`, moving the last entry into its place.
    ///
    /// The returned entry still owns its descriptor; dropping it closes it.
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> T {
        self.polls.swap_remove(index);
        let entry = self.entries.swap_remove(index);

        let threshold = 2 * self.chunk;
        if self.capacity >= threshold && self.entries.len() <= self.capacity - threshold {
            self.capacity -= self.chunk;
            self.polls.shrink_to(self.capacity);
            self.entries.shrink_to(self.capacity);
        }
        entry
    }

    fn grow(&mut self) -> io::Result<()> {
        let capacity = self.capacity + self.chunk;
        let additional = capacity - self.entries.len();
        self.polls
            .try_reserve_exact(additional)
            .and_then(|_| self.entries.try_reserve_exact(additional))
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        self.capacity = capacity;
        Ok(())
    }

    /// Block until at least one entry is ready, with no timeout.
    ///
    /// Readiness of every entry is refreshed. With `sigmask`, the thread's
    /// signal mask is swapped for it atomically while waiting (`ppoll(2)`).
    /// A signal delivered while waiting, or already pending when the mask
    /// lets it through, surfaces as `ErrorKind::Interrupted`.
    pub fn wait(&mut self, sigmask: Option<&libc::sigset_t>) -> io::Result<usize> {
        let sigmask = sigmask.map_or(std::ptr::null(), |mask| mask as *const libc::sigset_t);
        // SAFETY: the pointer and length describe the live `polls` vector,
        // which is not touched for the duration of the call; `sigmask` is
        // null or borrowed for the call.
        let ret = unsafe {
            libc::ppoll(
                self.polls.as_mut_ptr(),
                self.polls.len() as libc::nfds_t,
                std::ptr::null(),
                sigmask,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    /// Readiness of the entry at `index` as of the last wait.
    pub fn readiness(&self, index: usize) -> Readiness {
        Readiness(self.polls[index].revents)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Drop every entry (closing its descriptor) and release all storage.
    pub fn clear(&mut self) {
        self.polls = Vec::new();
        self.entries = Vec::new();
        self.capacity = 0;
    }
}

impl<T: AsRawFd> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl<T> Registry<T> {
    /// Descriptor registered for the entry at `index`.
    pub fn fd(&self, index: usize) -> std::os::unix::io::RawFd {
        self.polls[index].fd
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current chunked capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::BlockedSignals;
    use std::collections::HashSet;
    use std::net::UdpSocket;
    use std::os::unix::io::RawFd;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Stand-in entry carrying a fake descriptor; never waited on.
    #[derive(Debug, PartialEq)]
    struct Fake(RawFd);

    impl AsRawFd for Fake {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }

    fn assert_consistent(registry: &Registry<Fake>) {
        let mut seen = HashSet::new();
        for (i, entry) in registry.iter().enumerate() {
            assert_eq!(registry.fd(i), entry.0);
            assert!(seen.insert(entry.0), "descriptor {} appears twice", entry.0);
        }
        assert_eq!(seen.len(), registry.len());
        assert!(registry.len() <= registry.capacity());
    }

    #[test]
    fn test_add_and_swap_remove() {
        let mut registry = Registry::with_chunk(4);
        for fd in 10..15 {
            registry.add(Fake(fd), Interest::READABLE).unwrap();
        }
        assert_eq!(registry.len(), 5);

        // Removing index 1 moves the last entry (14) into its slot.
        assert_eq!(registry.remove(1), Fake(11));
        assert_eq!(registry.get(1), Some(&Fake(14)));
        assert_eq!(registry.fd(1), 14);
        assert_eq!(registry.len(), 4);

        // Removing the last entry needs no swap.
        assert_eq!(registry.remove(3), Fake(13));
        assert_eq!(registry.get(3), None);
        assert_consistent(&registry);
    }

    #[test]
    fn test_swapped_entry_keeps_its_own_state() {
        let mut registry = Registry::with_chunk(2);
        registry.add(Fake(3), Interest::READABLE).unwrap();
        registry
            .add(Fake(4), Interest::READABLE | Interest::WRITABLE)
            .unwrap();
        registry.add(Fake(5), Interest::WRITABLE).unwrap();

        registry.remove(0);
        assert_eq!(registry.get(0), Some(&Fake(5)));
        assert_eq!(registry.polls[0].events, libc::POLLOUT);
        assert_eq!(registry.polls[1].events, libc::POLLIN | libc::POLLOUT);
    }

    #[test]
    fn test_growth_is_chunked() {
        let chunk = 8;
        let mut registry = Registry::with_chunk(chunk);
        let mut resizes = 0;
        let mut capacity = registry.capacity();

        let n = 30;
        for fd in 0..n {
            registry.add(Fake(fd), Interest::READABLE).unwrap();
            if registry.capacity() != capacity {
                resizes += 1;
                capacity = registry.capacity();
            }
        }

        assert_eq!(resizes, (n as usize).div_ceil(chunk));
        assert_eq!(registry.capacity(), 32);
        assert_consistent(&registry);
    }

    #[test]
    fn test_shrink_hysteresis() {
        let chunk = 4;
        let mut registry = Registry::with_chunk(chunk);
        for fd in 0..16 {
            registry.add(Fake(fd), Interest::READABLE).unwrap();
        }
        assert_eq!(registry.capacity(), 16);

        // Count must drop two chunks below capacity before shrinking.
        while registry.len() > 9 {
            registry.remove(0);
        }
        assert_eq!(registry.capacity(), 16);
        registry.remove(0);
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.capacity(), 12);

        while !registry.is_empty() {
            let len = registry.len();
            registry.remove(len - 1);
            assert!(registry.capacity() >= registry.len());
        }
        assert_eq!(registry.capacity(), chunk);
    }

    #[test]
    fn test_no_thrash_at_chunk_boundary() {
        let chunk = 4;
        let mut registry = Registry::with_chunk(chunk);
        for fd in 0..4 {
            registry.add(Fake(fd), Interest::READABLE).unwrap();
        }
        assert_eq!(registry.capacity(), 4);

        let mut changes = 0;
        let mut capacity = registry.capacity();
        for round in 0..100 {
            registry.add(Fake(100 + round), Interest::READABLE).unwrap();
            if registry.capacity() != capacity {
                changes += 1;
                capacity = registry.capacity();
            }
            let last = registry.len() - 1;
            registry.remove(last);
            if registry.capacity() != capacity {
                changes += 1;
                capacity = registry.capacity();
            }
        }

        // One growth on the first crossing, never a shrink afterwards.
        assert_eq!(changes, 1);
        assert_eq!(registry.capacity(), 8);
    }

    #[test]
    fn test_random_churn_keeps_invariants() {
        let mut registry = Registry::with_chunk(3);
        let mut next_fd = 0;
        let mut live = 0usize;

        // Deterministic pseudo-random add/remove mix.
        let mut state: u32 = 0x2545_f491;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;

            if registry.is_empty() || state % 3 != 0 {
                registry.add(Fake(next_fd), Interest::READABLE).unwrap();
                next_fd += 1;
                live += 1;
            } else {
                let index = state as usize % registry.len();
                registry.remove(index);
                live -= 1;
            }
            assert_eq!(registry.len(), live);
        }
        assert_consistent(&registry);
    }

    #[test]
    fn test_wait_reports_readiness() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b_addr = b.local_addr().unwrap();

        let mut registry = Registry::with_chunk(2);
        registry.add(b, Interest::READABLE).unwrap();
        registry.add(a, Interest::READABLE).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"ping", b_addr).unwrap();

        assert_eq!(registry.wait(None).unwrap(), 1);
        assert!(registry.readiness(0).is_readable());
        assert!(!registry.readiness(0).is_hangup());
        assert!(registry.readiness(1).is_empty());
    }

    static WOKEN: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_wake(_: libc::c_int) {
        WOKEN.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_signal_pending_before_wait_interrupts_it() {
        // SAFETY: the handler only stores to an atomic.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_wake as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR2, &action, std::ptr::null_mut()), 0);
        }

        std::thread::spawn(|| {
            let idle = UdpSocket::bind("127.0.0.1:0").unwrap();
            let mut registry = Registry::with_chunk(2);
            registry.add(idle, Interest::READABLE).unwrap();

            let blocked = BlockedSignals::block(&[libc::SIGUSR2]).unwrap();
            // SAFETY: signalling the current thread.
            unsafe {
                libc::pthread_kill(libc::pthread_self(), libc::SIGUSR2);
            }
            // Blocked: the signal is held until the wait lets it through.
            assert!(!WOKEN.load(Ordering::SeqCst));

            let err = registry.wait(Some(blocked.wait_mask())).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::Interrupted);
            assert!(WOKEN.load(Ordering::SeqCst));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut registry = Registry::with_chunk(2);
        for fd in 0..5 {
            registry.add(Fake(fd), Interest::READABLE).unwrap();
        }
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.capacity(), 0);
    }
}

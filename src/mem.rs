//! Physical memory management: the frame descriptors, the list of free
//! blocks threaded through them, and the buddy allocator working on both.

pub mod buddy;
mod check;
pub mod free_list;
pub mod page;

pub use buddy::{round_up_pow2, BuddyAllocator, MAX_BLOCK};
pub use free_list::FreeList;
pub use page::{Link, Page, PageFlags};

use core::fmt;
use displaydoc_lite::displaydoc;
use spin::{Mutex, MutexGuard};

/// Result for every page allocation operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while allocating page frames.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// tried to allocate zero frames.
        ZeroFrames,
        /// there are not enough free frames left to satisfy the request.
        OutOfFrames,
        /// enough frames are free, but no single free block is large enough.
        Fragmented,
    }
}

/// A broken invariant found by [`BuddyAllocator::validate`].
///
/// Every variant except [`CountMismatch`](Corruption::CountMismatch) carries
/// the frame at which the walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// The free list contains a frame without the head flag.
    NotAHead(usize),
    /// The back link of a listed frame does not point to its predecessor.
    BrokenLink(usize),
    /// A free block is not a power of two or exceeds the maximum block size.
    BadBlockSize(usize),
    /// A free block is listed before a block with a lower address.
    Unordered(usize),
    /// A free block overlaps its predecessor.
    Overlapping(usize),
    /// A frame carries block metadata, but is not a listed block head.
    StrayHead(usize),
    /// A frame inside a free block is reserved or referenced.
    InUse(usize),
    /// The free frame counter does not match the free list.
    CountMismatch,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Corruption::NotAHead(frame) => {
                write!(f, "frame {:#x} is part of the free list, but is not a block head", frame)
            }
            Corruption::BrokenLink(frame) => {
                write!(f, "the back link of frame {:#x} does not point to its predecessor", frame)
            }
            Corruption::BadBlockSize(frame) => write!(
                f,
                "the free block at frame {:#x} is not a power of two or too large",
                frame
            ),
            Corruption::Unordered(frame) => {
                write!(f, "the free block at frame {:#x} is out of address order", frame)
            }
            Corruption::Overlapping(frame) => {
                write!(f, "the free block at frame {:#x} overlaps its predecessor", frame)
            }
            Corruption::StrayHead(frame) => write!(
                f,
                "frame {:#x} carries block metadata, but is not a listed block head",
                frame
            ),
            Corruption::InUse(frame) => write!(
                f,
                "frame {:#x} is inside a free block, but is reserved or referenced",
                frame
            ),
            Corruption::CountMismatch => {
                f.write_str("the free frame counter does not match the free list")
            }
        }
    }
}

/// Statistics for a page allocator, counted in frames.
#[derive(Debug, Clone)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// The number of frames that are handed out.
    pub allocated: usize,
    /// The number of frames that are left for allocation.
    pub free: usize,
    /// The total number of frames that were mapped into the allocator.
    pub total: usize,
    /// The number of free blocks.
    pub blocks: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            allocated: 0,
            free: 0,
            total: 0,
            blocks: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nAllocated frames: {}", self.allocated)?;
        writeln!(f, "Free frames:      {}", self.free)?;
        writeln!(f, "Total frames:     {}", self.total)?;
        writeln!(f, "Free blocks:      {}", self.blocks)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}

/// The operations the memory subsystem needs from a physical page allocator.
///
/// Blocks are identified by the frame number of their first frame.
pub trait PageAllocator {
    /// The name of the allocation algorithm.
    fn name(&self) -> &'static str;

    /// Make a region of reserved frames, starting at `base`, available for allocation.
    fn init_memmap(&mut self, base: usize, count: usize);

    /// Allocate `count` contiguous frames and return the first one.
    fn alloc_pages(&mut self, count: usize) -> Result<usize>;

    /// Give `count` frames starting at `base` back to the allocator.
    fn free_pages(&mut self, base: usize, count: usize);

    /// Return the number of free frames.
    fn nr_free_pages(&self) -> usize;

    /// Run the self-test, panicking if anything is off.
    fn check(&mut self);
}

/// A [`PageAllocator`] behind a spinlock, so it can be shared
/// by the whole kernel.
pub struct LockedAllocator<A>(Mutex<A>);

impl<A: PageAllocator> LockedAllocator<A> {
    /// Wrap the given allocator.
    pub const fn new(allocator: A) -> Self {
        Self(Mutex::new(allocator))
    }

    /// Lock the allocator for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.0.lock()
    }

    /// Make a region of reserved frames available for allocation.
    pub fn init_memmap(&self, base: usize, count: usize) {
        self.0.lock().init_memmap(base, count)
    }

    /// Allocate a single frame.
    pub fn alloc(&self) -> Result<usize> {
        self.0.lock().alloc_pages(1)
    }

    /// Allocate multiple contiguous frames.
    pub fn alloc_pages(&self, count: usize) -> Result<usize> {
        self.0.lock().alloc_pages(count)
    }

    /// Give frames back to the allocator.
    pub fn free_pages(&self, base: usize, count: usize) {
        self.0.lock().free_pages(base, count)
    }

    /// Return the number of free frames.
    pub fn nr_free_pages(&self) -> usize {
        self.0.lock().nr_free_pages()
    }

    /// Run the self-test of the inner allocator.
    pub fn check(&self) {
        self.0.lock().check()
    }

    /// Unwrap the inner allocator.
    pub fn into_inner(self) -> A {
        self.0.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn locked_allocator() {
        let mut pages = vec![Page::reserved(); 64];
        let allocator = LockedAllocator::new(BuddyAllocator::with_max_block(&mut pages, 64));
        allocator.init_memmap(0, 64);
        assert_eq!(allocator.nr_free_pages(), 64);

        let single = allocator.alloc().unwrap();
        let block = allocator.alloc_pages(3).unwrap();
        assert_ne!(single, block);
        assert_eq!(allocator.nr_free_pages(), 59);

        allocator.free_pages(block, 3);
        allocator.free_pages(single, 1);
        assert_eq!(allocator.nr_free_pages(), 64);

        allocator.check();
        assert_eq!(allocator.lock().free_blocks().count(), 1);
        assert_eq!(allocator.into_inner().nr_free_pages(), 64);
    }

    #[test]
    fn shared_between_threads() {
        let pages: &'static mut [Page] = Box::leak(vec![Page::reserved(); 256].into_boxed_slice());
        let allocator: &'static LockedAllocator<BuddyAllocator<'static>> = Box::leak(Box::new(
            LockedAllocator::new(BuddyAllocator::with_max_block(pages, 256)),
        ));
        allocator.init_memmap(0, 256);

        let workers = (0..4)
            .map(|_| {
                thread::spawn(move || {
                    for count in 1..=8 {
                        let block = allocator.alloc_pages(count).unwrap();
                        allocator.free_pages(block, count);
                    }
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(allocator.nr_free_pages(), 256);
        assert_eq!(allocator.lock().validate(), Ok(()));
    }

    #[test]
    fn trait_object() {
        let mut pages = vec![Page::reserved(); 32];
        let mut buddy = BuddyAllocator::with_max_block(&mut pages, 32);
        let allocator: &mut dyn PageAllocator = &mut buddy;

        allocator.init_memmap(0, 32);
        assert_eq!(allocator.name(), "buddy_pmm_manager");
        assert_eq!(allocator.alloc_pages(0), Err(Error::ZeroFrames));
        assert_eq!(allocator.alloc_pages(33), Err(Error::OutOfFrames));

        let block = allocator.alloc_pages(16).unwrap();
        allocator.free_pages(block, 16);
        assert_eq!(allocator.nr_free_pages(), 32);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            Error::ZeroFrames.to_string().trim(),
            "tried to allocate zero frames."
        );
        assert_eq!(
            Corruption::NotAHead(0x7).to_string(),
            "frame 0x7 is part of the free list, but is not a block head"
        );
        assert_eq!(
            Corruption::CountMismatch.to_string(),
            "the free frame counter does not match the free list"
        );
    }

    #[test]
    fn stats_display() {
        let stats = AllocStats {
            allocated: 8,
            free: 8,
            total: 16,
            blocks: 1,
            ..AllocStats::with_name("Buddy")
        };

        let text = stats.to_string();
        assert!(text.starts_with("Buddy\n~~~~~\n"));
        assert!(text.contains("Allocated frames: 8"));
        assert!(text.contains("Total frames:     16"));
    }
}

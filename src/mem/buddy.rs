//! Implementation of a Buddy Allocator that is responsible for handing out
//! contiguous runs of physical page frames to the rest of the kernel.
//!
//! Free blocks are kept in a single list that is sorted by address. A request
//! is rounded up to a power of two and served from the first block that is
//! large enough, splitting it in halves until it has the right size. Freed
//! blocks are merged with their neighbours in the list for as long as a
//! neighbour directly touches the block and has the same size.
//!
//! Note that merging only looks at contiguity and size, not at the alignment
//! of the blocks. Two equally sized free blocks that touch each other are
//! merged even if they were never split from the same parent, which can leave
//! a free block whose base is not a multiple of its size.

use super::{
    free_list::FreeList, page::Page, AllocStats, Corruption, Error, PageAllocator, Result,
};

/// The largest free block, in frames, the allocator keeps track of.
///
/// This is also the number of frames [`BuddyAllocator::init_memmap`] maps.
pub const MAX_BLOCK: usize = 1 << 14;

/// Returns the smallest power of two that is greater or equal to `n`,
/// or `None` if it does not fit into a `usize`.
pub fn round_up_pow2(n: usize) -> Option<usize> {
    let mut size: usize = 1;
    while size < n {
        size = size.checked_mul(2)?;
    }
    Some(size)
}

/// The central structure that is responsible for allocating frames
/// using the buddy algorithm.
pub struct BuddyAllocator<'pages> {
    pages: &'pages mut [Page],
    free_list: FreeList,
    /// Number of free frames, always the sum over all blocks in `free_list`.
    pub(super) nr_free: usize,
    total: usize,
    max_block: usize,
}

impl<'pages> BuddyAllocator<'pages> {
    /// Create an empty allocator on top of the given frame table, using
    /// [`MAX_BLOCK`] as the largest block size.
    pub fn new(pages: &'pages mut [Page]) -> Self {
        Self::with_max_block(pages, MAX_BLOCK)
    }

    /// Create an empty allocator with a custom maximum block size.
    ///
    /// # Panics
    ///
    /// If `max_block` is not a power of two.
    pub fn with_max_block(pages: &'pages mut [Page], max_block: usize) -> Self {
        assert!(
            max_block.is_power_of_two(),
            "maximum block size must be a power of two"
        );

        Self {
            pages,
            free_list: FreeList::new(),
            nr_free: 0,
            total: 0,
            max_block,
        }
    }

    /// Return the largest block size of this allocator.
    pub fn max_block(&self) -> usize {
        self.max_block
    }

    /// Return the descriptor of the given frame.
    pub fn page(&self, frame: usize) -> &Page {
        &self.pages[frame]
    }

    /// Return the whole frame table.
    pub fn pages(&self) -> &[Page] {
        &*self.pages
    }

    /// Make the region starting at `base` available for allocation.
    ///
    /// The region always spans exactly [`max_block`](Self::max_block) frames,
    /// no matter what `count` says.
    ///
    /// # Panics
    ///
    /// If `count` is zero, the region does not fit into the frame table, or
    /// one of its frames is not reserved.
    pub fn init_memmap(&mut self, base: usize, count: usize) {
        assert!(count > 0, "cannot map an empty region");

        let size = self.max_block;
        if count != size {
            log::warn!(
                "Mapping {} frames at frame {:#x} instead of the requested {}",
                size,
                base,
                count
            );
        }

        let end = self.block_end(base, size);
        for (idx, page) in self.pages[base..end].iter_mut().enumerate() {
            assert!(
                page.is_reserved(),
                "frame {:#x} must be reserved before it is mapped",
                base + idx
            );
            page.reset();
        }

        let head = &mut self.pages[base];
        head.set_block_size(size);
        head.set_head();

        self.nr_free += size;
        self.total += size;
        self.free_list.insert_ordered(self.pages, base);

        log::info!(
            "Made frames {:#x}..{:#x} available for allocation",
            base,
            end
        );
    }

    /// Allocate `count` contiguous frames.
    ///
    /// `count` is rounded up to the next power of two, and the frames are taken
    /// from the first free block, in address order, that is large enough.
    /// Returns the frame number of the first allocated frame.
    pub fn alloc_pages(&mut self, count: usize) -> Result<usize> {
        if count == 0 {
            return Err(Error::ZeroFrames);
        }

        let size = round_up_pow2(count).ok_or(Error::OutOfFrames)?;
        if size > self.nr_free {
            return Err(Error::OutOfFrames);
        }

        let pages = &*self.pages;
        let block = self
            .free_list
            .iter(pages)
            .find(|&frame| pages[frame].block_size() >= size)
            .ok_or(Error::Fragmented)?;

        log::debug!(
            "Allocating {} frames from the block at {:#x} with {} frames",
            size,
            block,
            self.pages[block].block_size()
        );

        // the upper halves go back into the list at the place
        // where `block` used to be
        let prev = self.free_list.prev(self.pages, block);
        self.free_list.remove(self.pages, block);

        let mut block_size = self.pages[block].block_size();
        while block_size > size {
            // +-- `block`
            // v
            // +---------------------------------+
            // |    lower half  |  upper half    |
            // +---------------------------------+
            //                  ^
            //                  +--- `buddy`, which stays free
            block_size >>= 1;
            let buddy = block + block_size;

            let page = &mut self.pages[buddy];
            page.set_block_size(block_size);
            page.set_head();
            self.free_list.insert_after(self.pages, prev, buddy);

            self.pages[block].set_block_size(block_size);
        }

        self.nr_free -= size;
        self.pages[block].clear_head();
        Ok(block)
    }

    /// Allocate a single frame.
    pub fn alloc_page(&mut self) -> Result<usize> {
        self.alloc_pages(1)
    }

    /// Give `count` frames starting at `base` back to this allocator.
    ///
    /// `count` is rounded up exactly like in [`alloc_pages`](Self::alloc_pages),
    /// so the same count that was used for allocating must be passed here.
    ///
    /// # Panics
    ///
    /// If `count` is zero or larger than the maximum block size, the frames
    /// are outside of the frame table, or any of them is reserved or free.
    pub fn free_pages(&mut self, base: usize, count: usize) {
        assert!(count > 0, "cannot free zero frames");

        let size = match round_up_pow2(count) {
            Some(size) if size <= self.max_block => size,
            _ => panic!(
                "cannot free {} frames, a block holds at most {}",
                count, self.max_block
            ),
        };

        let end = self.block_end(base, size);
        if let Some((block, block_size)) = self
            .free_blocks()
            .find(|&(block, block_size)| block < end && base < block + block_size)
        {
            panic!(
                "frames {:#x}..{:#x} are already free, they overlap the free block {:#x}..{:#x}",
                base,
                end,
                block,
                block + block_size
            );
        }

        for (idx, page) in self.pages[base..end].iter_mut().enumerate() {
            assert!(!page.is_reserved(), "frame {:#x} is reserved", base + idx);
            page.reset();
        }

        let head = &mut self.pages[base];
        head.set_block_size(size);
        head.set_head();

        self.nr_free += size;
        self.free_list.insert_ordered(self.pages, base);

        let block = self.coalesce(base);
        log::debug!(
            "Freed {} frames at {:#x}, the block at {:#x} now has {} frames",
            size,
            base,
            block,
            self.pages[block].block_size()
        );
    }

    /// Merge `block` with its neighbours until neither of them touches it
    /// with the same size. Returns the head of the merged block.
    fn coalesce(&mut self, mut block: usize) -> usize {
        loop {
            let size = self.pages[block].block_size();
            if size >= self.max_block {
                break;
            }

            if let Some(prev) = self.free_list.prev(self.pages, block) {
                let prev_size = self.pages[prev].block_size();
                if prev + prev_size == block && prev_size == size {
                    log::trace!(
                        "Merging block {:#x} into its predecessor {:#x} ({} frames)",
                        block,
                        prev,
                        size
                    );

                    self.pages[prev].set_block_size(size << 1);
                    self.pages[block].clear_head();
                    self.free_list.remove(self.pages, block);
                    block = prev;
                    continue;
                }
            }

            if let Some(next) = self.free_list.next(self.pages, block) {
                if block + size == next && self.pages[next].block_size() == size {
                    log::trace!(
                        "Merging successor {:#x} into block {:#x} ({} frames)",
                        next,
                        block,
                        size
                    );

                    self.pages[block].set_block_size(size << 1);
                    self.pages[next].clear_head();
                    self.free_list.remove(self.pages, next);
                    continue;
                }
            }

            break;
        }

        block
    }

    /// Return the number of free frames.
    pub fn nr_free_pages(&self) -> usize {
        self.nr_free
    }

    /// Returns an iterator over all free blocks as `(base, size)` pairs,
    /// lowest address first.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let pages = &*self.pages;
        self.free_list
            .iter(pages)
            .map(move |frame| (frame, pages[frame].block_size()))
    }

    /// Returns a snapshot of the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        AllocStats {
            allocated: self.total.saturating_sub(self.nr_free),
            free: self.nr_free,
            total: self.total,
            blocks: self.free_list.len(),
            ..AllocStats::with_name("Buddy Allocator")
        }
    }

    /// Walk the free list and the frame table and check that the free list is
    /// sorted, consistent with the frame descriptors and the free counter.
    pub fn validate(&self) -> Result<(), Corruption> {
        let pages = &*self.pages;
        let mut total = 0;
        let mut prev: Option<(usize, usize)> = None;

        for frame in self.free_list.iter(pages) {
            let page = &pages[frame];
            if !page.is_head() {
                return Err(Corruption::NotAHead(frame));
            }

            if page.link.prev != prev.map(|(base, _)| base) {
                return Err(Corruption::BrokenLink(frame));
            }

            let size = page.block_size();
            if !size.is_power_of_two() || size > self.max_block {
                return Err(Corruption::BadBlockSize(frame));
            }

            if let Some((prev_base, prev_size)) = prev {
                if prev_base >= frame {
                    return Err(Corruption::Unordered(frame));
                }

                if prev_base + prev_size > frame {
                    return Err(Corruption::Overlapping(frame));
                }
            }

            total += size;
            prev = Some((frame, size));
        }

        if total != self.nr_free || self.free_list.last() != prev.map(|(base, _)| base) {
            return Err(Corruption::CountMismatch);
        }

        // every frame of a free block except the head must be blank,
        // and no frame outside of the list may look like a head
        let mut heads = self.free_list.iter(pages).peekable();
        let mut free_until = 0;
        for (frame, page) in pages.iter().enumerate() {
            if heads.peek() == Some(&frame) {
                heads.next();
                free_until = frame + page.block_size();
            } else if page.is_head() || page.block_size() != 0 {
                return Err(Corruption::StrayHead(frame));
            }

            if frame < free_until && (page.is_reserved() || page.ref_count() != 0) {
                return Err(Corruption::InUse(frame));
            }
        }

        Ok(())
    }

    /// Returns the end of the block `base..base + size`, making sure it fits
    /// into the frame table.
    fn block_end(&self, base: usize, size: usize) -> usize {
        match base.checked_add(size) {
            Some(end) if end <= self.pages.len() => end,
            _ => panic!(
                "frames {:#x}..{:#x} are outside of the frame table",
                base,
                base.saturating_add(size)
            ),
        }
    }
}

impl PageAllocator for BuddyAllocator<'_> {
    fn name(&self) -> &'static str {
        "buddy_pmm_manager"
    }

    fn init_memmap(&mut self, base: usize, count: usize) {
        BuddyAllocator::init_memmap(self, base, count)
    }

    fn alloc_pages(&mut self, count: usize) -> Result<usize> {
        BuddyAllocator::alloc_pages(self, count)
    }

    fn free_pages(&mut self, base: usize, count: usize) {
        BuddyAllocator::free_pages(self, base, count)
    }

    fn nr_free_pages(&self) -> usize {
        BuddyAllocator::nr_free_pages(self)
    }

    fn check(&mut self) {
        BuddyAllocator::check(self)
    }
}

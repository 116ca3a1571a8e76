//! Self-test for the buddy allocator.
//!
//! The test runs on the live allocator, so every frame it takes is given back
//! before it returns. Any failure panics, because a broken frame allocator
//! cannot be recovered from.

use super::BuddyAllocator;
use crate::println;
use core::mem;

impl BuddyAllocator<'_> {
    /// Exercise allocation, freeing, merging and exhaustion on this allocator
    /// and check the free list after every step.
    ///
    /// The allocator must have at least 24 free frames in blocks of eight or
    /// more frames.
    ///
    /// # Panics
    ///
    /// If any operation misbehaves or the free list is corrupted.
    pub fn check(&mut self) {
        log::info!("Running buddy allocator self-test");

        let mut blocks = 0;
        let mut total = 0;
        for (base, size) in self.free_blocks() {
            assert!(self.page(base).is_head(), "frame {:#x} is not a block head", base);
            blocks += 1;
            total += size;
        }
        assert_eq!(total, self.nr_free_pages(), "free frame counter is out of sync");
        log::info!("{} free blocks with {} frames", blocks, total);
        self.assert_valid();

        let free_before = self.nr_free_pages();

        let p0 = self.alloc_or_panic(6);
        self.dump_free_list("p0 allocated 6 frames");
        let p1 = self.alloc_or_panic(5);
        self.dump_free_list("p1 allocated 5 frames");
        let p2 = self.alloc_or_panic(8);
        self.dump_free_list("p2 allocated 8 frames");

        assert!(p0 != p1 && p0 != p2 && p1 != p2, "allocated blocks must differ");
        for &block in &[p0, p1, p2] {
            assert_eq!(self.page(block).ref_count(), 0, "allocated frame is referenced");
            assert!(
                block + 8 <= self.pages().len(),
                "block {:#x} is outside of the frame table",
                block
            );
        }
        let mut sorted = [p0, p1, p2];
        sorted.sort_unstable();
        assert!(
            sorted[0] + 8 <= sorted[1] && sorted[1] + 8 <= sorted[2],
            "allocated blocks overlap"
        );
        assert_eq!(self.nr_free_pages(), free_before - 24);

        self.free_pages(p0, 6);
        self.dump_free_list("p0 freed");
        self.free_pages(p2, 8);
        self.dump_free_list("p2 freed");
        self.free_pages(p1, 5);
        self.dump_free_list("p1 freed");
        assert_eq!(
            self.nr_free_pages(),
            free_before,
            "freeing did not restore all frames"
        );

        let too_large = self.max_block() + 1;
        assert!(
            self.alloc_pages(too_large).is_err(),
            "allocating {} frames must fail",
            too_large
        );

        // pretend that everything is handed out
        let saved = mem::replace(&mut self.nr_free, 0);
        let exhausted = self.alloc_pages(25);
        self.nr_free = saved;
        assert!(
            exhausted.is_err(),
            "allocating from an exhausted allocator must fail"
        );

        self.assert_valid();
        println!("{}", self.stats());
        log::info!("Buddy allocator self-test passed");
    }

    fn alloc_or_panic(&mut self, count: usize) -> usize {
        match self.alloc_pages(count) {
            Ok(block) => block,
            Err(err) => panic!("self-test could not allocate {} frames: {}", count, err),
        }
    }

    fn assert_valid(&self) {
        if let Err(err) = self.validate() {
            panic!("free list is corrupted: {}", err);
        }
    }

    /// Print every free block, followed by the block count and free frames.
    fn dump_free_list(&self, step: &str) {
        println!("{}:", step);
        for (idx, (base, size)) in self.free_blocks().enumerate() {
            println!("  block {:>3}: frame {:#07x}, {} frames", idx + 1, base, size);
        }
        println!(
            "  {} free blocks, {} free frames",
            self.stats().blocks,
            self.nr_free_pages()
        );

        self.assert_valid();
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::{BuddyAllocator, Page, MAX_BLOCK};

    #[test]
    fn passes_on_fresh_allocator() {
        let mut pages = vec![Page::reserved(); MAX_BLOCK];
        let mut alloc = BuddyAllocator::new(&mut pages);
        alloc.init_memmap(0, MAX_BLOCK);

        alloc.check();
        assert_eq!(alloc.nr_free_pages(), MAX_BLOCK);
        assert_eq!(alloc.free_blocks().collect::<Vec<_>>(), [(0, MAX_BLOCK)]);
    }

    #[test]
    fn passes_with_allocations_outstanding() {
        let mut pages = vec![Page::reserved(); 128];
        let mut alloc = BuddyAllocator::with_max_block(&mut pages, 128);
        alloc.init_memmap(0, 128);
        let held = alloc.alloc_pages(3).unwrap();

        alloc.check();
        assert_eq!(alloc.nr_free_pages(), 124);

        // the self-test frees 16..24 right behind the free 8..16, and both
        // merge although they are no buddies, so the region stays split up
        alloc.free_pages(held, 3);
        assert_eq!(alloc.nr_free_pages(), 128);
        assert_eq!(
            alloc.free_blocks().collect::<Vec<_>>(),
            [(0, 8), (8, 16), (24, 8), (32, 32), (64, 64)]
        );
        assert_eq!(alloc.validate(), Ok(()));
    }

    #[test]
    #[should_panic(expected = "self-test could not allocate")]
    fn fails_without_memory() {
        let mut pages = vec![Page::reserved(); 16];
        let mut alloc = BuddyAllocator::with_max_block(&mut pages, 16);
        alloc.check();
    }
}

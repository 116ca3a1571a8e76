//! The per-frame descriptors the allocator works on.
//!
//! The kernel creates one [`Page`] for every physical frame, marks all of
//! them as reserved, and hands the whole table to the allocator.

use bitflags::bitflags;

bitflags! {
    /// State bits of a single page frame.
    pub struct PageFlags: u8 {
        /// The frame belongs to someone else and must never be handed out.
        const RESERVED = 1 << 0;
        /// The frame is the first frame of a free block.
        const HEAD = 1 << 1;
    }
}

/// Links of a block head inside the free list.
///
/// Both ends are frame numbers, `None` marks the start or the end of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl Link {
    /// A link that is not part of any list.
    pub const UNLINKED: Link = Link {
        prev: None,
        next: None,
    };
}

/// Metadata for a single physical page frame.
#[derive(Debug, Clone)]
pub struct Page {
    flags: PageFlags,
    /// Number of frames of the free block starting here. Only valid for heads.
    block_size: usize,
    ref_count: usize,
    pub(crate) link: Link,
}

impl Page {
    /// Create a descriptor for a frame that is not reserved and not free.
    pub const fn new() -> Self {
        Self {
            flags: PageFlags::empty(),
            block_size: 0,
            ref_count: 0,
            link: Link::UNLINKED,
        }
    }

    /// Create a reserved descriptor, which is the state every frame
    /// is in before it is mapped into an allocator.
    pub const fn reserved() -> Self {
        Self {
            flags: PageFlags::RESERVED,
            ..Self::new()
        }
    }

    /// Return the raw flags of this frame.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    pub fn is_reserved(&self) -> bool {
        self.flags.contains(PageFlags::RESERVED)
    }

    pub fn set_reserved(&mut self) {
        self.flags.insert(PageFlags::RESERVED);
    }

    /// Check if this frame is the head of a free block.
    pub fn is_head(&self) -> bool {
        self.flags.contains(PageFlags::HEAD)
    }

    pub fn set_head(&mut self) {
        self.flags.insert(PageFlags::HEAD);
    }

    /// Remove the head flag and forget the block size.
    pub fn clear_head(&mut self) {
        self.flags.remove(PageFlags::HEAD);
        self.block_size = 0;
    }

    /// Return the size of the free block in frames, `0` if this is not a head.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn set_block_size(&mut self, size: usize) {
        self.block_size = size;
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn set_ref_count(&mut self, count: usize) {
        self.ref_count = count;
    }

    /// Return the free list links of this frame.
    pub fn link(&self) -> Link {
        self.link
    }

    /// Clear every flag, the block size and the reference count.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_page() {
        let page = Page::reserved();
        assert!(page.is_reserved());
        assert!(!page.is_head());
        assert_eq!(page.block_size(), 0);
        assert_eq!(page.ref_count(), 0);
        assert_eq!(page.link(), Link::UNLINKED);
    }

    #[test]
    fn head_flag() {
        let mut page = Page::new();
        page.set_block_size(8);
        page.set_head();
        assert_eq!(page.flags(), PageFlags::HEAD);
        assert_eq!(page.block_size(), 8);

        page.clear_head();
        assert!(!page.is_head());
        assert_eq!(page.block_size(), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut page = Page::reserved();
        page.set_head();
        page.set_block_size(4);
        page.set_ref_count(3);
        page.link.next = Some(12);

        page.reset();
        assert!(page.flags().is_empty());
        assert_eq!(page.block_size(), 0);
        assert_eq!(page.ref_count(), 0);
        assert_eq!(page.link(), Link::UNLINKED);
    }
}

//! Address-ordered, doubly linked list of free blocks.
//!
//! The nodes of the list are the [`Link`]s inside the [`Page`] descriptors,
//! addressed by frame number, so the list itself only stores both ends.
//! Every operation therefore takes the frame table it is threaded through.

use super::page::{Link, Page};
use core::iter::FusedIterator;

/// Intrusive list of free block heads, sorted by frame number.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl FreeList {
    /// Create a new, empty `FreeList`.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns whether this list is empty.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Returns the number of blocks inside this list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the block with the lowest address.
    pub fn first(&self) -> Option<usize> {
        self.head
    }

    /// Returns the block with the highest address.
    pub fn last(&self) -> Option<usize> {
        self.tail
    }

    /// Returns the block that comes before `frame` in this list.
    pub fn prev(&self, pages: &[Page], frame: usize) -> Option<usize> {
        pages[frame].link.prev
    }

    /// Returns the block that comes after `frame` in this list.
    pub fn next(&self, pages: &[Page], frame: usize) -> Option<usize> {
        pages[frame].link.next
    }

    /// Insert `frame` in front of the first block with a higher address,
    /// or at the end if there is none.
    pub fn insert_ordered(&mut self, pages: &mut [Page], frame: usize) {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if idx > frame {
                self.link_before(pages, idx, frame);
                return;
            }
            cursor = pages[idx].link.next;
        }

        self.push_back(pages, frame);
    }

    /// Insert `frame` directly behind `anchor`, or at the front of the
    /// list if `anchor` is `None`.
    ///
    /// The caller has to make sure this keeps the list sorted.
    pub fn insert_after(&mut self, pages: &mut [Page], anchor: Option<usize>, frame: usize) {
        let next = match anchor {
            Some(anchor) => pages[anchor].link.next,
            None => self.head,
        };

        match next {
            Some(next) => self.link_before(pages, next, frame),
            None => self.push_back(pages, frame),
        }
    }

    /// Unlink `frame` from this list.
    pub fn remove(&mut self, pages: &mut [Page], frame: usize) {
        let Link { prev, next } = pages[frame].link;
        debug_assert!(
            prev.is_some() || self.head == Some(frame),
            "frame {} is not part of the free list",
            frame
        );

        match prev {
            Some(prev) => pages[prev].link.next = next,
            None => self.head = next,
        }

        match next {
            Some(next) => pages[next].link.prev = prev,
            None => self.tail = prev,
        }

        pages[frame].link = Link::UNLINKED;
        self.len -= 1;
    }

    /// Returns an iterator over all block heads, lowest address first.
    pub fn iter<'list>(&self, pages: &'list [Page]) -> Iter<'list> {
        Iter {
            pages,
            cursor: self.head,
        }
    }

    fn push_back(&mut self, pages: &mut [Page], frame: usize) {
        self.assert_unlinked(pages, frame);

        pages[frame].link = Link {
            prev: self.tail,
            next: None,
        };

        match self.tail {
            Some(tail) => pages[tail].link.next = Some(frame),
            None => self.head = Some(frame),
        }

        self.tail = Some(frame);
        self.len += 1;
    }

    fn link_before(&mut self, pages: &mut [Page], at: usize, frame: usize) {
        self.assert_unlinked(pages, frame);

        // before:  prev <-> at
        // after:   prev <-> frame <-> at
        let prev = pages[at].link.prev;
        pages[frame].link = Link {
            prev,
            next: Some(at),
        };
        pages[at].link.prev = Some(frame);

        match prev {
            Some(prev) => pages[prev].link.next = Some(frame),
            None => self.head = Some(frame),
        }

        self.len += 1;
    }

    #[inline]
    fn assert_unlinked(&self, pages: &[Page], frame: usize) {
        debug_assert!(
            self.head != Some(frame) && pages[frame].link == Link::UNLINKED,
            "frame {} is already part of the free list",
            frame
        );
    }
}

/// Iterator over the block heads of a [`FreeList`].
pub struct Iter<'list> {
    pages: &'list [Page],
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.cursor?;
        self.cursor = self.pages[frame].link.next;
        Some(frame)
    }
}

impl FusedIterator for Iter<'_> {}

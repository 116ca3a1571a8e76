//! Physical page frame allocator for the kernel, built on the buddy algorithm.
//!
//! The kernel creates a table with one [`Page`] per physical frame, marks
//! every frame as reserved, and hands the table to a [`BuddyAllocator`].
//! Regions of the table are then made available with
//! [`init_memmap`](BuddyAllocator::init_memmap), and blocks of frames are
//! allocated and freed by frame number.
//!
//! The allocator itself is not synchronized. Wrap it in a [`LockedAllocator`]
//! to share it.
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), no_std)]

pub mod mem;
pub mod print;

pub use mem::{
    AllocStats, BuddyAllocator, Corruption, Error, LockedAllocator, Page, PageAllocator, PageFlags, Result,
    MAX_BLOCK,
};

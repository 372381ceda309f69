//! Memory inspection.
//!
//! The monitor never allocates or maps memory. It only reads the page tables
//! the kernel already built, through the walker in [`page_table`].
pub mod page_table;

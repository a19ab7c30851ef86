//! Durability layer for the intent log
//!
//! This crate owns the on-disk shape of a log chain:
//! - [`chain`]: block encoding with the trailer and embedded checksum, and
//!   validation that detects the end of the chain
//! - [`walk`]: lazy, restartable walker over a chain with claim bounds
//! - [`dva_tree`]: per-walk set of visited block addresses
//!
//! Block sizing ([`choose_block_size`], [`SizeRotor`]) lives with the codec
//! because capacities are only meaningful relative to the trailer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod dva_tree;
pub mod walk;

pub use chain::{
    body_capacity, choose_block_size, decode_and_validate, encode, encode_block, ChainEnd,
    ChainEndReason, DecodedBlock, SizeRotor,
};
pub use dva_tree::DvaTree;
pub use walk::{ChainWalk, WalkEnd, WalkSummary, WalkedBlock};

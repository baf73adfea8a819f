#![deny(unused_features)]
#![deny(deprecated)]
#![warn(unused_variables)]
#![warn(unused_imports)]
#![warn(dead_code)]
#![warn(missing_copy_implementations)]
//#![warn(missing_docs)]

//! A linear-scan register allocator for a Dalvik/DEX-style SSA back end.
//!
//! Given a method body already lowered to SSA form over a CFG of basic
//! blocks (see [`ir`]), [`regalloc::Allocator`] assigns each value a
//! physical register, subject to per-opcode register-width limits, while
//! minimizing the number of registers used and the number of spill moves
//! introduced. SSA construction, CFG building, instruction lowering and
//! bytecode emission are all out of scope: the allocator only consumes
//! the [`ir::IRCode`] façade and hands back a queryable register mapping.

pub mod macros;

pub mod error;
pub mod interner;
pub mod ir;
pub mod liveness;
pub mod ranges;
pub mod regalloc;

pub use error::RegAllocError;
pub use interner::{Ident, Interner};
pub use ir::{IRCode, Options};
pub use regalloc::Allocator;

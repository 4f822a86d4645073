#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Mesh tensor bookkeeping.
//!
//! Records how tensors are partitioned across a two-dimensional device mesh, derives the
//! tile shape each device holds, and turns block coordinates into element offsets for
//! block-addressed copies. Data movement itself is delegated to a [`CopyPrimitive`].

extern crate alloc;

mod context;
mod error;
mod tensor;

pub mod sharding;

pub use context::*;
pub use error::*;
pub use tensor::*;

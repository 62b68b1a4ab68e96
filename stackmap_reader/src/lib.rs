//! Parser for stack map sections in binary layout version 1.
//!
//! Gives a runtime linker or diagnostic tool an owned, queryable image of
//! the `.llvm_stackmaps` section: per-function frame sizes, the large
//! constant pool, and one record per call site with its value locations.

mod parser;
mod section;

pub use byteorder::{BigEndian, LittleEndian, NativeEndian};
pub use parser::{ParseError, Parser};
pub use section::{
    LocationKind, LocationRecord, StackMapRecord, StackMapSection, StackSizeRecord, VerifyError,
};

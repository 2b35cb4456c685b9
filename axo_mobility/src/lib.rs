//! # Object Mobility
//!
//! This crate makes active objects relocatable.
//!
//! ## Philosophy
//!
//! - **State and behavior travel together**: a frame carries an object's
//!   attribute map plus the definition of the behavior that owns it.
//! - **Behavior is registered, not evaluated**: the receiving node rebuilds
//!   the object from a table of pre-compiled types keyed by type name. Types
//!   defined only at runtime cannot be relocated.
//! - **Exact framing**: decoding recovers every encoded segment
//!   byte-for-byte, whatever the attribute map contains.
//!
//! ## Example
//!
//! ```ignore
//! let bytes = axo_mobility::to_bytes(&counter)?;
//! let types = TypeRegistry::new().with::<Counter>()?;
//! let mut restored = types.from_bytes(&bytes)?;
//! restored.call("increment", &[json!(1)], &Kwargs::new())?;
//! ```

pub mod frame;
pub mod object;
pub mod registry;

pub use frame::{decode_exact, decode_segments, encode_segments, ObjectFrame, LENGTH_PREFIX};
pub use object::{
    arg, kwarg, to_bytes, to_frame, ActiveObject, ActiveType, BehaviorDefinition, Kwargs,
    MethodFn, MethodTable,
};
pub use registry::TypeRegistry;

//! fstate: content-addressed file-system-state expressions
//!
//! Terms describing files, derivations and closures are stored under the
//! BLAKE3 hash of their canonical text. Normalising an expression runs the
//! derivations it needs and yields a closed `Slice` of file objects, which
//! can then be realised onto the filesystem.

pub mod api;
pub mod builder;
pub mod closure;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod fstate;
pub mod logging;
pub mod normalise;
pub mod paths;
pub mod realise;
pub mod store;
pub mod successor;
pub mod term;
pub mod types;

pub use api::FStateEngine;
pub use closure::{fstate_paths, fstate_refs};
pub use error::{BuildError, FStateError, StorageError};
pub use fstate::{Content, Derivation, FState, Slice, SliceElem};
pub use term::{bad_term, hash_term, parse_term, print_term, Term};
pub use types::FSId;

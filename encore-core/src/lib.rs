//! ENCORE Core - Entity Types
//!
//! Pure data structures shared by every other crate: catalog rows, subjects,
//! write descriptors, cache namespaces, the error taxonomy and the
//! request context. No I/O lives here.

mod context;
mod entities;
mod error;
mod identity;

pub use context::RequestContext;
pub use entities::*;
pub use error::*;
pub use identity::*;

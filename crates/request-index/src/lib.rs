//! # Request Index
//!
//! Name-resolution index for pending laboratory requests.
//!
//! Maps request names to request identifiers through a span-compressed
//! prefix trie, so a file name produced by acquisition software
//! (`<request name>` plus date stamps, replicate numbers, ...) still
//! resolves to the request it extends.
//!
//! ## Example
//!
//! ```
//! use acqwatch_request_index::RequestIndex;
//!
//! let mut index = RequestIndex::new();
//! index.insert("ProjectA_Run1", 101);
//! index.prune();
//!
//! assert_eq!(index.find("projecta_run1_rep2").request_id, Some(101));
//! assert_eq!(index.find("unrelated_name").request_id, None);
//! ```

mod trie;

pub use trie::{Lookup, RequestId, RequestIndex};

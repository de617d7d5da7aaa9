//! Narrative Graph — dialogue and quest graphs for games.
//!
//! Authored graphs are validated and compiled into immutable, index-based
//! tables. An executor walks a table during gameplay against host-supplied
//! conditions, fires events back at the host, and its state can be saved
//! and restored across sessions.

pub mod core;
pub mod schema;

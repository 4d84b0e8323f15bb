//! Cascading "sort tab" filters over a music library.
//!
//! A chain of stages narrows a source collection: each categorical stage
//! groups tracks by one field and passes on the members of its selected
//! entries, while a query stage filters by rating, play count and time
//! intervals. The last stage feeds a [`sink::DisplaySink`].

pub mod categorical;
pub mod category;
pub mod config;
pub mod entry;
pub mod interval;
pub mod pipeline;
pub mod protocol;
pub mod query;
pub mod sink;
pub mod sort_key;
pub mod sort_tab_manager;
pub mod stage;
pub mod track;

//! Embedded web client.
//!
//! A single HTML file with inlined CSS and JavaScript, embedded at compile
//! time so the binary has no runtime file dependencies.

/// The complete self-contained web client.
pub const INDEX_HTML: &str = include_str!("../assets/index.html");

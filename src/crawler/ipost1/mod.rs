//! iPost1 provider support.
//!
//! This provider sits behind a bot wall, so pages are fetched through a
//! headless browser. The locations endpoint answers with a malformed JSON
//! envelope whose `display` field carries HTML fragments; the client strips
//! the envelope and the parser works on the fragments.

mod client;
mod discovery;
mod parser;

pub use client::{extract_display_html, BrowserClient, Ipost1Client, StateEntry};
pub use discovery::{discover_all, process_and_validate};
pub use parser::parse_locations_html;

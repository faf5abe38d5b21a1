//! Byte-stream framing.
//!
//! The serial link is a plain byte stream with no message boundaries of its
//! own.  The only framing the board uses is the newline character, so the one
//! framer provided here is the [`line_framer::LineFramer`].

pub mod line_framer;

pub use line_framer::LineFramer;

//! Symbolication for the pmcview sampling-profile post-processor.
//!
//! This crate turns image-relative code offsets into inline-frame chains:
//! function, source file, code line, function-start line, and the DWARF
//! entry they came from. Callers feed it demand-created frames while
//! replaying a recorded event stream ([`ImageCache::get_frame`]) and run
//! one resolution pass at the end ([`ImageCache::map_all`]); resolution
//! parses each image's ELF symbol table and DWARF 2–4 debug data, follows
//! GNU debug links, reconstructs inline stacks from the DIE tree and the
//! statement-line program, and demangles what it finds.
//!
//! Nothing here is fatal at run time: unreadable images, missing debug
//! data and malformed compile units all degrade to frames carrying the
//! `[unmapped_function]` sentinel.

pub mod demangle;
mod dwarf;
pub mod elf;
mod error;
pub mod frame;
pub mod intern;
pub mod range_map;

mod image;

pub use error::Error;
pub use frame::{Callframe, InlineFrame, UNMAPPED_FUNCTION_NAME};
pub use image::{FrameRef, Image, ImageCache, ImageHandle};
pub use intern::{intern, InternedString};
pub use range_map::RangeMap;

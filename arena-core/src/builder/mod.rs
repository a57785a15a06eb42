//! Build preparation for agent images.
//!
//! This module provides Dockerfile scanning, the forbidden instruction
//! guard, build context packaging and the build console.

pub mod archive;
pub mod guard;
pub mod output_stream;
pub mod parser;

pub use archive::{pack, pack_blocking, ArchiveRecord, PackedContext, RecordKind};
pub use guard::{ForbiddenInstructionReport, InstructionGuard};
pub use output_stream::Console;
pub use parser::{parse_directives, Directive};

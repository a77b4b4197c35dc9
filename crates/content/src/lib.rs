#![doc = include_str!("../README.md")]

pub mod applier;
pub mod codec;
pub mod enrich;

pub use applier::{ApplyReport, PageOutcome, StructureApplier};
pub use codec::{encode_block, encode_blocks};
pub use enrich::{ContentEnricher, FallbackEnricher, fallback_blocks, infer_page_type};

//! Per-channel bookkeeping: publisher-confirm sequencing and content reassembly.

pub(crate) mod confirms;
pub(crate) mod content;

pub(crate) use confirms::Confirms;
pub(crate) use content::{Assembler, Content, ContentMethod};

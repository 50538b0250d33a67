//! papere: sorts research-paper PDFs into category directories with an LLM, and runs an
//! arXiv literature-search chat whose answers cite papers as rendered cards.

pub mod chat;
pub mod llm;
pub mod papers;
pub mod settings;
pub mod sorting;
pub mod utils;

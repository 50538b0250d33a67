//! Interactive literature search: the model writes arXiv queries, reads the results,
//! and answers citing papers that get rendered as cards.

pub mod cards;
pub mod resolver;
pub mod rewriter;
pub mod search;
pub mod session;

pub use cards::CardStyle;
pub use rewriter::{ReferenceTag, StreamingTagRewriter};
pub use search::SearchOrchestrator;
pub use session::{ChatEvent, ChatSession, SessionOptions};

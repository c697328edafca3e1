pub mod chunker;
pub mod generator;
pub mod pipeline;
pub mod retriever;

pub use chunker::{Chunk, TextChunker};
pub use generator::{Generation, Generator, DEFAULT_SYSTEM_PROMPT};
pub use pipeline::{RagAnswer, RagPipeline};
pub use retriever::Retriever;

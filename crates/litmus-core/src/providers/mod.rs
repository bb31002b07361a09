pub mod classifier;
pub mod embedder;
pub mod gpu;
pub mod llm;
pub mod perspective;

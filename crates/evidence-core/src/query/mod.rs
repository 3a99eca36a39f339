pub mod embedder;
pub mod embedding;
pub mod facade;
pub mod guards;
pub mod hybrid;
pub mod search;
pub mod tokenizer;
pub mod workflow;

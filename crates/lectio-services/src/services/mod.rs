pub mod anthropic;
pub mod backend;
pub mod huggingface;

pub use anthropic::AnthropicBackend;
pub use backend::{create_backend, Answer, BackendError, Generated, GenerationBackend};
pub use huggingface::HuggingFaceBackend;

//! Lectio external services
//!
//! Clients for the generation backends that produce summaries, questions and answers.

pub mod services;

pub use services::{
    create_backend, AnthropicBackend, Answer, BackendError, Generated, GenerationBackend,
    HuggingFaceBackend,
};

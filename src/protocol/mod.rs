pub mod adapter;
pub mod canonical;
pub mod ollama;
pub mod openai_chat;
pub mod openai_completion;
pub mod openai_responses;

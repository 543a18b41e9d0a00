pub mod agent;
pub mod chat_agent;
pub mod consent;
pub mod events;
pub mod history;
pub mod llm_client;
pub mod prompt;
pub mod tools;

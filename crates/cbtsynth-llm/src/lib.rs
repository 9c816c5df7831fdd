pub mod converter;
pub mod mock;
pub mod models;
pub mod openai;
pub mod reliable;

pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use reliable::{ReliableConfig, ReliableProvider};

//! HTTP clients for the external collaborators: an Elasticsearch kNN vector
//! store, Azure OpenAI chat and embedding deployments, and Tavily web search.

pub mod elasticsearch;
mod http;
pub mod openai;
pub mod tavily;

pub use elasticsearch::ElasticsearchStore;
pub use openai::{AzureChatModel, AzureEmbedder};
pub use tavily::TavilySearch;

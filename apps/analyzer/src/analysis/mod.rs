// Review analysis: prompt building, response parsing and the sequential
// pipeline that ties the loader, the LLM client and the report writer together.
// All model calls go through llm_client.

pub mod parser;
pub mod pipeline;
pub mod prompts;

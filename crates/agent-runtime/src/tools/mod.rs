//! Tools that reach outside the process: web search and page fetching.

mod html;
pub mod webfetch;
pub mod websearch;

pub use webfetch::WebFetchTool;
pub use websearch::WebSearchTool;

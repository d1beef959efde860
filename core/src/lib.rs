pub mod api;
pub mod cache;
pub mod corpus;
pub mod error;
pub mod index;
pub mod prompt;
pub mod store;
pub mod tokenizer;

pub use cache::{CacheLoad, CachedIndex, IndexCache};
pub use error::CacheError;
pub use index::*;
pub use store::{KeywordStore, StoreOrigin};

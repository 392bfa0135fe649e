pub mod batch;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod github;
pub mod io;
pub mod lock;
pub mod markdown;
pub mod paths;
pub mod plan;
pub mod prompt;
pub mod selector;
pub mod story;
pub mod validate;

pub use error::{Result, StoryworkError};

pub mod bootstrap;
pub mod errors;
pub mod generation;
pub mod hub;
pub mod key_manager;
pub mod model;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod prompt_template;
pub mod slot;
pub mod stream;

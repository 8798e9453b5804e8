pub mod cli;
pub mod engine;
pub mod error;
pub mod mask;
pub mod model;
pub mod settings;
pub mod tensor;
pub mod tokenizer;

pub use engine::ModelRunner;
pub use error::RunnerError;
pub use settings::{ResolvedSettings, RunnerSettings};

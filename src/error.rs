use thiserror::Error;

/// Errors surfaced by the generation runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    SettingsParse(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("{field} ({value}) is not divisible by {by} ({divisor})")]
    NotDivisible {
        field: &'static str,
        value: usize,
        by: &'static str,
        divisor: usize,
    },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("forward pass failed: {0}")]
    Forward(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("executor error: {0}")]
    Executor(String),
}

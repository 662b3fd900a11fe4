#[derive(thiserror::Error, Debug)]
pub enum AssignmentError {
    #[error("invalid demand in matrix {class}: {reason}")]
    InvalidDemand { class: String, reason: String },
    #[error("invalid iteration stage: {0}")]
    InvalidIterationStage(String),
    #[error("invalid fare table: {0}")]
    InvalidFareTable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid assignment config: {0}")]
    Config(String),
    #[error("matrix {0} does not exist")]
    UnknownMatrix(String),
    #[error("scenario {0} does not exist")]
    UnknownScenario(u32),
    #[error("assignment engine failed during {operation}: {message}")]
    Engine { operation: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Yaml(#[from] yaml_rust::ScanError),
}

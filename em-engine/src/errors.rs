//! Registry and engine error types.
use em_core::err_impl;

err_impl! {RegistryError,
    #[error("unsupported component kind: {0}")]
    UnsupportedComponentKind(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("engine fault: {0}")]
    EngineFault(String),
}

err_impl! {EngineError,
    #[error("request routed to the wrong engine family: {0}")]
    WrongDomain(String),

    #[error("query not supported by this engine: {0}")]
    UnsupportedQuery(String),
}

pub use crate::errors::EmptyResult;
pub use crate::oplog::{
    OpKind,
    OperationLog,
    OperationRecord,
    OperationSummary,
    Outcome,
};
pub use crate::time::{
    SimTime,
    DAY,
    HOUR,
    MINUTE,
    SECOND,
};

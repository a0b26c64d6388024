mod errors;
mod operation;

pub use errors::OperationError;
pub use operation::{
    ConstructSource, Construct, Execute, IntoOperation, Operation, OperationArgs, OperationContext,
    OperationKey, OperationKind,
};

pub(crate) use operation::Body;

//! Core types shared by the engine and its adapters.

pub mod failure;
pub mod schema;
pub mod traits;
pub mod value;

pub use failure::{AdapterError, AdapterResult, FailureKind};
pub use schema::{ColumnDescriptor, TargetSystem, TypeWarning};
pub use traits::{
    CallContext, CredentialSupplier, ReadRequest, ReadScope, SourceAdapter, StaticCredential,
    TargetAdapter, WriteAck,
};
pub use value::{Batch, Cursor, Row, Value};

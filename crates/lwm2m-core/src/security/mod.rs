//! Security configuration: instances and derived contexts

pub mod context;
pub mod instance;

pub use context::{
    AeadAlgorithm, ContextParams, ContextPool, DerivedContext, HkdfAlgorithm, Role, RoleContext,
};
pub use instance::{
    InstanceKind, PskCredential, SecurityInstance, SecurityInstanceArgs, SecurityMode,
    SecurityStore,
};

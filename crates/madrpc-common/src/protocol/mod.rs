pub mod error;
pub mod invocation;
pub mod result;


pub use error::{FailureKind, MadrpcError, Result};
pub use invocation::{Invocation, InvocationId, MethodName, ReturnType, RpcArgs};
pub use result::{RpcResult, RpcValue};

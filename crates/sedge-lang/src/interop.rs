//! Boundary to the host environment. The evaluator hands every dotted path
//! and unknown call form to a bridge; what lies behind it (reflection, a
//! fixed function table, nothing at all) is the embedder's business.

use crate::error::InteropError;
use crate::runtime::value::Value;

/// Resolves dotted paths against the host: field reads, constructors and
/// method calls. Arguments arrive already evaluated, left to right, together
/// with the import list of the calling context chain.
pub trait HostBridge {
    fn resolve(&self, path: &str, args: &[Value], imports: &[String]) -> Result<Value, InteropError>;
}

/// Default bridge: every resolution fails. Scripts that never touch host
/// paths run unaffected.
pub struct NoBridge;

impl HostBridge for NoBridge {
    fn resolve(&self, path: &str, _args: &[Value], _imports: &[String]) -> Result<Value, InteropError> {
        Err(InteropError::MemberNotFound { path: path.to_string() })
    }
}

//! Generic positional invocation of catalog methods

use std::any::Any;
use std::thread::{self, ThreadId};

use tracing::trace;

use crate::catalog::MethodDescriptor;
use crate::error::{SyncError, SyncResult};
use crate::value::Value;

/// Invoke `method` on `target` with positional `args`
///
/// Surplus arguments are ignored. Every supplied argument up to the declared
/// count must carry a type matching the declaration. A receiver bound to a
/// different thread than the caller cannot be reached from here.
pub fn invoke_slot(
    target: &mut dyn Any,
    affinity: Option<ThreadId>,
    method: &MethodDescriptor,
    args: &[Value],
) -> SyncResult<Option<Value>> {
    let count = method.arg_types.len().min(args.len());

    if args.len() < method.min_args {
        return Err(SyncError::InsufficientArguments {
            method: method.name.clone(),
            required: method.min_args,
            supplied: args.len(),
        });
    }

    for (index, (value, expected)) in args.iter().zip(&method.arg_types).enumerate() {
        let Some(actual) = value.type_tag() else {
            return Err(SyncError::InvalidArgument {
                method: method.name.clone(),
                index,
            });
        };
        if actual != *expected {
            return Err(SyncError::ArgumentTypeMismatch {
                method: method.name.clone(),
                index,
                expected: *expected,
                actual,
            });
        }
    }

    if let Some(owner) = affinity {
        if owner != thread::current().id() {
            return Err(SyncError::NotImplemented(format!(
                "cross-context invocation of {}",
                method.name
            )));
        }
    }

    trace!(method = %method.name, args = count, "Invoking method");
    method.call(target, &args[..count])
}

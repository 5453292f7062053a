//! Per-type method catalogs
//!
//! Every type that takes part in synchronization registers its methods and
//! events once through a [`ClassDescriptor`]. The descriptor holds typed
//! invocation closures; [`MethodCatalog::build`] turns it into the lookup
//! tables used by inbound dispatch:
//!
//! ```text
//! ClassDescriptor ("Settings")
//!   ├── setVolume(int)          ─┐
//!   ├── setVolume(int,bool)      ├─► collapsed: setVolume(int,bool), min 1
//!   ├── requestSetVolume(int) → bool
//!   ├── receiveSetVolume(int,bool)  ◄── paired lazily with requestSetVolume
//!   └── event valueChanged(int)
//! ```
//!
//! Catalogs are cached for the whole process, keyed by [`TypeId`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::hub::ProxyMode;
use crate::value::{method_name, normalize_signature, signature, TypeTag, Value};

/// Type-erased invocation closure stored in the catalog
pub type MethodHandler =
    Arc<dyn Fn(&mut dyn Any, &[Value]) -> SyncResult<Option<Value>> + Send + Sync>;

/// One method declaration inside a [`ClassDescriptor`]
pub struct MethodDecl {
    name: String,
    args: Vec<TypeTag>,
    optional: usize,
    returns: Option<TypeTag>,
    handler: MethodHandler,
}

impl MethodDecl {
    /// Declare a method on receivers of type `T`
    ///
    /// The handler receives at most `args.len()` values, already checked
    /// against the declared types. Trailing optional arguments may be absent.
    pub fn new<T, F>(name: impl Into<String>, args: &[TypeTag], handler: F) -> Self
    where
        T: Any,
        F: Fn(&mut T, &[Value]) -> SyncResult<Option<Value>> + Send + Sync + 'static,
    {
        let handler: MethodHandler = Arc::new(move |target: &mut dyn Any, args: &[Value]| {
            let target = target.downcast_mut::<T>().ok_or_else(|| {
                SyncError::Invocation(format!(
                    "receiver is not a {}",
                    std::any::type_name::<T>()
                ))
            })?;
            handler(target, args)
        });

        Self {
            name: name.into(),
            args: args.to_vec(),
            optional: 0,
            returns: None,
            handler,
        }
    }

    /// Declare a non-void return type
    pub fn returns(mut self, tag: TypeTag) -> Self {
        self.returns = Some(tag);
        self
    }

    /// Mark the last `count` parameters as optional
    pub fn optional(mut self, count: usize) -> Self {
        self.optional = count.min(self.args.len());
        self
    }
}

/// One event declaration inside a [`ClassDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: String,
    pub arg_types: Vec<TypeTag>,
    /// Declared signature, e.g. `valueChanged(int)`; default wire name
    pub signature: String,
}

/// Explicit registration table for one type
pub struct ClassDescriptor {
    class_name: String,
    methods: Vec<MethodDecl>,
    events: Vec<EventDescriptor>,
}

impl ClassDescriptor {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            methods: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Register a void method with required parameters only
    pub fn method<T, F>(self, name: &str, args: &[TypeTag], handler: F) -> Self
    where
        T: Any,
        F: Fn(&mut T, &[Value]) -> SyncResult<Option<Value>> + Send + Sync + 'static,
    {
        self.method_with(MethodDecl::new(name, args, handler))
    }

    /// Register a fully specified method declaration
    pub fn method_with(mut self, decl: MethodDecl) -> Self {
        self.methods.push(decl);
        self
    }

    /// Register an event the type can emit
    pub fn event(mut self, name: &str, args: &[TypeTag]) -> Self {
        let name = method_name(&normalize_signature(name)).to_string();
        self.events.push(EventDescriptor {
            signature: signature(&name, args),
            name,
            arg_types: args.to_vec(),
        });
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }
}

/// A callable method resolved from the catalog
pub struct MethodDescriptor {
    /// Normalized name without parameter list
    pub name: String,
    /// Signature of the retained (longest) variant
    pub signature: String,
    pub arg_types: Vec<TypeTag>,
    /// Minimum number of arguments a caller must supply
    pub min_args: usize,
    pub return_type: Option<TypeTag>,
    /// Mode of the hub on which this method may run
    pub direction: ProxyMode,
    handler: MethodHandler,
}

impl MethodDescriptor {
    fn from_decl(name: String, decl: MethodDecl) -> Self {
        let direction = if name.starts_with("request") {
            ProxyMode::Server
        } else {
            ProxyMode::Client
        };
        Self {
            signature: signature(&name, &decl.args),
            min_args: decl.args.len() - decl.optional,
            arg_types: decl.args,
            return_type: decl.returns,
            direction,
            handler: decl.handler,
            name,
        }
    }

    /// Run the handler without argument validation
    pub(crate) fn call(&self, target: &mut dyn Any, args: &[Value]) -> SyncResult<Option<Value>> {
        (self.handler)(target, args)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("signature", &self.signature)
            .field("min_args", &self.min_args)
            .field("return_type", &self.return_type)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Where a request method's return value is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivePairing {
    /// Index of the receive method in the catalog
    pub method: usize,
    /// Whether the original arguments are sent ahead of the return value
    pub prepend_args: bool,
}

/// Reflection cache for one type
pub struct MethodCatalog {
    class_name: String,
    methods: Vec<MethodDescriptor>,
    by_name: HashMap<String, usize>,
    by_signature: HashMap<String, usize>,
    events: HashMap<String, EventDescriptor>,
    receive_map: OnceLock<HashMap<usize, ReceivePairing>>,
    conflicts: Vec<String>,
}

impl MethodCatalog {
    /// Build the catalog from a registration table
    pub fn build(descriptor: ClassDescriptor, check_conflicts: bool) -> Self {
        let ClassDescriptor {
            class_name,
            methods: decls,
            events: event_decls,
        } = descriptor;

        let mut methods: Vec<MethodDescriptor> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut by_signature: HashMap<String, usize> = HashMap::new();
        let mut conflicts = Vec::new();

        for decl in decls {
            let name = method_name(&normalize_signature(&decl.name)).to_string();

            if decl.args.contains(&TypeTag::Opaque) {
                debug!(class = %class_name, method = %name, "Skipping method with opaque parameter");
                continue;
            }
            if name.starts_with("init") {
                continue;
            }

            let decl_sig = signature(&name, &decl.args);
            let Some(&idx) = by_name.get(&name) else {
                let idx = methods.len();
                by_name.insert(name.clone(), idx);
                by_signature.insert(decl_sig, idx);
                methods.push(MethodDescriptor::from_decl(name, decl));
                continue;
            };

            let existing = &methods[idx];
            let decl_min = decl.args.len() - decl.optional;

            if existing.arg_types.starts_with(&decl.args) {
                // Shorter variant becomes an alias of the existing method
                let merged_min = existing.min_args.min(decl_min);
                methods[idx].min_args = merged_min;
                by_signature.entry(decl_sig).or_insert(idx);
            } else if decl.args.starts_with(&existing.arg_types) {
                let merged_min = existing.min_args.min(decl_min);
                let mut longer = MethodDescriptor::from_decl(name, decl);
                longer.min_args = merged_min;
                methods[idx] = longer;
                by_signature.insert(decl_sig, idx);
            } else {
                if check_conflicts {
                    warn!(
                        class = %class_name,
                        method = %name,
                        kept = %existing.signature,
                        ignored = %decl_sig,
                        "Conflicting overloads, keeping the first declaration"
                    );
                }
                conflicts.push(decl_sig);
            }
        }

        let events = event_decls
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();

        Self {
            class_name,
            methods,
            by_name,
            by_signature,
            events,
            receive_map: OnceLock::new(),
            conflicts,
        }
    }

    /// Fetch the cached catalog for a type, building it on first use
    pub fn for_type(
        type_id: TypeId,
        describe: impl FnOnce() -> ClassDescriptor,
        check_conflicts: bool,
    ) -> Arc<MethodCatalog> {
        let cache = catalog_cache();
        if let Some(catalog) = cache.read().get(&type_id) {
            return Arc::clone(catalog);
        }

        let built = Arc::new(MethodCatalog::build(describe(), check_conflicts));
        let mut guard = cache.write();
        Arc::clone(guard.entry(type_id).or_insert(built))
    }

    /// Number of catalogs built so far in this process
    pub fn cached_count() -> usize {
        catalog_cache().read().len()
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method(&self, index: usize) -> Option<&MethodDescriptor> {
        self.methods.get(index)
    }

    /// Resolve a method by name or full signature
    pub fn method_index(&self, name: &str) -> Option<usize> {
        let normalized = normalize_signature(name);
        if normalized.contains('(') {
            if let Some(&idx) = self.by_signature.get(&normalized) {
                return Some(idx);
            }
        }
        self.by_name.get(method_name(&normalized)).copied()
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.method_index(name).and_then(|idx| self.methods.get(idx))
    }

    /// Resolve an event by name or signature
    pub fn event(&self, name: &str) -> Option<&EventDescriptor> {
        let normalized = normalize_signature(name);
        self.events.get(method_name(&normalized))
    }

    /// Declarations dropped because of conflicting overloads
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// Receive method paired with a request method, if any
    pub fn receive_pairing(&self, request: usize) -> Option<ReceivePairing> {
        self.receive_map
            .get_or_init(|| self.build_receive_map())
            .get(&request)
            .copied()
    }

    fn build_receive_map(&self) -> HashMap<usize, ReceivePairing> {
        let mut map = HashMap::new();

        for (idx, method) in self.methods.iter().enumerate() {
            let Some(suffix) = method.name.strip_prefix("request") else {
                continue;
            };
            let Some(ret) = method.return_type else {
                continue;
            };
            let receive_name = format!("receive{}", suffix);

            let mut full_args = method.arg_types.clone();
            full_args.push(ret);

            let paired = self
                .by_signature
                .get(&signature(&receive_name, &full_args))
                .map(|&m| (m, full_args.len()))
                .or_else(|| {
                    self.by_signature
                        .get(&signature(&receive_name, &[ret]))
                        .map(|&m| (m, 1))
                });

            match paired {
                Some((receive, arity)) => {
                    map.insert(
                        idx,
                        ReceivePairing {
                            method: receive,
                            prepend_args: arity > 1,
                        },
                    );
                }
                None => {
                    debug!(
                        class = %self.class_name,
                        method = %method.name,
                        "No receive method for request, return values will be dropped"
                    );
                }
            }
        }

        map
    }
}

impl fmt::Debug for MethodCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCatalog")
            .field("class_name", &self.class_name)
            .field("methods", &self.methods)
            .field("events", &self.events.len())
            .finish()
    }
}

fn catalog_cache() -> &'static RwLock<HashMap<TypeId, Arc<MethodCatalog>>> {
    static CATALOGS: OnceLock<RwLock<HashMap<TypeId, Arc<MethodCatalog>>>> = OnceLock::new();
    CATALOGS.get_or_init(|| RwLock::new(HashMap::new()))
}

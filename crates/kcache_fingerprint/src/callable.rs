//! Registered callables, their bindings, and call-target resolution.
//!
//! A callable is a named source fragment plus the environment it was defined
//! in: its captured bindings and the globals of its module. Call sites found in
//! the fragment are resolved against that environment, captures first.

use kcache_common::{Ident, Interner};
use kcache_config::TrustedRuntime;
use kcache_source::SourceLocation;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Whether a callable may be cached across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purity {
    /// Output depends only on source, arguments and configuration.
    Pure,
    /// May read state the fingerprint cannot see; never persisted.
    Impure,
}

impl Purity {
    /// The byte mixed into cache keys.
    pub fn key_byte(self) -> u8 {
        match self {
            Purity::Pure => 1,
            Purity::Impure => 0,
        }
    }
}

/// How a parameter participates in specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Passed at run time; only its type shape selects a variant.
    Value,
    /// Substituted at compile time; its value or identity selects a variant.
    Structural,
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Specialization kind.
    pub kind: ParamKind,
}

/// Ordered parameter list of a callable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    /// Parameters in declaration order.
    pub params: Vec<Param>,
}

impl Signature {
    /// Creates an empty signature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value parameter.
    pub fn value(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind: ParamKind::Value,
        });
        self
    }

    /// Appends a structural parameter.
    pub fn structural(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind: ParamKind::Structural,
        });
        self
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns `true` if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns `true` if a parameter is named `name`.
    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

/// What a name is bound to in a capture set or module scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A registered callable, by fully-qualified name.
    Callable(String),
    /// An immutable constant; its text is part of the defining source.
    Constant(String),
    /// A mutable value whose contents are not fingerprinted.
    Mutable,
    /// A function value not registered as a callable.
    FunctionValue,
    /// An imported module, by qualified module name.
    Module(String),
}

/// A callable known to the cache.
#[derive(Debug, Clone)]
pub struct CallableDef {
    /// Qualified name of the defining module.
    pub module: String,
    /// Unqualified name.
    pub name: String,
    /// Where the callable's source lives.
    pub location: SourceLocation,
    /// Declared parameters.
    pub signature: Signature,
    /// Purity capability.
    pub purity: Purity,
    /// Names captured from enclosing scopes.
    pub captures: BTreeMap<String, Binding>,
}

impl CallableDef {
    /// Creates a pure callable with no parameters and no captures.
    ///
    /// The location's callable name is set to the qualified name.
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        mut location: SourceLocation,
    ) -> Self {
        let module = module.into();
        let name = name.into();
        location.callable_name = qualify(&module, &name);
        Self {
            module,
            name,
            location,
            signature: Signature::new(),
            purity: Purity::Pure,
            captures: BTreeMap::new(),
        }
    }

    /// Sets the signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Sets the purity.
    pub fn with_purity(mut self, purity: Purity) -> Self {
        self.purity = purity;
        self
    }

    /// Adds a captured binding.
    pub fn capture(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.captures.insert(name.into(), binding);
        self
    }

    /// Returns `module.name`.
    pub fn qualified_name(&self) -> String {
        qualify(&self.module, &self.name)
    }
}

fn qualify(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{module}.{name}")
    }
}

/// Resolved target of a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Bound through the caller's captures.
    LocalCapture {
        /// The captured name.
        name: String,
        /// The callee.
        callable: Ident,
    },
    /// Bound through the module scope (directly or via an imported module).
    ModuleQualified {
        /// Qualified callee name.
        path: String,
        /// The callee.
        callable: Ident,
    },
    /// Cannot be resolved to registered source; the computation abstains.
    Unresolvable {
        /// Why resolution failed.
        reason: String,
    },
}

/// Outcome of classifying one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallClass {
    /// Matches the trusted-runtime table and is not walked.
    Trusted,
    /// Must be walked (or abstain).
    Target(CallTarget),
}

/// Thread-safe table of callables and module scopes.
pub struct CallableRegistry {
    names: Interner,
    callables: RwLock<HashMap<Ident, Arc<CallableDef>>>,
    modules: RwLock<HashMap<String, BTreeMap<String, Binding>>>,
}

impl CallableRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            names: Interner::new(),
            callables: RwLock::new(HashMap::new()),
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a callable and returns its id.
    ///
    /// The callable is also bound as a global of its module.
    pub fn register(&self, def: CallableDef) -> Ident {
        let qualified = def.qualified_name();
        let id = self.names.get_or_intern(&qualified);
        self.define_global(&def.module, &def.name, Binding::Callable(qualified));
        self.callables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(def));
        id
    }

    /// Removes a callable. Returns `false` if it was not registered.
    pub fn unregister(&self, id: Ident) -> bool {
        self.callables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Binds `name` in the scope of `module`.
    pub fn define_global(&self, module: &str, name: &str, binding: Binding) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), binding);
    }

    /// Returns the binding of `name` in `module`.
    pub fn global(&self, module: &str, name: &str) -> Option<Binding> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .and_then(|scope| scope.get(name).cloned())
    }

    /// Returns a registered callable.
    pub fn get(&self, id: Ident) -> Option<Arc<CallableDef>> {
        self.callables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns the id of the registered callable with qualified name `name`.
    pub fn lookup(&self, name: &str) -> Option<Ident> {
        let id = self.names.get(name)?;
        self.get(id).map(|_| id)
    }

    /// Returns the qualified name behind `id`.
    pub fn name(&self, id: Ident) -> &str {
        self.names.resolve(id)
    }

    /// Returns the qualified name behind `id`, or `None` if this registry
    /// never saw it.
    pub fn try_name(&self, id: Ident) -> Option<&str> {
        self.names.try_resolve(id)
    }

    /// Number of registered callables.
    pub fn len(&self) -> usize {
        self.callables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks `name` up in the caller's captures, then its module globals.
    pub fn binding_for(&self, caller: &CallableDef, name: &str) -> Option<Binding> {
        caller
            .captures
            .get(name)
            .cloned()
            .or_else(|| self.global(&caller.module, name))
    }

    /// Classifies the flattened call `path` made from `caller`.
    pub fn classify_call(
        &self,
        caller: &CallableDef,
        path: &str,
        trusted: &TrustedRuntime,
    ) -> CallClass {
        if trusted.is_builtin(path) || trusted.has_trusted_prefix(path) {
            return CallClass::Trusted;
        }
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let method = path.rsplit('.').next().unwrap_or(path);

        // `.m` on an unnamed expression.
        if head.is_empty() {
            return self.method_call(method, trusted);
        }

        let Some(rest) = rest else {
            return CallClass::Target(self.resolve_name(caller, head));
        };

        match self.binding_for(caller, head) {
            Some(Binding::Module(module)) => {
                let target = format!("{module}.{rest}");
                if trusted.is_builtin(&target) || trusted.has_trusted_prefix(&target) {
                    return CallClass::Trusted;
                }
                match self.lookup(&target) {
                    Some(callable) => CallClass::Target(CallTarget::ModuleQualified {
                        path: target,
                        callable,
                    }),
                    None => unresolvable(format!("`{target}` is not a registered callable")),
                }
            }
            // parameters and locals are unbound here; `x.m()` is a method call
            _ => self.method_call(method, trusted),
        }
    }

    fn method_call(&self, method: &str, trusted: &TrustedRuntime) -> CallClass {
        if trusted.is_trusted_method(method) {
            CallClass::Trusted
        } else {
            unresolvable(format!("method `{method}` is not trusted"))
        }
    }

    fn resolve_name(&self, caller: &CallableDef, name: &str) -> CallTarget {
        let from_capture = caller.captures.contains_key(name);
        let Some(binding) = self.binding_for(caller, name) else {
            return CallTarget::Unresolvable {
                reason: format!("`{name}` is not bound"),
            };
        };
        match binding {
            Binding::Callable(qualified) => match self.lookup(&qualified) {
                Some(callable) if from_capture => CallTarget::LocalCapture {
                    name: name.to_string(),
                    callable,
                },
                Some(callable) => CallTarget::ModuleQualified {
                    path: qualified,
                    callable,
                },
                None => CallTarget::Unresolvable {
                    reason: format!("`{qualified}` is not a registered callable"),
                },
            },
            Binding::FunctionValue => CallTarget::Unresolvable {
                reason: format!("`{name}` is a function value with no registered source"),
            },
            Binding::Constant(_) | Binding::Mutable | Binding::Module(_) => {
                CallTarget::Unresolvable {
                    reason: format!("`{name}` is not callable"),
                }
            }
        }
    }
}

fn unresolvable(reason: String) -> CallClass {
    CallClass::Target(CallTarget::Unresolvable { reason })
}

impl Default for CallableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

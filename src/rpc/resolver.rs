use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::rpc::error::RpcError;

/// `Err` carries the failure reason that is sent back to the caller
pub type ProcedureResult = Result<Value, Value>;

pub type DeferredResult = Pin<Box<dyn Future<Output = ProcedureResult> + Send + 'static>>;

/// The result of invoking a [Procedure]. Synchronous procedures return `Ready`, asynchronous
///  ones `Deferred`; callers on the other side of the channel can not tell the difference.
pub enum Outcome {
    Ready(ProcedureResult),
    Deferred(DeferredResult),
}

impl Debug for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ready(r) => write!(f, "Ready({:?})", r),
            Outcome::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl From<ProcedureResult> for Outcome {
    fn from(value: ProcedureResult) -> Self {
        Outcome::Ready(value)
    }
}

/// A locally implemented, remotely callable procedure.
#[derive(Clone)]
pub struct Procedure(Arc<dyn Fn(Vec<Value>) -> Outcome + Send + Sync>);

impl Debug for Procedure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Procedure")
    }
}

impl Procedure {
    pub fn new<F>(f: F) -> Procedure
    where F: Fn(Vec<Value>) -> Outcome + Send + Sync + 'static
    {
        Procedure(Arc::new(f))
    }

    /// a synchronous procedure - an error is sent back as its message
    pub fn sync<F, E>(f: F) -> Procedure
    where
        F: Fn(Vec<Value>) -> Result<Value, E> + Send + Sync + 'static,
        E: Display,
    {
        Procedure::new(move |args| {
            Outcome::Ready(f(args).map_err(|e| Value::String(e.to_string())))
        })
    }

    pub fn deferred<F, Fut>(f: F) -> Procedure
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        Procedure::new(move |args| Outcome::Deferred(Box::pin(f(args))))
    }

    /// A synchronous procedure with typed parameters and result. The argument list is
    ///  deserialized into `A` as a whole, so `A` is typically a tuple, e.g. `(i64, i64)`.
    pub fn typed<A, R, E, F>(f: F) -> Procedure
    where
        A: DeserializeOwned,
        R: Serialize,
        E: Display,
        F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
    {
        Procedure::new(move |args| {
            let args = match serde_json::from_value::<A>(Value::Array(args)) {
                Ok(args) => args,
                Err(e) => return Outcome::Ready(Err(Value::String(format!("invalid arguments: {}", e)))),
            };
            let result = f(args)
                .map_err(|e| Value::String(e.to_string()))
                .and_then(|r| serde_json::to_value(r)
                    .map_err(|e| Value::String(format!("result can not be serialized: {}", e)))
                );
            Outcome::Ready(result)
        })
    }

    pub fn invoke(&self, args: Vec<Value>) -> Outcome {
        (self.0)(args)
    }
}


/// The application's pluggable lookup of procedures by name. The arguments are passed for
///  resolvers that dispatch on them as well.
#[cfg_attr(test, automock)]
pub trait ImplementationResolver: Send + Sync + 'static {
    fn get_implementation(&self, name: &str, args: &[Value]) -> Option<Procedure>;
}

pub type ResolverFn = dyn Fn(&str, &[Value]) -> Option<Procedure> + Send + Sync;

/// The different shapes of things that can be exposed for remote calls. Each is turned into a
///  single canonical [ImplementationResolver] when it is exposed.
pub enum ExposeTarget {
    Function(Arc<ResolverFn>),
    Resolver(Arc<dyn ImplementationResolver>),
    Procedures(FxHashMap<String, Procedure>),
}

impl Debug for ExposeTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExposeTarget::Function(_) => f.write_str("Function"),
            ExposeTarget::Resolver(_) => f.write_str("Resolver"),
            ExposeTarget::Procedures(p) => {
                let mut names = p.keys().collect::<Vec<_>>();
                names.sort();
                write!(f, "Procedures{:?}", names)
            }
        }
    }
}

impl ExposeTarget {
    pub fn function<F>(f: F) -> ExposeTarget
    where F: Fn(&str, &[Value]) -> Option<Procedure> + Send + Sync + 'static
    {
        ExposeTarget::Function(Arc::new(f))
    }

    pub fn resolver(resolver: impl ImplementationResolver) -> ExposeTarget {
        ExposeTarget::Resolver(Arc::new(resolver))
    }

    pub fn procedures<S: Into<String>>(procedures: impl IntoIterator<Item = (S, Procedure)>) -> ExposeTarget {
        ExposeTarget::Procedures(procedures.into_iter()
            .map(|(name, p)| (name.into(), p))
            .collect()
        )
    }

    pub fn into_resolver(self) -> Result<Arc<dyn ImplementationResolver>, RpcError> {
        match self {
            ExposeTarget::Function(f) => Ok(Arc::new(FunctionResolver(f))),
            ExposeTarget::Resolver(r) => Ok(r),
            ExposeTarget::Procedures(procedures) => {
                if procedures.contains_key("") {
                    return Err(RpcError::InvalidExposeTarget("a procedure can not have an empty name".to_string()));
                }
                Ok(Arc::new(ProcedureMap(procedures)))
            }
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Procedure)> for ExposeTarget {
    fn from_iter<T: IntoIterator<Item = (S, Procedure)>>(iter: T) -> Self {
        ExposeTarget::procedures(iter)
    }
}

struct FunctionResolver(Arc<ResolverFn>);
impl ImplementationResolver for FunctionResolver {
    fn get_implementation(&self, name: &str, args: &[Value]) -> Option<Procedure> {
        (self.0)(name, args)
    }
}

struct ProcedureMap(FxHashMap<String, Procedure>);
impl ImplementationResolver for ProcedureMap {
    fn get_implementation(&self, name: &str, _args: &[Value]) -> Option<Procedure> {
        self.0.get(name).cloned()
    }
}

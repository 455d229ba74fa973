//! Method registry
//!
//! A [`Service`] binds a receiver to a table of named methods. Every method
//! follows one convention, checked at compile time:
//!
//! ```text
//! fn(&Receiver, Args, &mut Reply) -> Result<(), impl Display>
//! ```
//!
//! Each entry is stored type-erased in a [`MethodType`], which knows how to
//! build a fresh argument from a request body, build a fresh reply slot,
//! invoke the method and encode the reply.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tinyrpc_common::transport::Codec;
use tinyrpc_common::{Result, RpcError};
use tracing::debug;

/// A decoded argument waiting to be handed to its method.
pub struct Argv(Box<dyn Any + Send>);

/// A reply slot, filled in by the method.
pub struct Replyv(Box<dyn Any + Send>);

trait Handler: Send + Sync {
    fn new_argv(&self, codec: Codec, body: &[u8]) -> Result<Argv>;
    fn new_replyv(&self) -> Replyv;
    fn invoke(&self, argv: Argv, replyv: &mut Replyv) -> std::result::Result<(), String>;
    fn encode_replyv(&self, codec: Codec, replyv: &Replyv) -> Result<Vec<u8>>;
}

struct TypedHandler<S, A, R, E, F> {
    rcvr: Arc<S>,
    func: F,
    _types: PhantomData<fn(A) -> (R, E)>,
}

impl<S, A, R, E, F> Handler for TypedHandler<S, A, R, E, F>
where
    S: Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Default + Send + 'static,
    E: Display + 'static,
    F: Fn(&S, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
{
    fn new_argv(&self, codec: Codec, body: &[u8]) -> Result<Argv> {
        let args: A = codec.decode(body)?;
        Ok(Argv(Box::new(args)))
    }

    fn new_replyv(&self) -> Replyv {
        // Default gives empty, non-null maps and sequences
        Replyv(Box::new(R::default()))
    }

    fn invoke(&self, argv: Argv, replyv: &mut Replyv) -> std::result::Result<(), String> {
        let args = argv
            .0
            .downcast::<A>()
            .map_err(|_| format!("rpc server: argument is not a {}", type_name::<A>()))?;
        let reply = replyv
            .0
            .downcast_mut::<R>()
            .ok_or_else(|| format!("rpc server: reply is not a {}", type_name::<R>()))?;
        (self.func)(&self.rcvr, *args, reply).map_err(|e| e.to_string())
    }

    fn encode_replyv(&self, codec: Codec, replyv: &Replyv) -> Result<Vec<u8>> {
        let reply = replyv.0.downcast_ref::<R>().ok_or_else(|| {
            RpcError::InvalidRequest(format!("reply is not a {}", type_name::<R>()))
        })?;
        codec.encode(reply)
    }
}

/// One registered method.
pub struct MethodType {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    num_calls: AtomicU64,
    handler: Box<dyn Handler>,
}

impl MethodType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Number of invocations so far.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decodes a request body into a fresh argument value.
    pub fn new_argv(&self, codec: Codec, body: &[u8]) -> Result<Argv> {
        self.handler.new_argv(codec, body)
    }

    pub fn new_replyv(&self) -> Replyv {
        self.handler.new_replyv()
    }

    pub fn encode_replyv(&self, codec: Codec, replyv: &Replyv) -> Result<Vec<u8>> {
        self.handler.encode_replyv(codec, replyv)
    }
}

impl fmt::Debug for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodType")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .field("num_calls", &self.num_calls())
            .finish()
    }
}

/// A receiver and the methods it exposes.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    /// Starts building a service around `rcvr`.
    ///
    /// # Example
    ///
    /// ```
    /// use tinyrpc_server::Service;
    ///
    /// struct Foo;
    ///
    /// impl Foo {
    ///     fn sum(&self, args: (i64, i64), reply: &mut i64) -> Result<(), String> {
    ///         *reply = args.0 + args.1;
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let service = Service::builder("Foo", Foo).method("Sum", Foo::sum).build();
    /// assert!(service.method("Sum").is_some());
    /// ```
    pub fn builder<S: Send + Sync + 'static>(name: impl Into<String>, rcvr: S) -> ServiceBuilder<S> {
        ServiceBuilder::new(name, Arc::new(rcvr))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Invokes `mtype`, counting the call and flattening its error to a string.
    pub fn call(&self, mtype: &MethodType, argv: Argv, replyv: &mut Replyv) -> std::result::Result<(), String> {
        mtype.num_calls.fetch_add(1, Ordering::Relaxed);
        mtype.handler.invoke(argv, replyv)
    }
}

/// Collects the methods of a [`Service`].
pub struct ServiceBuilder<S> {
    name: String,
    rcvr: Arc<S>,
    methods: HashMap<String, Arc<MethodType>>,
}

impl<S: Send + Sync + 'static> ServiceBuilder<S> {
    /// Builds from a receiver that is already shared elsewhere.
    pub fn new(name: impl Into<String>, rcvr: Arc<S>) -> Self {
        Self {
            name: name.into(),
            rcvr,
            methods: HashMap::new(),
        }
    }

    /// Adds a method. Names that are not exported (upper-case first letter)
    /// are skipped.
    pub fn method<A, R, E, F>(mut self, name: &str, func: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        E: Display + 'static,
        F: Fn(&S, A, &mut R) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        if !is_exported(name) {
            debug!("rpc server: skipping unexported method {}.{}", self.name, name);
            return self;
        }

        let handler = TypedHandler {
            rcvr: Arc::clone(&self.rcvr),
            func,
            _types: PhantomData,
        };
        let mtype = MethodType {
            name: name.to_string(),
            arg_type: type_name::<A>(),
            reply_type: type_name::<R>(),
            num_calls: AtomicU64::new(0),
            handler: Box::new(handler),
        };
        debug!("rpc server: register {}.{}", self.name, name);
        self.methods.insert(name.to_string(), Arc::new(mtype));
        self
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// Exported names start with an upper-case ASCII letter.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

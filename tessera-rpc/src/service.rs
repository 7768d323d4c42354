use derive_more::Display;
use serde::{Serialize, de::DeserializeOwned};

/// Describes a remote interface: a name and the methods it exposes.
pub trait Service: Send + Sync + 'static {
    const NAME: &'static str;

    fn methods() -> &'static [MethodDescriptor];

    fn method(id: u32) -> Option<&'static MethodDescriptor> {
        Self::methods().iter().find(|m| m.id == id)
    }
}

/// One method of a [`Service`], bound to its request and response types.
///
/// ```
/// use tessera_rpc::service::{Method, MethodDescriptor, Service};
///
/// struct Calculator;
///
/// impl Service for Calculator {
///     const NAME: &'static str = "Calculator";
///
///     fn methods() -> &'static [MethodDescriptor] {
///         const METHODS: &[MethodDescriptor] = &[MethodDescriptor::new(1, "add")];
///         METHODS
///     }
/// }
///
/// struct Add;
///
/// impl Method for Add {
///     type Service = Calculator;
///     type Request = (u32, u32);
///     type Response = u32;
///
///     const ID: u32 = 1;
///     const NAME: &'static str = "add";
/// }
/// ```
pub trait Method: 'static {
    type Service: Service;
    type Request: Serialize + DeserializeOwned + Send + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;

    const ID: u32;
    const NAME: &'static str;
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{name}#{id}")]
pub struct MethodDescriptor {
    pub id: u32,
    pub name: &'static str,
}

impl MethodDescriptor {
    pub const fn new(id: u32, name: &'static str) -> Self {
        Self { id, name }
    }
}

//! 能力层：描述符、发现源、带缓存的注册表、HTTP / SSE 调用

pub mod descriptor;
pub mod discovery;
pub mod invoker;
pub mod registry;
pub mod sse;

pub use descriptor::{CapabilityDescriptor, CapabilityMethod, InvocationStyle, ParameterSpec};
pub use discovery::{parse_descriptor_list, DiscoverySource, HttpDiscovery, StaticDiscovery};
pub use invoker::{CapabilityInvoker, FailureKind, InvocationBatch, InvocationResult};
pub use registry::{CapabilityRegistry, RegistryOptions};

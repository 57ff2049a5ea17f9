//! Provider adapters for Tandem.
//!
//! One uniform [`Adapter`] trait over two transports: child processes
//! speaking line-oriented JSON on stdio, and in-process function tables.
//! The [`ProviderRegistry`] maps provider keys to construction recipes;
//! the agent's factory layer owns caching and credentials.

pub mod error;
pub mod in_process;
pub mod memory;
pub mod providers;
pub mod registry;
pub mod subprocess;
pub mod traits;
pub mod validate;

pub use error::{AdapterError, Result};
pub use in_process::{InProcessAdapter, InProcessAdapterBuilder, ToolFn};
pub use memory::{MEMORY_READ_TOOLS, MEMORY_WRITE_TOOLS, MemoryAdapter, memory_tool_descriptors};
pub use providers::{GOOGLE_CREDENTIALS_FILE, builtin_providers};
pub use registry::{CreateContext, InProcessFactory, ProviderRegistry};
pub use subprocess::SubprocessAdapter;
pub use traits::{
    Adapter, AuthRequirement, ProviderDescriptor, ProviderScope, ResourceContent,
    ResourceDescriptor, ToolContent, ToolDescriptor, ToolOutcome, Transport, Visibility,
};
pub use validate::validate_arguments;

//! Procedural macros for the rpcflow JSON-RPC engine
//!
//! Rust has no runtime reflection, so a service type has to describe its own
//! methods before it can be exposed. `#[rpc_service]` writes that description
//! at compile time from an ordinary impl block.
//!
//! # Available Macros
//!
//! ## `#[rpc_service]` - Exposed Service
//!
//! Implements `ExposedService` for the impl block's type. Every `pub` method
//! taking `&self` becomes a JSON-RPC method with:
//! - Parameter metadata (name, position, declared type, optionality, default)
//! - A cached invoker that binds arguments and serializes the result
//! - Error mapping through `Into<rpcflow_core::Error>`
//!
//! # Examples
//!
//! ```ignore
//! use rpcflow::{rpc_service, CallContext};
//!
//! struct Calculator;
//!
//! #[rpc_service(crate = rpcflow::server)]
//! impl Calculator {
//!     pub fn add(&self, a: i64, #[rpc(default = 10)] b: i64) -> i64 {
//!         a + b
//!     }
//!
//!     pub async fn whoami(&self, call: &CallContext) -> Option<String> {
//!         call.caller().name.clone()
//!     }
//!
//!     #[rpc(skip)]
//!     pub fn helper(&self) {}
//! }
//! ```

mod service;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemImpl};

/// Attribute macro exposing the public methods of an impl block
///
/// # Generated Code
///
/// The impl block is emitted unchanged, followed by an
/// `impl ExposedService for T` whose `methods()` lists one `MethodMetadata`
/// per exposed method.
///
/// # Which Methods Are Exposed
///
/// Public methods whose receiver is `&self`. Private methods, `&mut self`
/// methods, associated functions and methods marked `#[rpc(skip)]` are left
/// alone.
///
/// # Method Attributes
///
/// - `#[rpc(name = "other")]`: wire name before naming conventions
/// - `#[rpc(undocumented)]`: hide from documentation generators
/// - `#[rpc(skip)]`: do not expose
///
/// # Parameters
///
/// - Every parameter must implement `serde::Deserialize`
/// - `Option<T>` parameters are optional and bind `None` when omitted
/// - `#[rpc(default = expr)]` makes a parameter optional with a default;
///   `expr` must implement `serde::Serialize`
/// - A `CallContext` or `&CallContext` parameter is injected, never bound
///
/// # Return Types
///
/// - Nothing or `()`: the method is void and answers `null`
/// - `Result<T, E>`: `T: Serialize`, `rpcflow_core::Error: From<E>`
/// - Anything else: must implement `serde::Serialize`
///
/// `async fn`s become async methods; their futures must be `Send`.
///
/// # Crate Path
///
/// Generated code names `::rpcflow_server` by default. Use
/// `#[rpc_service(crate = rpcflow::server)]` when depending on the umbrella
/// crate only.
///
/// # Limitations
///
/// - Generic impl blocks are not supported
/// - Parameters must be plain identifiers, not patterns
#[proc_macro_attribute]
pub fn rpc_service(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match service::ServiceArgs::parse(attr) {
        Ok(args) => args,
        Err(error) => return error.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemImpl);
    service::expand(args, item)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

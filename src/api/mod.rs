//! Outbound API surface: identity headers, transport and the interceptor
//! pipeline every call goes through.

pub mod client;
pub mod headers;
pub mod pipeline;
pub mod transport;

pub use client::{ApiClient, RemoteLogout};
pub use headers::{IdentityHeaders, OutboundHeaders};
pub use pipeline::{InterceptorPipeline, Notice, Notifier, ResponseClass};
pub use transport::{ApiRequest, ApiResponse, Method, ReqwestTransport, Transport, TransportError};

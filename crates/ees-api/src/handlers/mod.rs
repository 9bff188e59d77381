//! HTTP request handlers

pub mod ees;
pub mod health;
pub mod jsonrpc;

pub use ees::configure as configure_ees;
pub use health::health_check;
pub use jsonrpc::configure as configure_jsonrpc;

use ees_core::ExportContext;

/// Export context cancelled when the handler future is dropped
///
/// Synchronous exports stop retrying once the client has gone away.
pub(crate) struct RequestContext(ExportContext);

impl RequestContext {
    pub(crate) fn new() -> Self {
        Self(ExportContext::background())
    }

    pub(crate) fn ctx(&self) -> &ExportContext {
        &self.0
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

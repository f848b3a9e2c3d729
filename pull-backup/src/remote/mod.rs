//! Remote host collaborators.

pub mod ssh;

use crate::Result;
use tokio_util::sync::CancellationToken;

pub use ssh::SshManifestFetcher;

/// Retrieves the installed-package listing of the backed-up host.
#[allow(async_fn_in_trait)]
pub trait ManifestFetcher {
    /// Host identifier, for logs and the completion marker.
    fn host(&self) -> &str;

    /// Fetch the listing as text. Fails with `RemoteFetch` or `Cancelled`.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<String>;
}

use std::time::Duration;

/// An HTTP response, already read to completion.
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when the service sent one.
    pub retry_after: Option<Duration>,
}

/// This trait decouples the uploader from the HTTP client implementation.
/// On calling code, one wraps the actual client in a new type implementing
/// this trait; tests substitute scripted responses instead.
pub trait UploadTransport {
    fn post_form(
        &mut self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
    ) -> anyhow::Result<ApiResponse>;
}

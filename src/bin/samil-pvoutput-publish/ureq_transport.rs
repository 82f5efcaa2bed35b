use std::time::Duration;

use samil2pvoutput::upload_transport::{ApiResponse, UploadTransport};
use ureq::Agent;

pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        // Non-2xx statuses come back as responses so the uploader can
        // classify them itself.
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl UploadTransport for UreqTransport {
    fn post_form(
        &mut self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
    ) -> anyhow::Result<ApiResponse> {
        let mut request = self.agent.post(url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let mut response = request.send_form(form.iter().map(|(k, v)| (*k, v.as_str())))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.body_mut().read_to_string()?;
        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

//! HTTP client construction for upstream providers.

use reqwest::{Client, Proxy};

use crate::options::{HttpTransport, TransportOptions};

/// Build a configured HTTP client from transport options.
///
/// Only the connect phase is bounded. An unparseable proxy URL is an error
/// rather than a silent direct connection.
pub fn build_http_client(
    transport_options: &TransportOptions<HttpTransport>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    if let Some(proxy_url) = &transport_options.provider.proxy {
        builder = builder.proxy(Proxy::all(proxy_url.as_str())?);
    }

    builder.build()
}

//! Token endpoint requests shared by code exchange and refresh.

use crate::provider::FormParams;
use tomclient_types::{Result, TokenResponse, TomError};

/// POST `form` to `endpoint` and parse the token response.
///
/// # Errors
///
/// Returns [`TomError::Http`] on transport failure and [`TomError::Exchange`]
/// on a non-success status, an unparseable body, or a response carrying
/// neither `access_token` nor `id_token`.
pub async fn request_token(
    http: &reqwest::Client,
    endpoint: &str,
    form: &FormParams,
) -> Result<TokenResponse> {
    let grant = form
        .iter()
        .find(|(k, _)| *k == "grant_type")
        .map_or("", |(_, v)| v.as_str());
    tracing::debug!(%endpoint, grant, "sending token request");

    let resp = http
        .post(endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| TomError::Http(format!("token request to {endpoint} failed: {e}")))?;

    let status = resp.status().as_u16();
    let body = resp.text().await?;
    let exchange_err = |body: String| TomError::Exchange {
        endpoint: endpoint.to_string(),
        status,
        body,
    };

    if !(200..300).contains(&status) {
        return Err(exchange_err(body));
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| exchange_err(format!("unparseable token response ({e}): {body}")))?;
    if !parsed.has_credential() {
        return Err(exchange_err(
            "response contained neither access_token nor id_token".into(),
        ));
    }
    Ok(parsed)
}

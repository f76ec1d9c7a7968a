// Typed JSON helpers
// Each helper builds a RequestDescriptor, runs it through the auth flow and
// decodes the success body

use reqwest::Response;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ApiError, Result};
use crate::http_client::AuthenticatedClient;
use crate::request::RequestDescriptor;

/// Path or query parameters as borrowed pairs
pub type Params<'a> = &'a [(&'a str, &'a str)];

impl AuthenticatedClient {
    /// GET `path` and decode the JSON response
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        path_params: Params<'_>,
        query: Params<'_>,
    ) -> Result<T> {
        let request = with_params(RequestDescriptor::get(path), path_params, query);
        decode_json(self.send(request).await?).await
    }

    /// POST a JSON body to `path` and decode the JSON response
    pub async fn post_json<B, T>(&self, path: &str, path_params: Params<'_>, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = with_params(RequestDescriptor::post(path), path_params, &[]).json(body)?;
        decode_json(self.send(request).await?).await
    }

    /// PATCH a JSON body to `path` and decode the JSON response
    pub async fn patch_json<B, T>(&self, path: &str, path_params: Params<'_>, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = with_params(RequestDescriptor::patch(path), path_params, &[]).json(body)?;
        decode_json(self.send(request).await?).await
    }

    /// DELETE `path`, ignoring any response body
    pub async fn delete(&self, path: &str, path_params: Params<'_>) -> Result<()> {
        let request = with_params(RequestDescriptor::delete(path), path_params, &[]);
        self.send(request).await?;
        Ok(())
    }
}

fn with_params(
    mut request: RequestDescriptor,
    path_params: Params<'_>,
    query: Params<'_>,
) -> RequestDescriptor {
    for (key, value) in path_params {
        request = request.with_path_param(*key, *value);
    }
    for (key, value) in query {
        request = request.with_query(*key, *value);
    }
    request
}

/// Decode a success body as JSON
pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Network(format!("Failed to read response body: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

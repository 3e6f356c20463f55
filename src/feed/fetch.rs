// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bytes::Bytes;

use crate::error::FetchError;
use crate::http::HttpClient;

/// Fetch a raw feed document from a URL (without parsing). Never retries.
pub async fn fetch_document<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FetchError> {
    client
        .get_bytes(url)
        .await
        .map_err(|e| FetchError::from_transport(url, e))
}

//! Offset/limit pagination shared by every listing loop.

use std::future::Future;

use crate::error::{ConnectorError, ConnectorResult};

/// Fetch pages of `limit` items until a short page arrives.
///
/// `fetch` receives `(limit, offset)`. A page with fewer than `limit` items
/// ends the scan, so an exactly-full final page costs one extra empty call.
pub async fn collect_pages<T, F, Fut>(limit: usize, mut fetch: F) -> ConnectorResult<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = ConnectorResult<Vec<T>>>,
{
    if limit == 0 {
        return Err(ConnectorError::bad_input("page limit must be > 0"));
    }
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch(limit, offset).await?;
        let len = page.len();
        all.extend(page);
        if len < limit {
            return Ok(all);
        }
        offset += len;
    }
}

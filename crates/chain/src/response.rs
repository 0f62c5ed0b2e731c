//! The response under construction for one request.

use crate::body::ResponseBody;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode, Version};
use tracing::warn;

/// Collects status, headers and body written by handlers.
///
/// The status is committed by the first [`write_header`](Self::write_header) or
/// [`write`](Self::write), later status changes are ignored the same way an HTTP/1.1 server can not
/// change a status line it already sent.
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    committed: bool,
    bytes_written: u64,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            committed: false,
            bytes_written: 0,
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Whether the status has been committed.
    #[inline]
    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Number of body bytes written so far.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write_header(&mut self, status: StatusCode) {
        if self.committed {
            warn!(current = %self.status, ignored = %status, "response status already committed");
            return;
        }
        self.status = status;
        self.committed = true;
    }

    /// Appends to the body, committing `200 OK` if no status was written yet.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if !self.committed {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        data.len()
    }

    /// Takes the written response out, leaving this writer blank.
    pub fn take(&mut self, version: Version) -> Response<ResponseBody> {
        let body = std::mem::take(&mut self.body).freeze();
        let mut response = Response::new(ResponseBody::once(body));
        *response.status_mut() = self.status;
        *response.version_mut() = version;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        self.reset();
        response
    }

    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body.clear();
        self.committed = false;
        self.bytes_written = 0;
    }

    /// The body bytes written so far.
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

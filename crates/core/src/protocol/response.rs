/// An HTTP response head plus optional body.
///
/// Serializes to the standard text format:
///
/// ```text
/// HTTP/1.0 200 OK\r\n
/// Server: robocam/0.1\r\n
/// Content-Type: text/html\r\n
/// Content-Length: 142\r\n
/// \r\n
/// <html>...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present. A
/// response without a body ends right after the blank line, which is how
/// the multipart stream head is sent before its parts.
#[must_use]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every response.
pub const SERVER_AGENT: &str = "robocam/0.1";

/// Protocol version written on the status line. Every connection carries a
/// single exchange and is closed afterwards.
pub const HTTP_VERSION: &str = "HTTP/1.0";

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        HttpResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn moved_permanently(location: &str) -> Self {
        Self::new(301, "Moved Permanently").add_header("Location", location)
    }

    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(405, "Method Not Allowed").add_header("Allow", "GET")
    }

    /// The camera could not be started.
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
    }

    pub fn version_not_supported() -> Self {
        Self::new(505, "HTTP Version Not Supported")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Plain-text body, the same short message browsers show for errors.
    pub fn with_text(self, text: &str) -> Self {
        self.add_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(format!("{}\r\n", text))
    }

    /// Serialize to the HTTP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically.
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\r\n",
            HTTP_VERSION, self.status_code, self.status_text
        );

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

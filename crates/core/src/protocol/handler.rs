use std::sync::Arc;

use crate::protocol::multipart;
use crate::protocol::request::HttpRequest;
use crate::protocol::response::HttpResponse;
use crate::server::ServerConfig;

pub const INDEX_PATH: &str = "/index.html";

/// What a connection should do with a request.
pub enum Route {
    /// Send this response and close.
    Respond(HttpResponse),
    /// Send [`Router::stream_head`] and hand the socket to a stream session.
    Stream,
}

/// Maps request paths to pages or the live stream.
pub struct Router {
    config: Arc<ServerConfig>,
}

impl Router {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Router { config }
    }

    pub fn route(&self, request: &HttpRequest) -> Route {
        if request.method != "GET" {
            tracing::warn!(method = %request.method, target = %request.target, "unsupported HTTP method");
            return Route::Respond(HttpResponse::method_not_allowed());
        }

        let path = request.path();
        if path == self.config.stream_path {
            return Route::Stream;
        }

        match path {
            "/" => Route::Respond(HttpResponse::moved_permanently(INDEX_PATH)),
            INDEX_PATH => Route::Respond(
                HttpResponse::ok()
                    .add_header("Content-Type", "text/html; charset=utf-8")
                    .with_body(index_page(&self.config)),
            ),
            _ => {
                tracing::debug!(path, "unknown path");
                Route::Respond(HttpResponse::not_found().with_text("Not Found"))
            }
        }
    }

    /// Response head for the live stream. Parts follow directly after it.
    pub fn stream_head(&self) -> HttpResponse {
        HttpResponse::ok()
            .add_header("Age", "0")
            .add_header("Cache-Control", "no-cache, private")
            .add_header("Pragma", "no-cache")
            .add_header("Content-Type", &multipart::content_type(&self.config.boundary))
    }
}

/// Minimal viewer page embedding the stream.
pub fn index_page(config: &ServerConfig) -> String {
    format!(
        "<html>\n\
         <head>\n\
         <title>{title}</title>\n\
         </head>\n\
         <body>\n\
         <img src=\"{src}\" width=\"{width}\" height=\"{height}\" />\n\
         </body>\n\
         </html>\n",
        title = config.page_title,
        src = config.stream_path,
        width = config.preview_width,
        height = config.preview_height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(Arc::new(ServerConfig::default()))
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::parse(&format!("GET {} HTTP/1.1\r\nHost: robot\r\n\r\n", path)).unwrap()
    }

    fn respond(route: Route) -> HttpResponse {
        match route {
            Route::Respond(resp) => resp,
            Route::Stream => panic!("expected a plain response"),
        }
    }

    #[test]
    fn stream_path_routes_to_stream() {
        assert!(matches!(router().route(&get("/stream.mjpg")), Route::Stream));
        assert!(matches!(router().route(&get("/stream.mjpg?x=1")), Route::Stream));
    }

    #[test]
    fn root_redirects_to_index() {
        let resp = respond(router().route(&get("/")));
        assert_eq!(resp.status_code, 301);
        assert!(resp.serialize().contains("Location: /index.html\r\n"));
    }

    #[test]
    fn index_embeds_stream() {
        let resp = respond(router().route(&get("/index.html")));
        assert_eq!(resp.status_code, 200);
        let body = resp.body.unwrap();
        assert!(body.contains("<img src=\"/stream.mjpg\" width=\"320\" height=\"240\" />"));
    }

    #[test]
    fn unknown_path_is_404() {
        let resp = respond(router().route(&get("/v1/motors/status")));
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn non_get_is_405() {
        let req = HttpRequest::parse("POST /stream.mjpg HTTP/1.1\r\n\r\n").unwrap();
        let resp = respond(router().route(&req));
        assert_eq!(resp.status_code, 405);
    }

    #[test]
    fn stream_head_headers() {
        let s = router().stream_head().serialize();
        assert!(s.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(s.contains("Age: 0\r\n"));
        assert!(s.contains("Cache-Control: no-cache, private\r\n"));
        assert!(s.contains("Pragma: no-cache\r\n"));
        assert!(s.contains("Content-Type: multipart/x-mixed-replace; boundary=FRAME\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn custom_stream_path() {
        let config = ServerConfig {
            stream_path: "/camera.mjpg".to_string(),
            ..Default::default()
        };
        let router = Router::new(Arc::new(config));
        assert!(matches!(router.route(&get("/camera.mjpg")), Route::Stream));
        assert!(matches!(router.route(&get("/stream.mjpg")), Route::Respond(_)));
    }
}

//! HTTP front end for the camera stream.
//!
//! Only what a browser `<img>` tag or a visual-programming block needs:
//! a request-head parser, a response builder, route dispatch and the
//! `multipart/x-mixed-replace` framing of the live stream.
//!
//! ## Routes
//!
//! | Path | Response |
//! |------|----------|
//! | `/` | 301 to `/index.html` |
//! | `/index.html` | page embedding the stream |
//! | `/stream.mjpg` | 200, endless multipart JPEG stream |
//! | anything else | 404 |
//!
//! Each connection carries exactly one request (HTTP/1.0 style). The
//! stream response has no length and ends when the client goes away.

pub mod handler;
pub mod multipart;
pub mod request;
pub mod response;

pub use handler::{Route, Router};
pub use multipart::MultipartWriter;
pub use request::{HttpRequest, HttpVersion};
pub use response::HttpResponse;

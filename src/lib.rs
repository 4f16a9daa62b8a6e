//! corehttpd — a multithreaded HTTP/1.1 server built the way NaviServer's
//! C core is built: a dedicated accept/read-ahead thread, an elastic pool
//! of blocking OS-thread workers per virtual server, a URL-space trie
//! router, and a filter/trace/cleanup request pipeline — with every
//! concurrency primitive a plain `std::thread`, never an async task.
//!
//! # Quick start
//!
//! ```no_run
//! use corehttpd::{Server, Response, StatusCode, Scope};
//!
//! fn hello(_data: &mut (), _req: &corehttpd::Request, resp: &mut Response) {
//!     resp.status(StatusCode::Ok).set_header("content-type", "text/plain");
//!     resp.body_str("Hello, world!");
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let server = Server::<()>::builder()
//!         .listen("127.0.0.1:8080".parse().unwrap())
//!         .route("GET", "/hello", Scope::Exact, hello)
//!         .build()?;
//!     let handle = server.launch()?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     handle.shutdown();
//!     Ok(())
//! }
//! ```
pub(crate) mod sync;

pub mod callbacks;
pub mod config;
pub mod cookie;
pub mod driver;
pub mod error;
pub mod filter;
pub mod pool;
pub mod resource_pool;
pub mod router;
pub mod server;
pub mod sock_callback;
pub mod writer;

pub(crate) mod http {
    pub mod query;
    pub mod response;
    pub mod types;
    pub mod url;
}

pub use crate::{
    callbacks::{Phase, Registry},
    config::ServerConfig,
    driver::{request::Request, Sock},
    error::{AuthFailure, Error, ParseError},
    filter::{Disposition, FilterChain, FilterPhase},
    http::{
        query::Query,
        response::{Body, Handled, Response},
        types::{Method, StatusCode, Version},
        url::Url,
    },
    pool::{ConnPool, PoolStats},
    router::{Match, Scope, UrlSpace},
    server::{ConnectionData, Handler, ReqCtx, Server, ServerBuilder, ServerHandle},
};

//! The application: settings, the middleware stack and the request lifecycle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hserver_http::connection::HttpConnection;
use hserver_http::handler::Handler as TransportHandler;
use hserver_http::protocol::{RawRequest, RawResponse, SocketInfo};
use http::StatusCode;
use serde_json::{Value, json};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{Instrument, Level, debug, error, info, info_span, warn};

use crate::compose::{Handler, Middleware, Pipeline};
use crate::response::is_empty_status;
use crate::{Body, Context, Error, Request, Response, ServerError, Settings};

/// Observes every error handled by [`Context::on_error`].
pub type ErrorListener = Arc<dyn Fn(&Error, &Context) + Send + Sync>;

/// A built application; cheap to clone.
///
/// ```no_run
/// use hserver::{Application, Handler};
///
/// #[tokio::main]
/// async fn main() -> Result<(), hserver::ServerError> {
///     Application::builder()
///         .with(Handler::sync(|ctx| {
///             ctx.set_body("Hello World");
///             Ok(())
///         }))
///         .build()
///         .listen("127.0.0.1:3000")
///         .await
/// }
/// ```
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Arc<Settings>,
    pipeline: Pipeline,
    listeners: Vec<ErrorListener>,
}

pub struct ApplicationBuilder {
    settings: Settings,
    middleware: Vec<Arc<dyn Middleware>>,
    listeners: Vec<ErrorListener>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self { settings: Settings::default(), middleware: Vec::new(), listeners: Vec::new() }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Trust `X-Forwarded-*` headers.
    pub fn proxy(mut self, proxy: bool) -> Self {
        self.settings.proxy = proxy;
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.settings.env = env.into();
        self
    }

    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.settings.max_body_size = max_body_size;
        self
    }

    /// Appends a handler to the middleware stack.
    pub fn with(mut self, handler: impl Into<Handler>) -> Self {
        self.middleware.push(handler.into().into_middleware());
        self
    }

    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Error, &Context) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Builds the application, logging errors unless a listener was added.
    pub fn build(mut self) -> Application {
        if self.listeners.is_empty() {
            self.listeners.push(Arc::new(log_error));
        }

        Application {
            inner: Arc::new(Inner {
                settings: Arc::new(self.settings),
                pipeline: Pipeline::from_middleware(self.middleware),
                listeners: self.listeners,
            }),
        }
    }
}

fn log_error(error: &Error, ctx: &Context) {
    error!(cause = %error, status = ?error.status(), method = %ctx.method(), path = ctx.path(), "request failed");
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn proxy(&self) -> bool {
        self.inner.settings.proxy
    }

    pub fn env(&self) -> &str {
        &self.inner.settings.env
    }

    /// The middleware stack, e.g. to mount this application inside another one.
    pub fn compose(&self) -> Pipeline {
        self.inner.pipeline.clone()
    }

    /// Wraps a raw exchange into a context, with the status reset to `404`.
    pub fn create_context(&self, request: RawRequest, mut response: RawResponse) -> Context {
        response.set_status(StatusCode::NOT_FOUND);
        let request = Request::new(request, Arc::clone(&self.inner.settings));
        Context::new(self.clone(), request, Response::new(response))
    }

    pub(crate) fn emit_error(&self, error: &Error, ctx: &Context) {
        for listener in &self.inner.listeners {
            listener(error, ctx);
        }
    }

    /// Runs the pipeline for one request and writes the outcome.
    pub async fn handle(&self, request: RawRequest, response: RawResponse) -> RawResponse {
        let span = info_span!("request", method = %request.method(), path = request.uri().path());
        let mut ctx = self.create_context(request, response);

        async {
            let result = match self.inner.pipeline.call(&mut ctx).await {
                Ok(()) => respond(&mut ctx).await,
                Err(e) => Err(e),
            };
            if let Err(mut e) = result {
                ctx.on_error(&mut e).await;
            }
            debug!(status = ctx.status(), "request finished");
        }
        .instrument(span)
        .await;

        ctx.into_raw_response()
    }

    /// Binds `address` and serves connections until the process stops.
    pub async fn listen<A: ToSocketAddrs>(self, address: A) -> Result<(), ServerError> {
        // keep an already installed subscriber
        let _ = tracing_subscriber::fmt().with_max_level(Level::INFO).try_init();

        let listener = TcpListener::bind(address).await.map_err(|source| ServerError::Bind { source })?;
        if let Ok(address) = listener.local_addr() {
            info!(%address, "start listening");
        }
        self.serve(listener).await;
        Ok(())
    }

    /// Serves connections accepted from `listener`, one task each.
    pub async fn serve(self, listener: TcpListener) {
        let app = Arc::new(self);
        loop {
            let (tcp_stream, peer) = match listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let app = Arc::clone(&app);
            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let max_body_size = app.settings().max_body_size;
                let connection = HttpConnection::new(reader, writer, SocketInfo::new(Some(peer), false))
                    .with_max_body_size(max_body_size);
                match connection.process(app).await {
                    Ok(()) => debug!(%peer, "finished process, connection shutdown"),
                    Err(e) => warn!(%peer, cause = %e, "connection closed with error"),
                }
            });
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "env": self.env(),
            "proxy": self.proxy(),
            "middleware": self.inner.pipeline.len(),
        })
    }
}

#[async_trait]
impl TransportHandler for Application {
    async fn call(&self, request: RawRequest, response: RawResponse) -> RawResponse {
        self.handle(request, response).await
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("settings", &self.inner.settings)
            .field("middleware", &self.inner.pipeline.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

impl fmt::Debug for ApplicationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationBuilder").field("settings", &self.settings).field("middleware", &self.middleware.len()).finish()
    }
}

/// Writes the body left by the pipeline according to its kind.
async fn respond(ctx: &mut Context) -> Result<(), Error> {
    if !ctx.writable() {
        return Ok(());
    }

    let status = ctx.status();
    let message = match ctx.message() {
        "" => status.to_string(),
        message => message.to_owned(),
    };

    let response = ctx.response_mut();
    let body = response.take_body();
    if is_empty_status(status) {
        response.raw_mut().end(Bytes::new()).await?;
        return Ok(());
    }

    match body {
        Body::Bytes(bytes) => response.raw_mut().end(bytes).await?,
        Body::Text(text) => response.raw_mut().end(text).await?,
        Body::Stream(stream) => response.raw_mut().pipe(stream).await?,
        Body::Json(value) => {
            let json = serde_json::to_vec(&value)?;
            if !response.headers_sent() {
                response.set_length(json.len() as u64);
            }
            response.raw_mut().end(json).await?;
        }
        Body::Empty => {
            if !response.headers_sent() {
                if response.content_type().is_none() {
                    response.infer_content_type("text");
                }
                response.set_length(message.len() as u64);
            }
            response.raw_mut().end(message).await?;
        }
    }
    Ok(())
}

use async_trait::async_trait;
use hserver::{Application, Body, Context, Error, Middleware, Next};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Streams files below `root`; a missing file answers `404`.
#[derive(Debug)]
struct ServeDir {
    root: &'static str,
}

#[async_trait]
impl Middleware for ServeDir {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        if ctx.method() != http::Method::GET && ctx.method() != http::Method::HEAD {
            return next.run(ctx).await;
        }

        let path = ctx.path().trim_start_matches('/').to_owned();
        ctx.assert(!path.split('/').any(|segment| segment == ".."), 400, "invalid path")?;

        let file = File::open(format!("{}/{}", self.root, path)).await?;
        let length = file.metadata().await?.len();

        let extension = path.rsplit_once('.').map(|(_, extension)| extension).unwrap_or("bin");
        ctx.set_content_type(extension)?;
        ctx.set_length(length);
        ctx.set_body(Body::stream(ReaderStream::new(file)));
        Ok(())
    }
}

// curl -v http://127.0.0.1:3000/Cargo.toml
#[tokio::main]
async fn main() -> Result<(), hserver::ServerError> {
    Application::builder().with(ServeDir { root: "." }).build().listen("127.0.0.1:3000").await
}

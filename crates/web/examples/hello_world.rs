use std::time::Instant;

use hserver::{Application, Handler};
use tracing::info;

// curl -v http://127.0.0.1:3000/?name=world
#[tokio::main]
async fn main() -> Result<(), hserver::ServerError> {
    let logger = Handler::callback(|ctx, next| {
        Box::pin(async move {
            let start = Instant::now();
            next.run(ctx).await?;
            info!(method = %ctx.method(), url = ctx.url(), status = ctx.status(), elapsed = ?start.elapsed());
            Ok(())
        })
    });

    let response_time = Handler::callback(|ctx, next| {
        Box::pin(async move {
            let start = Instant::now();
            next.run(ctx).await?;
            ctx.set("x-response-time", format!("{}us", start.elapsed().as_micros()))
        })
    });

    let hello = Handler::sync(|ctx| {
        let name = ctx.query().into_iter().find(|(key, _)| key == "name").map(|(_, value)| value);
        ctx.set_body(format!("Hello {}!\r\n", name.as_deref().unwrap_or("World")));
        Ok(())
    });

    Application::builder().with(logger).with(response_time).with(hello).build().listen("127.0.0.1:3000").await
}

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hserver::{Application, Body, Handler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start(app: Application) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(app.serve(listener));
    address
}

/// Sends `request` on a fresh connection and reads until the server closes it.
async fn send(address: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut output = Vec::new();
    stream.read_to_end(&mut output).await.unwrap();
    String::from_utf8(output).unwrap()
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or_default()
}

#[tokio::test]
async fn hello_world() {
    let app = Application::builder()
        .with(Handler::sync(|ctx| {
            ctx.set_body("ok");
            Ok(())
        }))
        .build();
    let address = start(app).await;

    let response = send(address, "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("content-type: text/plain; charset=utf-8\r\n"));
    assert!(response.contains("content-length: 2\r\n"));
    assert!(response.contains("date: "));
    assert_eq!(body_of(&response), "ok");
}

#[tokio::test]
async fn middleware_runs_as_an_onion() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let layer = |name: &'static str| {
        let trace = Arc::clone(&trace);
        Handler::callback(move |ctx, next| {
            let trace = Arc::clone(&trace);
            Box::pin(async move {
                trace.lock().unwrap().push(format!("{name} in"));
                next.run(ctx).await?;
                trace.lock().unwrap().push(format!("{name} out"));
                Ok(())
            })
        })
    };
    let app = Application::builder()
        .with(layer("a"))
        .with(layer("b"))
        .with(Handler::sync(|ctx| {
            let body = format!("{} {}", ctx.method(), ctx.path());
            ctx.set_body(body);
            Ok(())
        }))
        .build();
    let address = start(app).await;

    let response = send(address, "GET /onion?x=1 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(body_of(&response), "GET /onion");
    assert_eq!(*trace.lock().unwrap(), ["a in", "b in", "b out", "a out"]);
}

#[tokio::test]
async fn unhandled_request_is_not_found() {
    let address = start(Application::builder().build()).await;

    let response = send(address, "GET /missing HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body_of(&response), "Not Found");
}

#[tokio::test]
async fn server_errors_hide_their_message() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = {
        let seen = Arc::clone(&seen);
        Application::builder()
            .on_error(move |error, ctx| seen.lock().unwrap().push(format!("{} {}", ctx.path(), error.message())))
            .with(Handler::sync(|_ctx| Err(hserver::Error::other(std::io::Error::other("database is down")))))
            .build()
    };
    let address = start(app).await;

    let response = send(address, "GET /users HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert_eq!(body_of(&response), "Internal Server Error");
    assert_eq!(*seen.lock().unwrap(), ["/users database is down"]);
}

#[tokio::test]
async fn json_body() {
    let app = Application::builder()
        .with(Handler::sync(|ctx| {
            let name = ctx.query().into_iter().find(|(key, _)| key == "name").map(|(_, value)| value);
            ctx.set_body(serde_json::json!({ "hello": name }));
            Ok(())
        }))
        .build();
    let address = start(app).await;

    let response = send(address, "GET /?name=world HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(response.contains("content-type: application/json; charset=utf-8\r\n"));
    assert_eq!(body_of(&response), r#"{"hello":"world"}"#);
}

#[tokio::test]
async fn head_request_gets_headers_only() {
    let app = Application::builder()
        .with(Handler::sync(|ctx| {
            ctx.set_body(Body::from("twelve bytes"));
            Ok(())
        }))
        .build();
    let address = start(app).await;

    let response = send(address, "HEAD / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("content-length: 12\r\n"));
    assert_eq!(body_of(&response), "");
}

#[tokio::test]
async fn proxy_headers_are_trusted_when_enabled() {
    let echo_host = || {
        Handler::sync(|ctx| {
            let body = format!("{} {}", ctx.protocol(), ctx.host().unwrap_or("-"));
            ctx.set_body(body);
            Ok(())
        })
    };
    let request = "GET / HTTP/1.1\r\nHost: internal:8080\r\nX-Forwarded-Host: example.com\r\nX-Forwarded-Proto: https\r\nConnection: close\r\n\r\n";

    let trusted = start(Application::builder().proxy(true).with(echo_host()).build()).await;
    assert_eq!(body_of(&send(trusted, request).await), "https example.com");

    let direct = start(Application::builder().with(echo_host()).build()).await;
    assert_eq!(body_of(&send(direct, request).await), "http internal:8080");
}

#[tokio::test]
async fn keep_alive_serves_pipelined_requests() {
    let app = Application::builder()
        .with(Handler::sync(|ctx| {
            let path = ctx.path().to_owned();
            ctx.set_body(path);
            Ok(())
        }))
        .build();
    let address = start(app).await;

    let response = send(address, "GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert!(response.ends_with("\r\n\r\n/b"));
}

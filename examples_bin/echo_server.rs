//! A minimal plain-TCP HTTP/2 server, grounded in `example/server.cpp` in
//! `original_source/`: one handler at `/` returning a greeting, started
//! with prior-knowledge h2 (no TLS) so it can be driven with
//! `curl --http2-prior-knowledge`.

use h2box::{Configuration, Method, Params, Response, ResponseBuilder, RoutingRequest, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Configuration::new();
    let mut server = Server::new(config, None).expect("server config");

    server
        .add_handler(Method::GET, "/", |_: &RoutingRequest<'_>, _: &Params| -> Response {
            ResponseBuilder::new(200)
                .set_header("content-type", "text/plain", false)
                .body("hello, world\n")
                .build()
        })
        .expect("valid route pattern");

    let addr = "127.0.0.1:3000".parse().unwrap();
    println!("Starting HTTP/2 server on {addr}");
    println!("Test with: curl --http2-prior-knowledge http://{addr}/");

    if let Err(err) = server.start_plain(&[addr]).await {
        eprintln!("server error: {err}");
    }
}

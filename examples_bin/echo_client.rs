//! A minimal HTTP/2 client, grounded in `example/client.cpp` in
//! `original_source/`: connects, issues one `GET /`, prints the status,
//! headers, and body, then shuts the session down.

use h2box::client::Session;
use http::{HeaderMap, Method, Uri};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut session = Session::connect_plain("127.0.0.1", 3000)
        .await
        .expect("connect to localhost:3000");

    let uri: Uri = "http://127.0.0.1:3000/".parse().unwrap();
    let mut response = session
        .submit(Method::GET, uri, HeaderMap::new(), None)
        .await
        .expect("request failed");

    eprintln!("HTTP/2 {}", response.status);
    for (name, value) in response.headers.iter() {
        eprintln!("{}: {}", name, value.to_str().unwrap_or(""));
    }
    eprintln!();

    while let Some(chunk) = response.on_data().await {
        let chunk = chunk.expect("body read failed");
        eprint!("{}", String::from_utf8_lossy(&chunk));
    }
    eprintln!();

    session.shutdown();
}

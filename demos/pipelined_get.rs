use std::rc::Rc;

use http::Request;
use monoio::{
    io::{AsyncReadRent, AsyncWriteRentExt},
    net::TcpListener,
};
use monoio_http::{common::body::HttpBody, h1::payload::Payload};
use monoio_http_conn::{
    connectors::{ResolvedAddr, TcpConnector},
    http::HttpConnectionBuilder,
};

#[monoio::main]
async fn main() -> Result<(), monoio_http_conn::ConnError> {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // a minimal peer: read both requests, answer them in order
    monoio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut seen: Vec<u8> = Vec::new();
        while seen.windows(4).filter(|w| *w == b"\r\n\r\n".as_slice()).count() < 2 {
            let (res, buf) = stream.read(vec![0u8; 4096]).await;
            let n = res.unwrap();
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        for body in ["hello", "world"] {
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let (res, _) = stream.write_all(resp.into_bytes()).await;
            res.unwrap();
        }
        let _ = stream.read(vec![0u8; 64]).await;
    });

    let builder = HttpConnectionBuilder::new(TcpConnector::default())
        .max_pipelined_requests(2)
        .enable_wire_logging("demo");
    let conn = Rc::new(builder.build(ResolvedAddr::Tcp(addr)).await?);

    let c1 = conn.clone();
    let t1 = monoio::spawn(async move {
        c1.send_request(
            Request::builder()
                .uri("/hello")
                .body(HttpBody::H1(Payload::None))
                .unwrap(),
        )
        .await
    });
    let c2 = conn.clone();
    let t2 = monoio::spawn(async move {
        c2.send_request(
            Request::builder()
                .uri("/world")
                .body(HttpBody::H1(Payload::None))
                .unwrap(),
        )
        .await
    });

    let r1 = t1.await?;
    let r2 = t2.await?;
    println!("first response: {:?}", r1.status());
    println!("second response: {:?}", r2.status());
    conn.close();
    Ok(())
}

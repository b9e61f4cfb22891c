//! Fixtures shared by the adapter tests and by downstream crates' tests
//! (enable the `test-support` feature).

use std::io::Write as _;
use std::net::TcpListener;

use actix_web::{App, HttpServer, web};
use flate2::Compression;
use flate2::write::GzEncoder;

/// Starts an `actix-web` server on an ephemeral port in a background
/// thread and returns its base URL (`http://127.0.0.1:<port>`).
///
/// The listener is bound before the thread starts, so requests made right
/// after this returns queue until the server accepts them.
///
/// # Panics
///
/// Panics if no local port can be bound.
pub fn spawn<F>(configure: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        actix_rt::System::new().block_on(async move {
            HttpServer::new(move || App::new().configure(configure.clone()))
                .workers(1)
                .disable_signals()
                .listen(listener)
                .unwrap()
                .run()
                .await
        })
    });

    format!("http://{addr}")
}

/// Gzip-compresses `bytes` in memory.
///
/// # Panics
///
/// Panics if the encoder fails.
#[must_use]
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Builds an in-memory tar with the given `(name, contents)` members.
///
/// # Panics
///
/// Panics if a member cannot be appended.
#[must_use]
pub fn tar_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

//! Streamed file downloads.
//!
//! Bodies are streamed to `<dest>.part` and renamed into place once
//! complete, so an interrupted download never leaves a file that looks
//! finished.
//!
//! Redirects are followed here rather than by `reqwest`, so the caller's
//! request builder sees every hop and can attach credentials to the hosts
//! that ask for them.

use std::path::{Path, PathBuf};

use futures::StreamExt as _;
use reqwest::Url;
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

use crate::SourceError;
use crate::retry::{self, RetryPolicy};

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// Downloads `url` to `dest`, returning the number of bytes written.
///
/// `build_request` is called with the URL of every hop, starting with
/// `url`. Each hop goes through [`retry::send`]. A body that fails midway
/// is re-requested from the start under the same policy.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails after all retries, the
/// final status is not 2xx, the redirect chain is too long, the file
/// cannot be written, or `cancel` fires.
pub async fn download_file<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    dest: &Path,
    url: &Url,
    build_request: F,
) -> Result<u64, SourceError>
where
    F: Fn(&Url) -> reqwest::RequestBuilder,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SourceError::io(parent, e))?;
    }

    let part = part_path(dest);
    let mut body_attempt: u32 = 0;

    loop {
        match stream_to(policy, cancel, &part, url, &build_request).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest)
                    .await
                    .map_err(|e| SourceError::io(dest, e))?;
                return Ok(bytes);
            }
            Err(SourceError::Http(e)) if body_attempt < policy.max_retries => {
                body_attempt += 1;
                log::warn!(
                    "Download of {} interrupted (body retry {body_attempt}/{}): {e}",
                    dest.display(),
                    policy.max_retries
                );
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        }
    }
}

/// Sends `url` and follows 3xx responses by hand, calling `build_request`
/// for each hop.
///
/// # Errors
///
/// Returns [`SourceError::TooManyRedirects`] after [`MAX_REDIRECTS`] hops,
/// [`SourceError::HttpStatus`] for a redirect without a usable `Location`,
/// or whatever [`retry::send`] returns for a hop.
pub async fn follow_redirects<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    url: &Url,
    build_request: &F,
) -> Result<reqwest::Response, SourceError>
where
    F: Fn(&Url) -> reqwest::RequestBuilder,
{
    let mut current = url.clone();

    for _ in 0..=MAX_REDIRECTS {
        let response = retry::send(policy, cancel, || build_request(&current)).await?;
        if !response.status().is_redirection() {
            return Ok(response);
        }

        let next = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| response.url().join(location).ok());
        let Some(next) = next else {
            return Err(retry::status_error(response).await);
        };

        log::debug!("{current} -> {next}");
        current = next;
    }

    Err(SourceError::TooManyRedirects {
        url: url.to_string(),
    })
}

async fn stream_to<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    part: &Path,
    url: &Url,
    build_request: &F,
) -> Result<u64, SourceError>
where
    F: Fn(&Url) -> reqwest::RequestBuilder,
{
    let response = follow_redirects(policy, cancel, url, build_request).await?;
    if !response.status().is_success() {
        return Err(retry::status_error(response).await);
    }

    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| SourceError::io(part, e))?;

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| SourceError::io(part, e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| SourceError::io(part, e))?;

    Ok(written)
}

/// `<dest>.part`
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use actix_web::http::header;
    use actix_web::{HttpRequest, HttpResponse, web};

    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn writes_body_and_removes_part_file() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/file.bin",
                web::get().to(|| async { HttpResponse::Ok().body(vec![7u8; 10_000]) }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("nested/file.bin");
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/file.bin")).unwrap();

        let bytes = download_file(
            &RetryPolicy::none(),
            &CancellationToken::new(),
            &dest,
            &url,
            |url| client.get(url.clone()),
        )
        .await
        .unwrap();

        assert_eq!(bytes, 10_000);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 10_000);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/gone.tar",
                web::get().to(|| async { HttpResponse::NotFound().finish() }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("gone.tar");
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/gone.tar")).unwrap();

        let err = download_file(
            &RetryPolicy::none(),
            &CancellationToken::new(),
            &dest,
            &url,
            |url| client.get(url.clone()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SourceError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn every_hop_goes_through_the_request_builder() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/start",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .insert_header((header::LOCATION, "/middle"))
                        .finish()
                }),
            )
            .route(
                "/middle",
                web::get().to(|| async {
                    HttpResponse::SeeOther()
                        .insert_header((header::LOCATION, "/end.bin"))
                        .finish()
                }),
            )
            .route(
                "/end.bin",
                web::get().to(|req: HttpRequest| async move {
                    if req.headers().contains_key("x-hop") {
                        HttpResponse::Ok().body("payload")
                    } else {
                        HttpResponse::Unauthorized().finish()
                    }
                }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("end.bin");
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let url = Url::parse(&format!("{base}/start")).unwrap();
        let hops = std::sync::Mutex::new(Vec::new());

        download_file(
            &RetryPolicy::none(),
            &CancellationToken::new(),
            &dest,
            &url,
            |url| {
                hops.lock().unwrap().push(url.path().to_string());
                client.get(url.clone()).header("x-hop", "1")
            },
        )
        .await
        .unwrap();

        assert_eq!(*hops.lock().unwrap(), ["/start", "/middle", "/end.bin"]);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
    }

    #[tokio::test]
    async fn redirect_loop_is_cut_off() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/loop",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .insert_header((header::LOCATION, "/loop"))
                        .finish()
                }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("loop.bin");
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let url = Url::parse(&format!("{base}/loop")).unwrap();

        let err = download_file(
            &RetryPolicy::none(),
            &CancellationToken::new(),
            &dest,
            &url,
            |url| client.get(url.clone()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SourceError::TooManyRedirects { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}

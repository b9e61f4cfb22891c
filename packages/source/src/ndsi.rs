//! NDSI (MODIS daily snow cover) adapter.
//!
//! The archive publishes one HTML listing page per day. Every `.hdf` link
//! on that page answers with a 302/303 whose `Location` is a signed,
//! time-limited download URL; the file itself is fetched from there.
//!
//! Links are independent, so they are downloaded through a bounded worker
//! pool and a failing link is logged and skipped. The date succeeds with
//! however many files made it to disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt as _};
use reqwest::Url;
use scraper::{Html, Selector};
use snow_cover_source_models::{ArtifactFormat, IngestDate, RawArtifact, SourceId};
use tokio_util::sync::CancellationToken;

use crate::config::{HttpConfig, NdsiConfig};
use crate::credentials::Credentials;
use crate::paths::{self, DataLayout};
use crate::progress::ProgressCallback;
use crate::retry::{self, RetryPolicy};
use crate::{FetchReport, RemoteReference, SnowSource, SourceError, download, http_client};

/// Why a single link produced no file.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link answered with something other than a 302/303 redirect.
    #[error("unexpected HTTP {status} instead of a redirect: {excerpt}")]
    UnexpectedStatus {
        /// Response status code.
        status: u16,
        /// Start of the response body.
        excerpt: String,
    },

    /// A redirect came back without a usable `Location` header.
    #[error("redirect without a usable Location header")]
    MissingLocation,

    /// Another link of the same date already resolved to this file name.
    #[error("{name} is already being downloaded from another link")]
    DuplicateName {
        /// Local file name both links resolve to.
        name: String,
    },

    /// Transport or filesystem failure while probing or downloading.
    #[error(transparent)]
    Transport(#[from] SourceError),
}

/// Downloads the NDSI tiles listed for a date.
pub struct NdsiSource {
    layout: DataLayout,
    config: NdsiConfig,
    policy: RetryPolicy,
    /// Hands 3xx responses back: reads the signed URL and walks the
    /// download's redirect chain hop by hop.
    probe: reqwest::Client,
    /// Follows redirects; used for the listing page.
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl NdsiSource {
    /// Creates the adapter. `credentials` are sent as basic auth to
    /// [`NdsiConfig::credential_machine`] only.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if an HTTP client cannot be built.
    pub fn new(
        layout: DataLayout,
        config: NdsiConfig,
        http: &HttpConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            layout,
            config,
            policy: http.retry_policy(),
            probe: http_client(http, false)?,
            client: http_client(http, true)?,
            credentials,
        })
    }

    /// Listing page URL for `date`: `<base>/<YYYY>/<MM>/<DD>/`.
    #[must_use]
    pub fn build_listing_reference(&self, date: IngestDate) -> String {
        format!(
            "{}/{}/{}/{}/",
            self.config.listing_base_url.trim_end_matches('/'),
            date.year_segment(),
            date.month_segment(),
            date.day_segment(),
        )
    }

    /// Fetches the listing page and returns the links to download.
    ///
    /// A listing that cannot be fetched yields no links: the failure is
    /// logged and the date simply has nothing to download.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Cancelled`] if `cancel` fires; every other
    /// failure is logged instead.
    pub async fn discover_links(
        &self,
        listing_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Url>, SourceError> {
        let base = match Url::parse(listing_url) {
            Ok(url) => url,
            Err(e) => {
                log::error!("Invalid NDSI listing URL {listing_url}: {e}");
                return Ok(Vec::new());
            }
        };

        let html = match retry::send_text(&self.policy, cancel, || {
            self.authorize(self.client.get(base.clone()), &base)
        })
        .await
        {
            Ok(html) => html,
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => {
                log::error!("Failed to fetch NDSI listing {listing_url}: {e}");
                return Ok(Vec::new());
            }
        };

        let links = parse_links(&html, &base, &self.config.link_extension);
        if links.is_empty() {
            log::warn!(
                "No {} links found at {listing_url}",
                self.config.link_extension
            );
        } else {
            log::info!(
                "Found {} {} links at {listing_url}",
                links.len(),
                self.config.link_extension
            );
        }

        Ok(links)
    }

    /// Resolves one link's signed URL and downloads it into `dir`.
    ///
    /// Every hop of the download's redirect chain that lands on the
    /// credential machine is sent with basic auth, and session cookies set
    /// along the way are kept.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] for any outcome other than a 302/303 followed
    /// by a successful download.
    pub async fn fetch_one(
        &self,
        link: &Url,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, LinkError> {
        self.fetch_into(link, dir, None, cancel).await
    }

    /// [`Self::fetch_one`], refusing a file name already in `claimed`.
    async fn fetch_into(
        &self,
        link: &Url,
        dir: &Path,
        claimed: Option<&Mutex<HashSet<String>>>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, LinkError> {
        let response = match retry::send(&self.policy, cancel, || {
            self.authorize(self.probe.get(link.clone()), link)
        })
        .await
        {
            Ok(response) => response,
            Err(SourceError::HttpStatus {
                status, excerpt, ..
            }) => return Err(LinkError::UnexpectedStatus { status, excerpt }),
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status != reqwest::StatusCode::FOUND && status != reqwest::StatusCode::SEE_OTHER {
            let body = response.text().await.unwrap_or_default();
            return Err(LinkError::UnexpectedStatus {
                status: status.as_u16(),
                excerpt: retry::excerpt(&body, retry::BODY_EXCERPT_LEN),
            });
        }

        let signed = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| response.url().join(location).ok())
            .ok_or(LinkError::MissingLocation)?;
        drop(response);

        let name = file_name_for(&signed, link, &self.config.link_extension)
            .ok_or(LinkError::MissingLocation)?;
        if let Some(claimed) = claimed {
            let fresh = claimed
                .lock()
                .map(|mut names| names.insert(name.clone()))
                .unwrap_or(true);
            if !fresh {
                return Err(LinkError::DuplicateName { name });
            }
        }
        let dest = dir.join(name);

        log::debug!("{link} -> {signed}");
        let bytes = download::download_file(&self.policy, cancel, &dest, &signed, |url| {
            self.authorize(self.probe.get(url.clone()), url)
        })
        .await?;
        log::info!("Saved {} ({bytes} bytes)", dest.display());

        Ok(dest)
    }

    /// Adds basic auth when `url` points at the credential machine.
    fn authorize(&self, request: reqwest::RequestBuilder, url: &Url) -> reqwest::RequestBuilder {
        match (&self.credentials, url.host_str()) {
            (Some(creds), Some(host))
                if host.eq_ignore_ascii_case(&self.config.credential_machine) =>
            {
                request.basic_auth(&creds.login, Some(&creds.password))
            }
            _ => request,
        }
    }
}

#[async_trait]
impl SnowSource for NdsiSource {
    fn id(&self) -> SourceId {
        SourceId::Ndsi
    }

    fn build_remote_reference(&self, date: IngestDate) -> RemoteReference {
        RemoteReference {
            url: self.build_listing_reference(date),
            file_name: None,
        }
    }

    async fn fetch_raw(
        &self,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, SourceError> {
        let listing_url = self.build_listing_reference(date);
        let links = dedupe_by_name(self.discover_links(&listing_url, cancel).await?);

        if links.is_empty() {
            log::info!("NDSI {date}: nothing to download");
            progress.finish(format!("NDSI {date}: nothing to download"));
            return Ok(FetchReport::empty());
        }

        let dir = self.layout.raw_dir(SourceId::Ndsi, date);
        paths::ensure_dir(&dir)
            .await
            .map_err(|e| SourceError::io(&dir, e))?;

        let attempted = links.len();
        progress.set_total(attempted as u64);

        let claimed = Mutex::new(HashSet::new());
        let results: Vec<_> = stream::iter(links.into_iter().map(|link| {
            let dir = &dir;
            let claimed = &claimed;
            async move {
                let result = self.fetch_into(&link, dir, Some(claimed), cancel).await;
                progress.inc(1);
                (link, result)
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;

        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let mut artifacts = Vec::with_capacity(results.len());
        for (link, result) in results {
            match result {
                Ok(path) => artifacts.push(RawArtifact::new(
                    path,
                    SourceId::Ndsi,
                    date,
                    ArtifactFormat::TagFormat,
                )),
                Err(e) => log::warn!("Skipping {link}: {e}"),
            }
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));

        let succeeded = artifacts.len();
        log::info!("Successfully downloaded {succeeded} of {attempted} NDSI files.");
        progress.finish(format!("NDSI {date}: {succeeded}/{attempted} files"));

        Ok(FetchReport {
            artifacts,
            attempted,
            succeeded,
        })
    }
}

/// Extracts every `<a href>` whose path ends in `extension`
/// (case-insensitive), resolved against `base` and deduplicated in page
/// order.
#[must_use]
pub fn parse_links(html: &str, base: &Url, extension: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let extension = extension.to_ascii_lowercase();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            log::debug!("Ignoring unparseable href {href:?}");
            continue;
        };
        if !url.path().to_ascii_lowercase().ends_with(&extension) {
            continue;
        }
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }

    links
}

/// Drops links whose last path segment repeats an earlier link's, since
/// both would be written to the same local file.
fn dedupe_by_name(links: Vec<Url>) -> Vec<Url> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| {
            let name = last_segment(link).unwrap_or_default();
            let fresh = seen.insert(name);
            if !fresh {
                log::warn!("Skipping {link}: same file name as an earlier link");
            }
            fresh
        })
        .collect()
}

fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Local name for a download: the signed URL's last segment when it is a
/// data file, otherwise the link's.
fn file_name_for(signed: &Url, link: &Url, extension: &str) -> Option<String> {
    let extension = extension.to_ascii_lowercase();

    last_segment(signed)
        .filter(|name| name.to_ascii_lowercase().ends_with(&extension))
        .or_else(|| last_segment(link))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use actix_web::http::header;
    use actix_web::{HttpRequest, HttpResponse, web};

    use super::*;
    use crate::progress::null_progress;
    use crate::test_support;

    fn date() -> IngestDate {
        IngestDate::from_ymd(2025, 5, 12).unwrap()
    }

    fn listing_html(hrefs: &[&str]) -> String {
        let items: String = hrefs
            .iter()
            .map(|href| format!("<li><a href=\"{href}\">{href}</a></li>"))
            .collect();
        format!(
            "<html><body><a href=\"../\">Parent Directory</a><ul>{items}</ul></body></html>"
        )
    }

    fn source(base: &str, root: &Path, credentials: Option<Credentials>) -> NdsiSource {
        let config = NdsiConfig {
            listing_base_url: format!("{base}/listing"),
            concurrency: 2,
            credential_machine: "127.0.0.1".to_string(),
            ..NdsiConfig::default()
        };
        let http = HttpConfig {
            max_retries: 0,
            retry_base_delay_ms: 1,
            ..HttpConfig::default()
        };
        NdsiSource::new(DataLayout::new(root), config, &http, credentials).unwrap()
    }

    /// Serves a listing for 2025-05-12 with `hrefs`, granules that redirect
    /// to `/signed/<name>` (names starting with `missing` answer 404), and
    /// the signed files. Returns the base URL and the signed-hit counter.
    fn granule_server(hrefs: &'static [&'static str]) -> (String, Arc<AtomicUsize>) {
        let signed_hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signed_hits);
        let base = test_support::spawn(move |cfg| {
            let counter = Arc::clone(&counter);
            cfg.route(
                "/listing/2025/05/12/",
                web::get().to(move || async move {
                    HttpResponse::Ok()
                        .content_type("text/html")
                        .body(listing_html(hrefs))
                }),
            )
            .route(
                "/granules/{name}",
                web::get().to(|name: web::Path<String>, req: HttpRequest| async move {
                    if name.starts_with("missing") {
                        return HttpResponse::NotFound().body("granule not found");
                    }
                    let host = req.connection_info().host().to_string();
                    HttpResponse::Found()
                        .insert_header((header::LOCATION, format!("http://{host}/signed/{name}")))
                        .finish()
                }),
            )
            .route(
                "/signed/{name}",
                web::get().to(move |name: web::Path<String>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::Ok().body(format!("HDF:{name}"))
                    }
                }),
            );
        });
        (base, signed_hits)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn listing_reference_is_date_templated() {
        let tmp = tempfile::tempdir().unwrap();
        let source = source("https://example.org/base/", tmp.path(), None);
        assert_eq!(
            source.build_listing_reference(date()),
            "https://example.org/base/listing/2025/05/12/"
        );
        assert_eq!(source.build_remote_reference(date()).file_name, None);
    }

    #[test]
    fn parse_links_filters_resolves_and_dedupes() {
        let base = Url::parse("https://example.org/temporal/2025/05/12/").unwrap();
        let html = listing_html(&[
            "MOD10A1.A2025132.h08v04.061.hdf",
            "https://other.example/abs/MOD10A1.A2025132.h09v04.061.HDF",
            "MOD10A1.A2025132.h08v04.061.hdf",
            "MOD10A1.A2025132.h08v04.061.hdf.xml",
            "browse.jpg",
        ]);

        let links = parse_links(&html, &base, ".hdf");

        assert_eq!(
            links,
            vec![
                Url::parse("https://example.org/temporal/2025/05/12/MOD10A1.A2025132.h08v04.061.hdf")
                    .unwrap(),
                Url::parse("https://other.example/abs/MOD10A1.A2025132.h09v04.061.HDF").unwrap(),
            ]
        );
    }

    #[test]
    fn file_name_prefers_signed_segment() {
        let link = Url::parse("https://example.org/granules/a.hdf").unwrap();
        let signed = Url::parse("https://signed.example/bucket/x.hdf?sig=abc").unwrap();
        assert_eq!(file_name_for(&signed, &link, ".hdf").as_deref(), Some("x.hdf"));

        let opaque = Url::parse("https://signed.example/download?id=1").unwrap();
        assert_eq!(file_name_for(&opaque, &link, ".hdf").as_deref(), Some("a.hdf"));
    }

    #[tokio::test]
    async fn redirect_is_followed_by_one_download() {
        let (base, signed_hits) = granule_server(&["../../../../granules/x.hdf"]);
        let tmp = tempfile::tempdir().unwrap();
        let source = source(&base, tmp.path(), None);

        let report = source
            .fetch_raw(date(), &null_progress(), &CancellationToken::new())
            .await
            .unwrap();

        let dir = tmp.path().join("ndsi/raw/2025/05/12");
        assert_eq!(signed_hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.artifacts[0].path, dir.join("x.hdf"));
        assert_eq!(report.artifacts[0].format, ArtifactFormat::TagFormat);
        assert_eq!(std::fs::read_to_string(dir.join("x.hdf")).unwrap(), "HDF:x.hdf");
    }

    #[tokio::test]
    async fn non_redirect_status_downloads_nothing() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/login/x.hdf",
                web::get().to(|| async { HttpResponse::Ok().body("<html>Please log in</html>") }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let source = source(&base, tmp.path(), None);
        let link = Url::parse(&format!("{base}/login/x.hdf")).unwrap();

        let err = source
            .fetch_one(&link, tmp.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            LinkError::UnexpectedStatus { status, excerpt } => {
                assert_eq!(status, 200);
                assert_eq!(excerpt, "<html>Please log in</html>");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(files_in(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn partial_failures_are_counted_and_skipped() {
        let (base, signed_hits) = granule_server(&[
            "/granules/a.hdf",
            "/granules/missing_1.hdf",
            "/granules/b.hdf",
            "/granules/missing_2.hdf",
            "/granules/c.hdf",
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let source = source(&base, tmp.path(), None);

        let report = source
            .fetch_raw(date(), &null_progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 3);
        assert_eq!(signed_hits.load(Ordering::SeqCst), 3);
        assert_eq!(
            files_in(&tmp.path().join("ndsi/raw/2025/05/12")),
            ["a.hdf", "b.hdf", "c.hdf"]
        );
    }

    #[tokio::test]
    async fn unreachable_listing_means_nothing_to_do() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/listing/2025/05/12/",
                web::get().to(|| async { HttpResponse::InternalServerError().finish() }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let source = source(&base, tmp.path(), None);

        let report = source
            .fetch_raw(date(), &null_progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.nothing_to_do());
        assert_eq!(report.succeeded, 0);
        assert!(!tmp.path().join("ndsi").exists());
    }

    #[tokio::test]
    async fn credentials_go_to_the_credential_machine() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/private/x.hdf",
                web::get().to(|req: HttpRequest| async move {
                    if req.headers().contains_key(header::AUTHORIZATION) {
                        HttpResponse::SeeOther()
                            .insert_header((header::LOCATION, "/signed/x.hdf"))
                            .finish()
                    } else {
                        HttpResponse::Unauthorized().body("login required")
                    }
                }),
            )
            .route(
                "/signed/x.hdf",
                web::get().to(|| async { HttpResponse::Ok().body("HDF") }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let link = Url::parse(&format!("{base}/private/x.hdf")).unwrap();
        let cancel = CancellationToken::new();

        let anonymous = source(&base, tmp.path(), None);
        let err = anonymous.fetch_one(&link, tmp.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, LinkError::UnexpectedStatus { status: 401, .. }));

        let creds = Credentials {
            login: "alice".to_string(),
            password: "pw".to_string(),
        };
        let authorized = source(&base, tmp.path(), Some(creds));
        let path = authorized.fetch_one(&link, tmp.path(), &cancel).await.unwrap();
        assert_eq!(path, tmp.path().join("x.hdf"));
    }

    #[tokio::test]
    async fn credentials_follow_the_redirect_chain_to_the_credential_machine() {
        let base = test_support::spawn(|cfg| {
            cfg.route(
                "/granules/x.hdf",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .insert_header((header::LOCATION, "/signed/x.hdf"))
                        .finish()
                }),
            )
            .route(
                "/signed/x.hdf",
                web::get().to(|req: HttpRequest| async move {
                    if req.headers().contains_key(header::AUTHORIZATION) {
                        return HttpResponse::BadRequest().body("credentials sent to data host");
                    }
                    let login = format!("http://{}/urs/login", req.app_config().local_addr());
                    HttpResponse::Found()
                        .insert_header((header::LOCATION, login))
                        .finish()
                }),
            )
            .route(
                "/urs/login",
                web::get().to(|req: HttpRequest| async move {
                    if !req.headers().contains_key(header::AUTHORIZATION) {
                        return HttpResponse::Unauthorized().body("login required");
                    }
                    HttpResponse::Found()
                        .insert_header((header::SET_COOKIE, "urs_session=ok; Path=/"))
                        .insert_header((header::LOCATION, "/data/x.hdf"))
                        .finish()
                }),
            )
            .route(
                "/data/x.hdf",
                web::get().to(|req: HttpRequest| async move {
                    let has_session = req
                        .headers()
                        .get(header::COOKIE)
                        .and_then(|value| value.to_str().ok())
                        .is_some_and(|cookies| cookies.contains("urs_session=ok"));
                    if has_session {
                        HttpResponse::Ok().body("HDF")
                    } else {
                        HttpResponse::Unauthorized().body("no session")
                    }
                }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        // The link and signed URL live on a different host name than the
        // credential machine (127.0.0.1).
        let link = Url::parse(&format!(
            "{}/granules/x.hdf",
            base.replace("127.0.0.1", "localhost")
        ))
        .unwrap();
        let cancel = CancellationToken::new();

        let anonymous = source(&base, tmp.path(), None);
        let err = anonymous.fetch_one(&link, tmp.path(), &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(SourceError::HttpStatus { status: 401, .. })
        ));

        let creds = Credentials {
            login: "alice".to_string(),
            password: "pw".to_string(),
        };
        let authorized = source(&base, tmp.path(), Some(creds));
        let path = authorized.fetch_one(&link, tmp.path(), &cancel).await.unwrap();
        assert_eq!(path, tmp.path().join("x.hdf"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "HDF");
    }

    #[test]
    fn links_sharing_a_file_name_are_dropped() {
        let links = vec![
            Url::parse("https://example.org/a/x.hdf").unwrap(),
            Url::parse("https://mirror.example/b/x.hdf").unwrap(),
            Url::parse("https://example.org/a/y.hdf").unwrap(),
        ];

        assert_eq!(
            dedupe_by_name(links),
            vec![
                Url::parse("https://example.org/a/x.hdf").unwrap(),
                Url::parse("https://example.org/a/y.hdf").unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn same_link_name_is_downloaded_once() {
        let (base, signed_hits) =
            granule_server(&["/granules/a.hdf", "/granules/a.hdf?copy=2", "/granules/b.hdf"]);
        let tmp = tempfile::tempdir().unwrap();
        let source = source(&base, tmp.path(), None);

        let report = source
            .fetch_raw(date(), &null_progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(signed_hits.load(Ordering::SeqCst), 2);
        assert_eq!(
            files_in(&tmp.path().join("ndsi/raw/2025/05/12")),
            ["a.hdf", "b.hdf"]
        );
    }

    #[tokio::test]
    async fn links_resolving_to_one_signed_name_download_once() {
        let signed_hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signed_hits);
        let base = test_support::spawn(move |cfg| {
            let counter = Arc::clone(&counter);
            cfg.route(
                "/listing/2025/05/12/",
                web::get().to(|| async {
                    HttpResponse::Ok()
                        .content_type("text/html")
                        .body(listing_html(&["/granules/a.hdf", "/granules/b.hdf"]))
                }),
            )
            .route(
                "/granules/{name}",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .insert_header((header::LOCATION, "/signed/tile.hdf"))
                        .finish()
                }),
            )
            .route(
                "/signed/tile.hdf",
                web::get().to(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::Ok().body("HDF")
                    }
                }),
            );
        });
        let tmp = tempfile::tempdir().unwrap();
        let source = source(&base, tmp.path(), None);

        let report = source
            .fetch_raw(date(), &null_progress(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(signed_hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            files_in(&tmp.path().join("ndsi/raw/2025/05/12")),
            ["tile.hdf"]
        );
    }
}

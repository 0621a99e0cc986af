//! Product downloads from the ASF data pool and the Copernicus Data Space
//!
//! Partial downloads are resumed with range requests and every finished
//! archive is tested before a `.downloaded` marker is written next to it.

use crate::io::scene::Sentinel1Scene;
use crate::types::{SarError, SarResult};
use rayon::prelude::*;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;

const EARTHDATA_HOST: &str = "urs.earthdata.nasa.gov";
const ASF_HOST: &str = "datapool.asf.alaska.edu";
const CDSE_TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
const CDSE_CATALOGUE_URL: &str = "https://catalogue.dataspace.copernicus.eu/odata/v1/Products";
const CDSE_DOWNLOAD_URL: &str = "https://zipper.dataspace.copernicus.eu/odata/v1/Products";
const MAX_REDIRECTS: usize = 10;

/// Where products are fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    /// Alaska Satellite Facility data pool (NASA Earthdata login)
    Asf,
    /// Copernicus Data Space Ecosystem
    Cdse,
}

impl std::str::FromStr for Mirror {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asf" => Ok(Mirror::Asf),
            "cdse" | "copernicus" => Ok(Mirror::Cdse),
            other => Err(SarError::Config(format!("Unknown download mirror: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

enum Auth<'a> {
    Basic(&'a Credentials),
    Bearer(&'a str),
}

/// Blocking downloader for one mirror
pub struct Downloader {
    client: Client,
    mirror: Mirror,
    credentials: Credentials,
    token: Option<String>,
}

impl Downloader {
    pub fn new(mirror: Mirror, credentials: Credentials) -> SarResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .connect_timeout(Duration::from_secs(60))
            .user_agent(concat!("sarprep/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SarError::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            mirror,
            credentials,
            token: None,
        })
    }

    /// Fetch an access token for the Copernicus Data Space
    pub fn authenticate(&mut self) -> SarResult<()> {
        if self.mirror != Mirror::Cdse {
            return Ok(());
        }

        let response = self
            .client
            .post(CDSE_TOKEN_URL)
            .form(&[
                ("client_id", "cdse-public"),
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .map_err(|e| SarError::Download(format!("Token request failed: {}", e)))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SarError::Authentication(
                "Copernicus Data Space rejected the credentials".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(SarError::Download(format!(
                "Token request failed with status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = serde_json::from_str(&read_text(response)?)?;
        let token = body["access_token"]
            .as_str()
            .ok_or_else(|| SarError::Authentication("No access token in response".to_string()))?;
        self.token = Some(token.to_string());
        log::debug!("Obtained Copernicus Data Space access token");
        Ok(())
    }

    /// Download one scene into the `SAR/<TYPE>/<YYYY>/<MM>/<DD>` layout.
    ///
    /// A failed attempt is retried once.
    pub fn download_scene(&self, scene: &Sentinel1Scene, download_dir: &Path) -> SarResult<PathBuf> {
        let marker = scene.download_marker(download_dir)?;
        let target = scene.download_path(download_dir, true)?;
        if marker.exists() {
            log::info!("{} already downloaded", scene.scene_id);
            return Ok(target);
        }

        let mut last_error = None;
        for attempt in 1..=2 {
            match self.download_once(scene, &target) {
                Ok(()) => {
                    File::create(&marker)?;
                    log::info!("Downloaded {}", scene.scene_id);
                    return Ok(target);
                }
                Err(SarError::Authentication(msg)) => return Err(SarError::Authentication(msg)),
                Err(e) => {
                    log::warn!("Download attempt {} of {} failed: {}", attempt, scene.scene_id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SarError::Download(format!("Could not download {}", scene.scene_id))))
    }

    fn download_once(&self, scene: &Sentinel1Scene, target: &Path) -> SarResult<()> {
        let url = self.product_url(scene)?;
        self.fetch_resumable(&url, target)?;

        if let Err(e) = check_zip(target) {
            log::warn!("{} failed the archive test, removing it", target.display());
            std::fs::remove_file(target)?;
            return Err(e);
        }
        Ok(())
    }

    fn product_url(&self, scene: &Sentinel1Scene) -> SarResult<String> {
        match self.mirror {
            Mirror::Asf => scene.asf_url(),
            Mirror::Cdse => {
                let token = self.token()?;
                let response = self
                    .client
                    .get(CDSE_CATALOGUE_URL)
                    .query(&[("$filter", format!("Name eq '{}.SAFE'", scene.scene_id))])
                    .bearer_auth(token)
                    .send()
                    .map_err(|e| SarError::Download(format!("Catalogue request failed: {}", e)))?;
                if !response.status().is_success() {
                    return Err(SarError::Download(format!(
                        "Catalogue request failed with status {}",
                        response.status()
                    )));
                }
                let body: serde_json::Value = serde_json::from_str(&read_text(response)?)?;
                let uuid = body["value"][0]["Id"]
                    .as_str()
                    .ok_or_else(|| SarError::Download(format!("{} not found in the catalogue", scene.scene_id)))?;
                Ok(format!("{}({})/$value", CDSE_DOWNLOAD_URL, uuid))
            }
        }
    }

    fn token(&self) -> SarResult<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| SarError::Authentication("Not authenticated with Copernicus Data Space".to_string()))
    }

    fn auth(&self) -> SarResult<Auth<'_>> {
        match self.mirror {
            Mirror::Asf => Ok(Auth::Basic(&self.credentials)),
            Mirror::Cdse => Ok(Auth::Bearer(self.token()?)),
        }
    }

    /// Follow redirects by hand so credentials reach the login host
    fn send_following(&self, url: &str, range_start: u64) -> SarResult<Response> {
        let auth = self.auth()?;
        let mut url = Url::parse(url).map_err(|e| SarError::Download(format!("Bad URL {}: {}", url, e)))?;

        for _ in 0..MAX_REDIRECTS {
            let mut request = self.client.get(url.clone());
            if range_start > 0 {
                request = request.header(reqwest::header::RANGE, format!("bytes={}-", range_start));
            }
            request = authorize(request, &auth, &url);

            let response = request
                .send()
                .map_err(|e| SarError::Download(format!("Request to {} failed: {}", url, e)))?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|l| l.to_str().ok())
                .ok_or_else(|| SarError::Download("Redirect without location".to_string()))?;
            url = url
                .join(location)
                .map_err(|e| SarError::Download(format!("Bad redirect {}: {}", location, e)))?;
            log::debug!("Redirected to {}", url.host_str().unwrap_or_default());
        }

        Err(SarError::Download(format!("Too many redirects for {}", url)))
    }

    fn fetch_resumable(&self, url: &str, target: &Path) -> SarResult<()> {
        let existing = std::fs::metadata(target).map(|m| m.len()).unwrap_or(0);
        if existing > 0 {
            log::info!("Resuming download of {} at byte {}", target.display(), existing);
        }

        let mut response = self.send_following(url, existing)?;
        let status = response.status();

        let mut file = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SarError::Authentication(format!("{} for {}", status, url)))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(()),
            StatusCode::PARTIAL_CONTENT => OpenOptions::new().append(true).open(target)?,
            s if s.is_success() => File::create(target)?,
            s => {
                return Err(SarError::Download(format!("HTTP {} for {}", s.as_u16(), url)));
            }
        };

        let written = response
            .copy_to(&mut file)
            .map_err(|e| SarError::Download(format!("Transfer of {} interrupted: {}", url, e)))?;
        log::debug!("Wrote {} bytes to {}", written, target.display());
        Ok(())
    }

    /// Download many scenes with at most `concurrency` parallel transfers
    pub fn download_batch(
        &self,
        scenes: &[Sentinel1Scene],
        download_dir: &Path,
        concurrency: usize,
    ) -> SarResult<Vec<(String, SarResult<PathBuf>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .build()
            .map_err(|e| SarError::Processing(format!("Failed to build download pool: {}", e)))?;

        Ok(pool.install(|| {
            scenes
                .par_iter()
                .map(|scene| (scene.scene_id.clone(), self.download_scene(scene, download_dir)))
                .collect()
        }))
    }
}

fn authorize(request: RequestBuilder, auth: &Auth<'_>, url: &Url) -> RequestBuilder {
    match auth {
        Auth::Basic(creds) => match url.host_str() {
            Some(EARTHDATA_HOST) | Some(ASF_HOST) => {
                request.basic_auth(&creds.username, Some(&creds.password))
            }
            _ => request,
        },
        Auth::Bearer(token) => request.bearer_auth(token),
    }
}

fn read_text(mut response: Response) -> SarResult<String> {
    let mut body = String::new();
    response.read_to_string(&mut body)?;
    Ok(body)
}

/// Read every member of a zip archive so CRC errors surface
pub fn check_zip(path: &Path) -> SarResult<()> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| SarError::NotValidFile(format!("{}: {}", path.display(), e)))?;

    let mut sink = std::io::sink();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| SarError::NotValidFile(format!("{}: {}", path.display(), e)))?;
        std::io::copy(&mut entry, &mut sink)
            .map_err(|e| SarError::NotValidFile(format!("{} member {}: {}", path.display(), i, e)))?;
    }
    Ok(())
}

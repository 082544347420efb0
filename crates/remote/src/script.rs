//! The recorded script, as stored on the device's web server.
//!
//! The device keeps the recording in a text file that it serves over plain
//! HTTP, next to an upload endpoint for replacing it.

use std::{future::Future, path::Path};

use anyhow::Context as _;
use reqwest::{
    multipart::{Form, Part},
    Url,
};

use crate::error::UploadRejection;

pub const SCRIPT_FILE: &str = "recording.txt";
pub const UPLOAD_PATH: &str = "upload";
pub const UPLOAD_MIME: &str = "text/plain";
pub const MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024;

/// Splits the script into lines. The file ends with a newline, so whatever
/// follows the last newline isn't a (complete) line.
pub fn parse_script(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_owned())
        .collect();
    lines.pop();
    lines
}

/// Checks an upload before anything is sent anywhere.
pub fn check_upload(mime: &str, size: u64) -> Result<(), UploadRejection> {
    if mime != UPLOAD_MIME {
        return Err(UploadRejection::WrongType {
            mime: mime.to_owned(),
        });
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(UploadRejection::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(())
}

pub fn mime_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("gcode") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// A script that has passed [`check_upload`].
#[derive(Clone, Debug)]
pub struct UploadRequest {
    contents: Vec<u8>,
}

impl UploadRequest {
    pub fn new(mime: &str, contents: Vec<u8>) -> Result<Self, UploadRejection> {
        check_upload(mime, contents.len() as u64)?;
        Ok(UploadRequest { contents })
    }

    /// Checks the file's type and size before reading it.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let mime = mime_for_path(path);
        let size = std::fs::metadata(path)
            .with_context(|| format!("reading {}", path.display()))?
            .len();
        check_upload(mime, size).map_err(crate::Error::from)?;
        let contents = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(UploadRequest::new(mime, contents).map_err(crate::Error::from)?)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

/// Somewhere the recorded script lives.
///
/// The futures are `Send` so that the driver can run them in the background.
pub trait ScriptStore: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send;

    /// Replaces the stored script.
    fn upload(&self, req: UploadRequest) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub struct ScriptClient {
    http: reqwest::Client,
    script_url: Url,
    upload_url: Url,
}

impl ScriptClient {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base).with_context(|| format!("bad url {base:?}"))?;
        Ok(ScriptClient {
            http: reqwest::Client::new(),
            script_url: base.join(SCRIPT_FILE)?,
            upload_url: base.join(UPLOAD_PATH)?,
        })
    }

}

impl ScriptStore for ScriptClient {
    async fn fetch(&self) -> anyhow::Result<Vec<String>> {
        let text = self
            .http
            .get(self.script_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_script(&text))
    }

    /// Replaces the recording on the device. Whatever the file was called,
    /// the server stores it as [`SCRIPT_FILE`].
    async fn upload(&self, req: UploadRequest) -> anyhow::Result<()> {
        let part = Part::bytes(req.contents)
            .file_name(SCRIPT_FILE)
            .mime_str(UPLOAD_MIME)?;
        self.http
            .post(self.upload_url.clone())
            .multipart(Form::new().part("file", part))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

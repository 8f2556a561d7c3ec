use crate::error::{RemixError, Result};
use reqwest::{blocking::Client, StatusCode};
use std::{
    fs,
    fs::File,
    io::{Read, Write},
    path::Path,
    time::Duration,
};

pub fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .build()
        .map_err(|e| RemixError::Internal(format!("http client build failed: {e}")))
}

/// Streams `url` into `dest`, going through a `.part` file so a failed
/// download never leaves a truncated `dest` behind.
///
/// `on_progress(downloaded, total)` gets `total == 0` when the server sends
/// no length.
pub fn download_with_progress<F>(client: &Client, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
where
    F: FnMut(u64, u64),
{
    let tmp = dest.with_extension("part");

    let resp = client
        .get(url)
        .send()
        .map_err(|e| RemixError::Fetch(format!("{url}: {e}")))?;
    if resp.status() == StatusCode::NOT_FOUND {
        return Err(RemixError::NotFound(url.to_string()));
    }
    let mut resp = resp
        .error_for_status()
        .map_err(|e| RemixError::Fetch(format!("{url}: {e}")))?;

    let total = resp.content_length().unwrap_or(0);
    on_progress(0, total);

    let result = (|| -> std::io::Result<u64> {
        let mut file = File::create(&tmp)?;
        let mut downloaded: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = resp.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            downloaded += n as u64;
            on_progress(downloaded, total);
        }
        file.flush()?;
        Ok(downloaded)
    })();

    let downloaded = match result {
        Ok(n) => n,
        Err(e) => {
            fs::remove_file(&tmp).ok();
            return Err(RemixError::Fetch(format!("{url}: {e}")));
        }
    };

    if dest.exists() {
        fs::remove_file(dest).ok();
    }
    fs::rename(&tmp, dest).map_err(|e| RemixError::Fetch(format!("{url}: {e}")))?;

    on_progress(total.max(downloaded), total.max(downloaded));

    Ok(downloaded)
}

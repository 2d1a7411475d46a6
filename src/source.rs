//! Vector tile data sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::Client;

use crate::Error;

/// Index uniquely identifying a map tile.
#[derive(Default, Hash, PartialEq, Eq, Copy, Clone, Debug)]
pub struct TileCoords {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoords {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Whether `self` covers `other` from a lower zoom level.
    pub fn is_ancestor_of(&self, other: TileCoords) -> bool {
        if self.z > other.z {
            return false;
        }

        let delta = other.z - self.z;
        other.x >> delta == self.x && other.y >> delta == self.y
    }
}

/// Cancellation token for asynchronous operations.
///
/// Clones share the same cancellation state.
#[derive(Clone, Default, Debug)]
pub struct Cancellable(Arc<AtomicBool>);

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of all operations using this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Fail with [`Error::Canceled`] once cancellation was requested.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() { Err(Error::Canceled) } else { Ok(()) }
    }
}

/// Raw tile data returned by a [`DataSource`].
///
/// `coords` names the tile the bytes belong to. Sources may answer a request
/// with an ancestor tile, in which case the renderer zooms into the matching
/// window (overzoom).
#[derive(Clone, Debug)]
pub struct TileData {
    pub bytes: Vec<u8>,
    pub coords: TileCoords,
}

/// Supplier of encoded vector tiles.
pub trait DataSource: Send + Sync {
    /// Fetch the tile data for the given coordinates.
    fn fetch(
        &self,
        coords: TileCoords,
        cancellable: &Cancellable,
    ) -> impl Future<Output = Result<TileData, Error>> + Send;
}

/// HTTP tile downloader expanding a URL template per tile.
///
/// The template uses `#X#`, `#Y#`, `#Z#` and `#TMSY#` placeholders, with
/// `#TMSY#` the flipped TMS row number.
pub struct TileDownloader {
    client: Client,
    url_template: String,
}

impl TileDownloader {
    pub fn new(url_template: &str) -> Self {
        Self { client: Client::new(), url_template: url_template.into() }
    }

    fn tile_url(&self, coords: TileCoords) -> String {
        let tms_y = (1u32 << coords.z) - coords.y - 1;
        self.url_template
            .replace("#X#", &coords.x.to_string())
            .replace("#Y#", &coords.y.to_string())
            .replace("#Z#", &coords.z.to_string())
            .replace("#TMSY#", &tms_y.to_string())
    }
}

impl DataSource for TileDownloader {
    async fn fetch(&self, coords: TileCoords, cancellable: &Cancellable) -> Result<TileData, Error> {
        cancellable.check()?;

        let url = self.tile_url(coords);
        let response = self.client.get(&url).send().await.map_err(|err| {
            if err.is_builder() {
                Error::MalformedUrl(url.clone())
            } else if err.is_connect() || err.is_timeout() {
                Error::Offline
            } else {
                Error::BadResponse(err.to_string())
            }
        })?;

        let response = response
            .error_for_status()
            .map_err(|err| Error::BadResponse(err.to_string()))?;
        let bytes =
            response.bytes().await.map_err(|err| Error::BadResponse(err.to_string()))?;

        cancellable.check()?;
        Ok(TileData { bytes: bytes.to_vec(), coords })
    }
}

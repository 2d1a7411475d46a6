//! Sprite sheets resolving icon names to atlas regions.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::ReentrantMutex;
use serde::Deserialize;
use tiny_skia::{IntRect, Pixmap};

use crate::Error;

/// Upper bound on remembered fallback results, evicted oldest-first.
const FALLBACK_CACHE_CAPACITY: usize = 100;

/// Function resolving sprites the sheet does not contain.
pub type FallbackFn = Arc<dyn Fn(&str, f64) -> Option<Sprite> + Send + Sync>;

/// A named subregion of an atlas image.
///
/// Sprites are cheap handles; clones share the same atlas region. The
/// logical size is the pixel size divided by the sprite's scale factor.
#[derive(Clone)]
pub struct Sprite {
    inner: Arc<SpriteInner>,
}

struct SpriteInner {
    atlas: Arc<Pixmap>,
    rect: IntRect,
    scale: f64,
}

impl Sprite {
    pub fn new(atlas: Arc<Pixmap>, rect: IntRect, scale: f64) -> Self {
        Self { inner: Arc::new(SpriteInner { atlas, rect, scale }) }
    }

    /// Logical width in style pixels.
    pub fn width(&self) -> f64 {
        self.inner.rect.width() as f64 / self.inner.scale
    }

    /// Logical height in style pixels.
    pub fn height(&self) -> f64 {
        self.inner.rect.height() as f64 / self.inner.scale
    }

    /// Atlas pixels per logical pixel.
    pub fn scale(&self) -> f64 {
        self.inner.scale
    }

    /// Copy the sprite's atlas region into its own pixmap.
    pub fn region(&self) -> Option<Pixmap> {
        self.inner.atlas.clone_rect(self.inner.rect)
    }
}

impl PartialEq for Sprite {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Sprite {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sprite")
            .field("rect", &self.inner.rect)
            .field("scale", &self.inner.scale)
            .finish_non_exhaustive()
    }
}

/// Descriptor of one sprite in a page's JSON index.
#[derive(Deserialize)]
struct SpriteDescriptor {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    #[serde(rename = "pixelRatio")]
    pixel_ratio: Option<f64>,
}

/// A thread-safe collection of named sprites with per-scale variants.
///
/// All operations take a per-sheet re-entrant lock, so the fallback function
/// may call back into the sheet.
#[derive(Default)]
pub struct SpriteSheet {
    inner: ReentrantMutex<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    sprites: IndexMap<String, Vec<Sprite>>,
    fallback: Option<FallbackFn>,
    fallback_cache: HashMap<String, Option<Sprite>>,
    fallback_order: VecDeque<String>,
}

impl SpriteSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single sprite.
    pub fn add_sprite(&self, name: &str, sprite: Sprite) {
        let guard = self.inner.lock();
        guard.borrow_mut().sprites.entry(name.into()).or_default().push(sprite);
    }

    /// Register all sprites of an atlas page.
    ///
    /// The JSON maps sprite names to their atlas regions:
    /// `{"name": {"x": 0, "y": 0, "width": 16, "height": 16, "pixelRatio": 2}}`.
    /// Sprites without a `pixelRatio` use `default_scale`.
    pub fn add_page(
        &self,
        atlas: Arc<Pixmap>,
        json: &str,
        default_scale: f64,
    ) -> Result<(), Error> {
        let descriptors: IndexMap<String, SpriteDescriptor> = serde_json::from_str(json)
            .map_err(|err| Error::MalformedStyle(format!("invalid sprite sheet: {err}")))?;

        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        for (name, descriptor) in descriptors {
            let scale = descriptor.pixel_ratio.unwrap_or(default_scale);
            if descriptor.width <= 0 || descriptor.height <= 0 || scale <= 0. {
                return Err(Error::MalformedStyle(format!(
                    "sprite {name:?} has non-positive dimensions"
                )));
            }

            let rect = IntRect::from_xywh(
                descriptor.x,
                descriptor.y,
                descriptor.width as u32,
                descriptor.height as u32,
            )
            .filter(|rect| {
                descriptor.x >= 0
                    && descriptor.y >= 0
                    && rect.right() <= atlas.width() as i32
                    && rect.bottom() <= atlas.height() as i32
            })
            .ok_or_else(|| {
                Error::MalformedStyle(format!("sprite {name:?} exceeds its atlas"))
            })?;

            let sprite = Sprite::new(atlas.clone(), rect, scale);
            inner.sprites.entry(name).or_default().push(sprite);
        }

        Ok(())
    }

    /// Install or remove the fallback invoked for unknown names.
    ///
    /// Replacing the fallback discards all remembered fallback results.
    pub fn set_fallback(&self, fallback: Option<FallbackFn>) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.fallback = fallback;
        inner.fallback_cache.clear();
        inner.fallback_order.clear();
    }

    /// Look up a sprite by name.
    ///
    /// An exact scale match wins, then the smallest larger scale, then the
    /// largest smaller one. Unknown names consult the fallback; its results,
    /// including misses, are remembered up to a bounded capacity.
    pub fn get_sprite(&self, name: &str, scale: f64) -> Option<Sprite> {
        let guard = self.inner.lock();

        let fallback = {
            let inner = guard.borrow();

            if let Some(candidates) = inner.sprites.get(name)
                && let Some(sprite) = select_scale(candidates, scale)
            {
                return Some(sprite.clone());
            }

            if let Some(cached) = inner.fallback_cache.get(name) {
                return cached.clone();
            }

            inner.fallback.clone()?
        };

        // The borrow is released while user code runs; the re-entrant lock
        // stays held, so concurrent lookups cannot duplicate the call.
        let sprite = fallback(name, scale);

        let mut inner = guard.borrow_mut();
        if inner.fallback_cache.len() >= FALLBACK_CACHE_CAPACITY
            && !inner.fallback_cache.contains_key(name)
            && let Some(oldest) = inner.fallback_order.pop_front()
        {
            inner.fallback_cache.remove(&oldest);
        }
        if inner.fallback_cache.insert(name.into(), sprite.clone()).is_none() {
            inner.fallback_order.push_back(name.into());
        }

        sprite
    }
}

/// Pick the best candidate for a requested scale factor.
fn select_scale(candidates: &[Sprite], requested: f64) -> Option<&Sprite> {
    if let Some(exact) = candidates.iter().find(|sprite| sprite.scale() == requested) {
        return Some(exact);
    }

    let larger = candidates
        .iter()
        .filter(|sprite| sprite.scale() > requested)
        .min_by(|a, b| a.scale().total_cmp(&b.scale()));
    if larger.is_some() {
        return larger;
    }

    candidates
        .iter()
        .filter(|sprite| sprite.scale() < requested)
        .max_by(|a, b| a.scale().total_cmp(&b.scale()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn test_atlas() -> Arc<Pixmap> {
        Arc::new(Pixmap::new(64, 64).unwrap())
    }

    fn test_sprite(scale: f64) -> Sprite {
        Sprite::new(test_atlas(), IntRect::from_xywh(0, 0, 16, 16).unwrap(), scale)
    }

    #[test]
    fn page_parsing() {
        let sheet = SpriteSheet::new();
        let json = r#"{
            "icon": {"x": 0, "y": 0, "width": 16, "height": 16},
            "icon-big": {"x": 16, "y": 0, "width": 32, "height": 32, "pixelRatio": 2}
        }"#;
        sheet.add_page(test_atlas(), json, 1.).unwrap();

        let icon = sheet.get_sprite("icon", 1.).unwrap();
        assert_eq!(icon.scale(), 1.);
        assert_eq!(icon.width(), 16.);

        let big = sheet.get_sprite("icon-big", 2.).unwrap();
        assert_eq!(big.scale(), 2.);
        assert_eq!(big.width(), 16.);

        assert_eq!(sheet.get_sprite("missing", 1.), None);
    }

    #[test]
    fn page_validation() {
        let sheet = SpriteSheet::new();

        let zero_size = r#"{"icon": {"x": 0, "y": 0, "width": 0, "height": 16}}"#;
        assert!(matches!(
            sheet.add_page(test_atlas(), zero_size, 1.),
            Err(Error::MalformedStyle(_))
        ));

        let out_of_bounds = r#"{"icon": {"x": 60, "y": 0, "width": 16, "height": 16}}"#;
        assert!(matches!(
            sheet.add_page(test_atlas(), out_of_bounds, 1.),
            Err(Error::MalformedStyle(_))
        ));

        assert!(matches!(
            sheet.add_page(test_atlas(), "not json", 1.),
            Err(Error::MalformedStyle(_))
        ));
    }

    #[test]
    fn scale_selection() {
        let sheet = SpriteSheet::new();
        sheet.add_sprite("icon", test_sprite(1.));
        sheet.add_sprite("icon", test_sprite(2.));
        sheet.add_sprite("icon", test_sprite(4.));

        // Exact match.
        assert_eq!(sheet.get_sprite("icon", 2.).unwrap().scale(), 2.);
        // Smallest larger scale.
        assert_eq!(sheet.get_sprite("icon", 3.).unwrap().scale(), 4.);
        assert_eq!(sheet.get_sprite("icon", 0.5).unwrap().scale(), 1.);
        // Largest smaller scale.
        assert_eq!(sheet.get_sprite("icon", 8.).unwrap().scale(), 4.);
    }

    #[test]
    fn fallback_cache() {
        let sheet = SpriteSheet::new();
        sheet.add_sprite("a", test_sprite(1.));

        let calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = calls.clone();
        sheet.set_fallback(Some(Arc::new(move |name, _scale| {
            fallback_calls.fetch_add(1, Ordering::Relaxed);
            (name == "b").then(|| test_sprite(1.))
        })));

        // Builtin sprites never consult the fallback.
        assert!(sheet.get_sprite("a", 1.).is_some());
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        // The first miss invokes the fallback, the second is cached.
        let first = sheet.get_sprite("b", 1.).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        let second = sheet.get_sprite("b", 1.).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(first, second);

        // Negative results are cached as well.
        assert_eq!(sheet.get_sprite("c", 1.), None);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(sheet.get_sprite("c", 1.), None);
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        // Enough distinct lookups evict the oldest entries.
        for i in 0..101 {
            sheet.get_sprite(&format!("junk{i}"), 1.);
        }
        let calls_before = calls.load(Ordering::Relaxed);
        assert_eq!(sheet.get_sprite("c", 1.), None);
        assert_eq!(calls.load(Ordering::Relaxed), calls_before + 1);
    }

    #[test]
    fn replacing_fallback_clears_cache() {
        let sheet = SpriteSheet::new();

        let calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = calls.clone();
        sheet.set_fallback(Some(Arc::new(move |_name, _scale| {
            fallback_calls.fetch_add(1, Ordering::Relaxed);
            None
        })));

        assert_eq!(sheet.get_sprite("x", 1.), None);
        assert_eq!(sheet.get_sprite("x", 1.), None);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let fallback_calls = calls.clone();
        sheet.set_fallback(Some(Arc::new(move |_name, _scale| {
            fallback_calls.fetch_add(1, Ordering::Relaxed);
            None
        })));

        assert_eq!(sheet.get_sprite("x", 1.), None);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn reentrant_fallback() {
        let sheet = Arc::new(SpriteSheet::new());
        sheet.add_sprite("base", test_sprite(1.));

        // A fallback which resolves aliases through the sheet itself.
        let fallback_sheet = sheet.clone();
        sheet.set_fallback(Some(Arc::new(move |name, scale| {
            name.strip_prefix("alias-")
                .and_then(|base| fallback_sheet.get_sprite(base, scale))
        })));

        assert!(sheet.get_sprite("alias-base", 1.).is_some());
        assert_eq!(sheet.get_sprite("alias-missing", 1.), None);
    }
}

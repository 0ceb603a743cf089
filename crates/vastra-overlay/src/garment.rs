//! Procedural garment silhouettes.
//!
//! Each [`GarmentVariant`] maps at compile time to a [`GarmentSpec`]: a
//! declarative list of filled panels whose corners are named anchor
//! ratios in `[0, 1]` of the raster width and height. Adding a variant is
//! a new table, not new drawing code.
//!
//! All variants share the same canonical frame: the shoulder line sits at
//! [`SHOULDER_LINE`] of the raster height, the hem at the bottom edge.
//! Hoods and collars use the band above the shoulder line.
//!
//! Rasterization uses `tiny-skia` with anti-aliasing; the coverage mask
//! becomes the alpha channel and every pixel carries the garment colour,
//! so edge softening only has to touch alpha (see [`crate::blur`]).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Transform};

use crate::blur;
use crate::types::{OverlayError, Rgb, RgbaImage};

/// Vertical position of the shoulder line in every garment raster, as a
/// fraction of the raster height.
pub const SHOULDER_LINE: f32 = 0.1;

/// The closed set of supported clothing silhouettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentVariant {
    /// Short-sleeved tee.
    TShirt,
    /// Button shirt with elbow-length sleeves.
    Shirt,
    /// Long tunic with full sleeves.
    Kurta,
    /// Sleeveless A-line dress.
    Dress,
    /// Hooded sweatshirt.
    Hoodie,
    /// Jacket with a raised collar.
    Jacket,
}

impl GarmentVariant {
    /// All variants, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::TShirt,
        Self::Shirt,
        Self::Kurta,
        Self::Dress,
        Self::Hoodie,
        Self::Jacket,
    ];

    /// The lowercase key used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TShirt => "tshirt",
            Self::Shirt => "shirt",
            Self::Kurta => "kurta",
            Self::Dress => "dress",
            Self::Hoodie => "hoodie",
            Self::Jacket => "jacket",
        }
    }

    /// The geometry recipe for this variant.
    #[must_use]
    pub fn spec(self) -> &'static GarmentSpec {
        match self {
            Self::TShirt => &TSHIRT,
            Self::Shirt => &SHIRT,
            Self::Kurta => &KURTA,
            Self::Dress => &DRESS,
            Self::Hoodie => &HOODIE,
            Self::Jacket => &JACKET,
        }
    }
}

impl fmt::Display for GarmentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GarmentVariant {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| OverlayError::InvalidVariant(s.to_string()))
    }
}

/// A named point of a panel outline, in raster-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    /// What the point is (`shoulder_left`, `hem_right`, ...).
    pub name: &'static str,
    /// Horizontal ratio of the raster width.
    pub x: f32,
    /// Vertical ratio of the raster height.
    pub y: f32,
}

const fn anchor(name: &'static str, x: f32, y: f32) -> Anchor {
    Anchor { name, x, y }
}

/// Reflect an outline across the vertical centre line.
const fn mirror<const N: usize>(mut anchors: [Anchor; N]) -> [Anchor; N] {
    let mut i = 0;
    while i < N {
        anchors[i].x = 1.0 - anchors[i].x;
        i += 1;
    }
    anchors
}

/// One filled polygon of a garment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Panel {
    /// Panel name (`torso`, `sleeve_left`, `hood`, ...).
    pub name: &'static str,
    /// Outline corners, in drawing order.
    pub anchors: &'static [Anchor],
}

/// A variant's geometry recipe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GarmentSpec {
    /// Garment length as a multiple of the shoulder distance (before
    /// depth scaling).
    pub length_factor: f64,
    /// Panels, painted in order.
    pub panels: &'static [Panel],
}

// ---------------------------------------------------------------------------
// Proportion tables
// ---------------------------------------------------------------------------

const TEE_TORSO: [Anchor; 4] = [
    anchor("shoulder_left", 0.12, 0.1),
    anchor("shoulder_right", 0.88, 0.1),
    anchor("hem_right", 0.85, 1.0),
    anchor("hem_left", 0.15, 1.0),
];
const TEE_SLEEVE_LEFT: [Anchor; 4] = [
    anchor("shoulder", 0.12, 0.1),
    anchor("cuff_outer", 0.0, 0.3),
    anchor("cuff_inner", 0.06, 0.42),
    anchor("armpit", 0.16, 0.32),
];
const TEE_SLEEVE_RIGHT: [Anchor; 4] = mirror(TEE_SLEEVE_LEFT);

const SHIRT_TORSO: [Anchor; 4] = [
    anchor("shoulder_left", 0.12, 0.1),
    anchor("shoulder_right", 0.88, 0.1),
    anchor("hem_right", 0.86, 1.0),
    anchor("hem_left", 0.14, 1.0),
];
const SHIRT_SLEEVE_LEFT: [Anchor; 4] = [
    anchor("shoulder", 0.12, 0.1),
    anchor("cuff_outer", 0.0, 0.45),
    anchor("cuff_inner", 0.08, 0.55),
    anchor("armpit", 0.16, 0.34),
];
const SHIRT_SLEEVE_RIGHT: [Anchor; 4] = mirror(SHIRT_SLEEVE_LEFT);

const KURTA_TORSO: [Anchor; 4] = [
    anchor("shoulder_left", 0.15, 0.1),
    anchor("shoulder_right", 0.85, 0.1),
    anchor("hem_right", 0.82, 1.0),
    anchor("hem_left", 0.18, 1.0),
];
const KURTA_SLEEVE_LEFT: [Anchor; 4] = [
    anchor("shoulder", 0.15, 0.1),
    anchor("cuff_outer", 0.02, 0.45),
    anchor("cuff_inner", 0.1, 0.5),
    anchor("armpit", 0.19, 0.28),
];
const KURTA_SLEEVE_RIGHT: [Anchor; 4] = mirror(KURTA_SLEEVE_LEFT);

const DRESS_BODY: [Anchor; 4] = [
    anchor("shoulder_left", 0.2, 0.1),
    anchor("shoulder_right", 0.8, 0.1),
    anchor("hem_right", 1.0, 1.0),
    anchor("hem_left", 0.0, 1.0),
];

const HOODIE_TORSO: [Anchor; 4] = [
    anchor("shoulder_left", 0.1, 0.1),
    anchor("shoulder_right", 0.9, 0.1),
    anchor("hem_right", 0.86, 1.0),
    anchor("hem_left", 0.14, 1.0),
];
const HOODIE_SLEEVE_LEFT: [Anchor; 4] = [
    anchor("shoulder", 0.1, 0.1),
    anchor("cuff_outer", 0.0, 0.55),
    anchor("cuff_inner", 0.08, 0.62),
    anchor("armpit", 0.15, 0.34),
];
const HOODIE_SLEEVE_RIGHT: [Anchor; 4] = mirror(HOODIE_SLEEVE_LEFT);
const HOOD: [Anchor; 3] = [
    anchor("neck_left", 0.25, 0.1),
    anchor("crown", 0.5, 0.0),
    anchor("neck_right", 0.75, 0.1),
];

const JACKET_TORSO: [Anchor; 4] = [
    anchor("shoulder_left", 0.08, 0.1),
    anchor("shoulder_right", 0.92, 0.1),
    anchor("hem_right", 0.9, 1.0),
    anchor("hem_left", 0.1, 1.0),
];
const JACKET_SLEEVE_LEFT: [Anchor; 4] = [
    anchor("shoulder", 0.08, 0.1),
    anchor("cuff_outer", 0.0, 0.55),
    anchor("cuff_inner", 0.07, 0.6),
    anchor("armpit", 0.13, 0.34),
];
const JACKET_SLEEVE_RIGHT: [Anchor; 4] = mirror(JACKET_SLEEVE_LEFT);
const COLLAR: [Anchor; 3] = [
    anchor("neck_left", 0.35, 0.1),
    anchor("collar_peak", 0.5, 0.02),
    anchor("neck_right", 0.65, 0.1),
];

static TSHIRT: GarmentSpec = GarmentSpec {
    length_factor: 1.6,
    panels: &[
        Panel { name: "torso", anchors: &TEE_TORSO },
        Panel { name: "sleeve_left", anchors: &TEE_SLEEVE_LEFT },
        Panel { name: "sleeve_right", anchors: &TEE_SLEEVE_RIGHT },
    ],
};

static SHIRT: GarmentSpec = GarmentSpec {
    length_factor: 1.6,
    panels: &[
        Panel { name: "torso", anchors: &SHIRT_TORSO },
        Panel { name: "sleeve_left", anchors: &SHIRT_SLEEVE_LEFT },
        Panel { name: "sleeve_right", anchors: &SHIRT_SLEEVE_RIGHT },
    ],
};

static KURTA: GarmentSpec = GarmentSpec {
    length_factor: 2.2,
    panels: &[
        Panel { name: "torso", anchors: &KURTA_TORSO },
        Panel { name: "sleeve_left", anchors: &KURTA_SLEEVE_LEFT },
        Panel { name: "sleeve_right", anchors: &KURTA_SLEEVE_RIGHT },
    ],
};

static DRESS: GarmentSpec = GarmentSpec {
    length_factor: 2.4,
    panels: &[Panel { name: "body", anchors: &DRESS_BODY }],
};

static HOODIE: GarmentSpec = GarmentSpec {
    length_factor: 1.7,
    panels: &[
        Panel { name: "torso", anchors: &HOODIE_TORSO },
        Panel { name: "sleeve_left", anchors: &HOODIE_SLEEVE_LEFT },
        Panel { name: "sleeve_right", anchors: &HOODIE_SLEEVE_RIGHT },
        Panel { name: "hood", anchors: &HOOD },
    ],
};

static JACKET: GarmentSpec = GarmentSpec {
    length_factor: 1.7,
    panels: &[
        Panel { name: "torso", anchors: &JACKET_TORSO },
        Panel { name: "sleeve_left", anchors: &JACKET_SLEEVE_LEFT },
        Panel { name: "sleeve_right", anchors: &JACKET_SLEEVE_RIGHT },
        Panel { name: "collar", anchors: &COLLAR },
    ],
};

// ---------------------------------------------------------------------------
// Rasterization
// ---------------------------------------------------------------------------

/// Build a garment raster of `width x height` pixels.
///
/// Every pixel carries `color`; alpha is the anti-aliased panel coverage
/// (255 inside, 0 outside) softened by a Gaussian of `edge_blur_sigma`.
/// The output depends only on the arguments.
///
/// # Errors
///
/// Returns [`OverlayError::Render`] if either dimension is zero or the
/// pixmap cannot be allocated.
#[allow(clippy::cast_precision_loss)]
pub fn build(
    variant: GarmentVariant,
    width: u32,
    height: u32,
    color: Rgb,
    edge_blur_sigma: f32,
) -> Result<RgbaImage, OverlayError> {
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        OverlayError::Render(format!("cannot allocate {width}x{height} garment raster"))
    })?;

    let mut paint = Paint::default();
    paint.set_color_rgba8(255, 255, 255, 255);
    paint.anti_alias = true;

    let (w, h) = (width as f32, height as f32);
    for panel in variant.spec().panels {
        let mut pb = PathBuilder::new();
        let mut corners = panel.anchors.iter();
        if let Some(first) = corners.next() {
            pb.move_to(first.x * w, first.y * h);
            for a in corners {
                pb.line_to(a.x * w, a.y * h);
            }
            pb.close();
        }
        // Degenerate outlines (zero area at this size) simply draw nothing.
        if let Some(path) = pb.finish() {
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    let [r, g, b] = color.0;
    let mut raster = RgbaImage::new(width, height);
    for (dst, src) in raster.pixels_mut().zip(pixmap.pixels()) {
        dst.0 = [r, g, b, src.alpha()];
    }

    blur::soften_alpha(&mut raster, edge_blur_sigma);
    Ok(raster)
}

/// Identity of a built raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GarmentKey {
    /// Silhouette.
    pub variant: GarmentVariant,
    /// Raster width in pixels.
    pub width: u32,
    /// Raster height in pixels.
    pub height: u32,
    /// Fill colour.
    pub color: Rgb,
}

#[derive(Debug, Default)]
struct CacheInner {
    rasters: HashMap<GarmentKey, Arc<RgbaImage>>,
    order: VecDeque<GarmentKey>,
}

/// Bounded, thread-safe memo of built garment rasters.
///
/// Rasters are a pure function of their [`GarmentKey`], so one cache is
/// shared by every session of an engine. When full, the oldest entry is
/// evicted first. A capacity of zero disables caching.
#[derive(Debug)]
pub struct GarmentCache {
    capacity: usize,
    edge_blur_sigma: f32,
    max_dimension: u32,
    inner: Mutex<CacheInner>,
}

impl GarmentCache {
    /// Create a cache.
    #[must_use]
    pub fn new(capacity: usize, edge_blur_sigma: f32, max_dimension: u32) -> Self {
        Self {
            capacity,
            edge_blur_sigma,
            max_dimension,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Return the raster for `key`, building it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Render`] if a side exceeds the configured
    /// maximum or [`build`] fails.
    pub fn get_or_build(&self, key: GarmentKey) -> Result<Arc<RgbaImage>, OverlayError> {
        if key.width > self.max_dimension || key.height > self.max_dimension {
            return Err(OverlayError::Render(format!(
                "garment raster {}x{} exceeds the {} px limit",
                key.width, key.height, self.max_dimension
            )));
        }

        if let Some(hit) = self.lock()?.rasters.get(&key) {
            return Ok(Arc::clone(hit));
        }

        // Build outside the lock; a racing duplicate build is harmless.
        let raster = Arc::new(build(
            key.variant,
            key.width,
            key.height,
            key.color,
            self.edge_blur_sigma,
        )?);

        if self.capacity > 0 {
            let mut inner = self.lock()?;
            if !inner.rasters.contains_key(&key) {
                while inner.order.len() >= self.capacity {
                    if let Some(oldest) = inner.order.pop_front() {
                        inner.rasters.remove(&oldest);
                    }
                }
                inner.order.push_back(key);
                inner.rasters.insert(key, Arc::clone(&raster));
            }
        }
        Ok(raster)
    }

    /// Number of cached rasters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.rasters.len())
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheInner>, OverlayError> {
        self.inner
            .lock()
            .map_err(|_| OverlayError::Render("garment cache lock poisoned".to_string()))
    }
}

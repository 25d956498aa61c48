//! In-memory RGBA textures and the projections that map directions onto them.

use std::f64::consts::{PI, TAU};

use optica_math::{DVec2, DVec3};

named_enum! {
    /// Projection between cartesian directions and texture coordinates.
    pub enum TextureMapping: "texture mapping" {
        /// `(x/z, y/z)`
        Perspective => "Perspective",
        /// Equirectangular: azimuth along u, polar angle along v
        Spherical => "Spherical",
        /// Full sphere, polar angle proportional to the distance from the centre
        FisheyeEquidistant => "Equidistant",
        /// Hemisphere, polar angle proportional to the distance from the centre
        FisheyeEquidistantHalf => "Equidistant Half",
        /// Orthographic projection of the front hemisphere
        Flat => "Flat",
    }
}

impl Default for TextureMapping {
    fn default() -> Self {
        TextureMapping::Perspective
    }
}

impl TextureMapping {
    /// Map a direction (not necessarily normalized) to texture coordinates.
    pub fn cart_to_tex(self, dir: DVec3) -> DVec2 {
        match self {
            TextureMapping::Perspective => DVec2::new(dir.x / dir.z, dir.y / dir.z),
            TextureMapping::Spherical => {
                let rho = dir.x.hypot(dir.y);
                DVec2::new((dir.y.atan2(dir.x) + PI) / TAU, rho.atan2(dir.z) / PI)
            }
            TextureMapping::FisheyeEquidistant | TextureMapping::FisheyeEquidistantHalf => {
                let rho = dir.x.hypot(dir.y);
                if rho == 0.0 {
                    // On the axis; the back pole has no unique image
                    return DVec2::splat(0.5);
                }
                let span = if self == TextureMapping::FisheyeEquidistant { TAU } else { PI };
                let scale = rho.atan2(dir.z) / (rho * span);
                DVec2::new(dir.x * scale + 0.5, dir.y * scale + 0.5)
            }
            TextureMapping::Flat => {
                let unit = dir.normalize_or_zero();
                DVec2::new(unit.x * 0.5 + 0.5, unit.y * 0.5 + 0.5)
            }
        }
    }

    /// Map texture coordinates back to a direction.
    ///
    /// The direction has unit length except for `Perspective`, which returns
    /// a point on the plane `z = 1`.
    pub fn tex_to_cart(self, tex: DVec2) -> DVec3 {
        match self {
            TextureMapping::Perspective => DVec3::new(tex.x, tex.y, 1.0),
            TextureMapping::Spherical => {
                let azimuth = tex.x * TAU - PI;
                let polar = tex.y * PI;
                DVec3::new(
                    polar.sin() * azimuth.cos(),
                    polar.sin() * azimuth.sin(),
                    polar.cos(),
                )
            }
            TextureMapping::FisheyeEquidistant | TextureMapping::FisheyeEquidistantHalf => {
                let offset = tex - DVec2::splat(0.5);
                let rad = offset.length();
                let span = if self == TextureMapping::FisheyeEquidistant { TAU } else { PI };
                let polar = rad * span;
                let scale = if rad == 0.0 { 0.0 } else { polar.sin() / rad };
                DVec3::new(offset.x * scale, offset.y * scale, polar.cos())
            }
            TextureMapping::Flat => {
                let x = tex.x * 2.0 - 1.0;
                let y = tex.y * 2.0 - 1.0;
                DVec3::new(x, y, (1.0 - x * x - y * y).max(0.0).sqrt())
            }
        }
    }
}

/// An RGBA texture held in memory.
///
/// Pixels are stored row-major with 8 bit per channel; row 0 is `v = 0`.
#[derive(Clone, Debug)]
pub struct Texture {
    /// Name objects refer to this texture by
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl Texture {
    /// Create a texture from pixel data.
    ///
    /// Missing pixels read as transparent black.
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<[u8; 4]>) -> Self {
        let name = name.into();
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            log::warn!(
                "Texture {} has {} pixels, expected {}x{}",
                name,
                pixels.len(),
                width,
                height
            );
        }
        Self {
            name,
            width,
            height,
            pixels,
        }
    }

    /// Create a texture by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(
        name: impl Into<String>,
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self::new(name, width, height, pixels)
    }

    /// A 1x1 texture.
    pub fn solid_color(name: impl Into<String>, color: [u8; 4]) -> Self {
        Self::new(name, 1, 1, vec![color])
    }

    /// Nearest-texel lookup; coordinates outside `[0, 1]` are clamped to the border.
    pub fn texel(&self, tex: DVec2) -> [u8; 4] {
        if !tex.is_finite() || self.width == 0 || self.height == 0 {
            return [0, 0, 0, 0];
        }
        let x = ((tex.x * self.width as f64).floor() as i64).clamp(0, self.width as i64 - 1);
        let y = ((tex.y * self.height as f64).floor() as i64).clamp(0, self.height as i64 - 1);
        let idx = y as usize * self.width as usize + x as usize;
        self.pixels.get(idx).copied().unwrap_or([0, 0, 0, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_lookup() {
        let tex = Texture::from_fn("ramp", 4, 2, |x, y| [x as u8 * 10, y as u8, 0, 255]);
        assert_eq!(tex.texel(DVec2::new(0.0, 0.0)), [0, 0, 0, 255]);
        assert_eq!(tex.texel(DVec2::new(0.6, 0.9)), [20, 1, 0, 255]);
        // Clamped to the border
        assert_eq!(tex.texel(DVec2::new(7.0, -3.0)), [30, 0, 0, 255]);
        assert_eq!(tex.texel(DVec2::new(f64::NAN, 0.5)), [0, 0, 0, 0]);
    }

    #[test]
    fn test_solid_color() {
        let tex = Texture::solid_color("red", [255, 0, 0, 128]);
        assert_eq!(tex.texel(DVec2::new(0.3, 0.7)), [255, 0, 0, 128]);
    }

    #[test]
    fn test_mapping_names() {
        assert_eq!(
            "equidistant half".parse::<TextureMapping>().unwrap(),
            TextureMapping::FisheyeEquidistantHalf
        );
        assert_eq!("Flat".parse::<TextureMapping>().unwrap(), TextureMapping::Flat);
        assert!("Mercator".parse::<TextureMapping>().is_err());
    }

    #[test]
    fn test_mappings_invert_each_other() {
        let dirs = [
            DVec3::new(0.1, 0.2, 1.0),
            DVec3::new(-0.3, 0.25, 0.9),
            DVec3::new(0.4, -0.1, 0.8),
        ];
        for mapping in TextureMapping::ALL.iter().copied() {
            for dir in dirs {
                let unit = dir.normalize();
                let back = mapping.tex_to_cart(mapping.cart_to_tex(unit));
                let back = back.normalize();
                assert!(
                    (back - unit).length() < 1e-9,
                    "{} maps {:?} back to {:?}",
                    mapping,
                    unit,
                    back
                );
            }
        }
    }

    #[test]
    fn test_equidistant_radius() {
        // A direction 90 degrees off axis lands halfway to the border of the half fisheye
        let tex = TextureMapping::FisheyeEquidistantHalf.cart_to_tex(DVec3::new(1.0, 0.0, 0.0));
        assert!((tex.x - 1.0).abs() < 1e-12);
        assert!((tex.y - 0.5).abs() < 1e-12);

        let tex = TextureMapping::FisheyeEquidistant.cart_to_tex(DVec3::new(1.0, 0.0, 0.0));
        assert!((tex.x - 0.75).abs() < 1e-12);
    }
}

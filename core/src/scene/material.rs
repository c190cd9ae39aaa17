use obj::raw::material::{Material as RawMaterial, MtlColor};

use crate::common::RgbaColor;

/// Surface parameters uploaded with every mesh draw.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Material {
    pub diffuse: RgbaColor,
    pub specular: RgbaColor,
    pub ambient: RgbaColor,
    pub emissive: RgbaColor,
    pub shininess: f32,
    /// Weight of the specular term, in [0, 1].
    pub shininess_percent: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse: RgbaColor::gray(0.5),
            specular: RgbaColor::WHITE,
            ambient: RgbaColor::WHITE,
            emissive: RgbaColor::WHITE,
            shininess: 2.0,
            shininess_percent: 0.5,
        }
    }
}

impl Material {
    /// Builds a material from an MTL definition. Missing colors keep their
    /// defaults, except ambient which falls back to the diffuse color.
    pub fn from_mtl(material: &RawMaterial) -> Self {
        let defaults = Self::default();

        let diffuse = material.diffuse.as_ref().and_then(mtl_color).unwrap_or(defaults.diffuse);
        let mut result = Self {
            diffuse,
            specular: material.specular.as_ref().and_then(mtl_color).unwrap_or(defaults.specular),
            ambient: material.ambient.as_ref().and_then(mtl_color).unwrap_or(diffuse),
            emissive: material.emissive.as_ref().and_then(mtl_color).unwrap_or(defaults.emissive),
            shininess: material.specular_exponent.unwrap_or(defaults.shininess),
            shininess_percent: defaults.shininess_percent,
        };
        if let Some(alpha) = material.dissolve {
            result.diffuse.a = alpha;
        }
        result
    }
}

fn mtl_color(color: &MtlColor) -> Option<RgbaColor> {
    match *color {
        MtlColor::Rgb(r, g, b) => Some(RgbaColor::new(r, g, b, 1.0)),
        // CIEXYZ and spectral colors are not supported
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> RawMaterial {
        let mut mtl = obj::raw::parse_mtl(source.as_bytes()).unwrap();
        mtl.materials.remove("test").unwrap()
    }

    #[test]
    fn test_default_material() {
        let material = Material::default();
        assert_eq!(material.diffuse, RgbaColor::new(0.5, 0.5, 0.5, 1.0));
        assert_eq!(material.shininess, 2.0);
        assert_eq!(material.shininess_percent, 0.5);
    }

    #[test]
    fn test_ambient_falls_back_to_diffuse() {
        let material = Material::from_mtl(&parse("newmtl test\nKd 1.0 0.0 0.0\n"));
        assert_eq!(material.ambient, RgbaColor::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(material.specular, RgbaColor::WHITE);

        let material = Material::from_mtl(&parse("newmtl test\nKd 1.0 0.0 0.0\nKa 0.1 0.2 0.3\n"));
        assert_eq!(material.ambient, RgbaColor::new(0.1, 0.2, 0.3, 1.0));
    }

    #[test]
    fn test_mtl_shininess_and_alpha() {
        let material = Material::from_mtl(&parse("newmtl test\nNs 32.0\nd 0.25\n"));
        assert_eq!(material.shininess, 32.0);
        assert_eq!(material.diffuse.a, 0.25);
    }
}

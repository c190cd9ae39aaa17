use std::path::{Path, PathBuf};

use image::{imageops::FilterType, RgbaImage};

/// Depth texture format used for depth buffers and shadow maps.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Errors when loading an image into a texture.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("Failed to load image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Image {path:?} has invalid dimensions {width}x{height}")]
    Dimensions { path: PathBuf, width: u32, height: u32 },
    #[error("Cubemap face {path:?} is {width}x{height}, expected a square of side {expected}")]
    CubemapFace {
        path: PathBuf,
        width: u32,
        height: u32,
        expected: u32,
    },
}

/// Sampling and storage options for an uploaded texture.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TextureOptions {
    /// Store as sRGB (color data) instead of linear (data such as heights).
    pub srgb: bool,
    pub mipmaps: bool,
    pub address_mode: wgpu::AddressMode,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            srgb: true,
            mipmaps: false,
            address_mode: wgpu::AddressMode::ClampToEdge,
        }
    }
}

impl TextureOptions {
    /// Mipmapped color texture that tiles across the surface.
    pub fn tiled() -> Self {
        Self {
            srgb: true,
            mipmaps: true,
            address_mode: wgpu::AddressMode::Repeat,
        }
    }

    /// Linear, unfiltered data texture.
    pub fn data() -> Self {
        Self {
            srgb: false,
            mipmaps: false,
            address_mode: wgpu::AddressMode::ClampToEdge,
        }
    }

    fn format(&self) -> wgpu::TextureFormat {
        if self.srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        }
    }
}

/// Loads an RGBA8 image from disk.
pub fn load_rgba(path: &Path) -> Result<RgbaImage, TextureError> {
    let image = image::open(path)
        .map_err(|source| TextureError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(TextureError::Dimensions {
            path: path.to_path_buf(),
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(image)
}

/// Number of mip levels of a full chain for an image of this size.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Downsampled levels of `image`, level 0 first.
pub fn mip_chain(image: &RgbaImage) -> Vec<RgbaImage> {
    let levels = mip_level_count(image.width(), image.height());
    let mut chain = Vec::with_capacity(levels as usize);
    chain.push(image.clone());
    for level in 1..levels {
        let width = (image.width() >> level).max(1);
        let height = (image.height() >> level).max(1);
        let previous = &chain[level as usize - 1];
        chain.push(image::imageops::resize(previous, width, height, FilterType::Triangle));
    }
    chain
}

// =============================================================================
// GPU Texture
// =============================================================================

/// A sampled 2D texture with the bind group that exposes it to a texture unit.
pub struct GpuTexture {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub bind_group: wgpu::BindGroup,
    size: (u32, u32),
}

impl GpuTexture {
    pub fn from_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        image: &RgbaImage,
        options: TextureOptions,
        label: &str,
    ) -> Self {
        let levels = if options.mipmaps {
            mip_chain(image)
        } else {
            vec![image.clone()]
        };

        let size = wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: options.format(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (mip_level, level) in levels.iter().enumerate() {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &texture,
                    mip_level: mip_level as u32,
                    origin: wgpu::Origin3d::ZERO,
                },
                level.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * level.width()),
                    rows_per_image: Some(level.height()),
                },
                wgpu::Extent3d {
                    width: level.width(),
                    height: level.height(),
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mipmap_filter = if options.mipmaps {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label} Sampler")),
            address_mode_u: options.address_mode,
            address_mode_v: options.address_mode,
            address_mode_w: options.address_mode,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter,
            ..Default::default()
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} Bind Group")),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        Self {
            texture,
            view,
            sampler,
            bind_group,
            size: (image.width(), image.height()),
        }
    }

    pub fn from_path(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        path: &Path,
        options: TextureOptions,
    ) -> Result<Self, TextureError> {
        let image = load_rgba(path)?;
        log::info!("Loaded texture {:?} ({}x{})", path, image.width(), image.height());
        Ok(Self::from_image(
            device,
            queue,
            layout,
            &image,
            options,
            &path.display().to_string(),
        ))
    }

    /// A 1x1 texture of a single color.
    pub fn solid(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        rgba: [u8; 4],
        options: TextureOptions,
    ) -> Self {
        let image = RgbaImage::from_pixel(1, 1, image::Rgba(rgba));
        Self::from_image(device, queue, layout, &image, options, "Solid Texture")
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

/// Depth attachment of the color pass, sized to the surface.
pub struct DepthTexture {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl DepthTexture {
    pub fn new(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: config.width.max(1),
                height: config.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

// =============================================================================
// Heightmap
// =============================================================================

/// CPU copy of a heightmap image, kept for height queries.
#[derive(Debug, Clone)]
pub struct Heightmap {
    image: RgbaImage,
}

impl Heightmap {
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn from_path(path: &Path) -> Result<Self, TextureError> {
        Ok(Self::from_image(load_rgba(path)?))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Red channel of the pixel at `(x, y)`, clamped to the image.
    pub fn red_at(&self, x: u32, y: u32) -> u8 {
        let x = x.min(self.image.width().saturating_sub(1));
        let y = y.min(self.image.height().saturating_sub(1));
        self.image.get_pixel(x, y).0[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(300, 20), 9);
    }

    #[test]
    fn test_mip_chain_halves_each_level() {
        let image = RgbaImage::from_pixel(8, 4, image::Rgba([10, 20, 30, 255]));
        let chain = mip_chain(&image);
        let sizes: Vec<_> = chain.iter().map(|level| level.dimensions()).collect();
        assert_eq!(sizes, vec![(8, 4), (4, 2), (2, 1), (1, 1)]);
        // A uniform image stays uniform when downsampled
        assert_eq!(chain[3].get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_heightmap_red_clamps() {
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(1, 1, image::Rgba([200, 0, 0, 255]));
        let heightmap = Heightmap::from_image(image);
        assert_eq!(heightmap.red_at(1, 1), 200);
        assert_eq!(heightmap.red_at(5, 9), 200);
        assert_eq!(heightmap.red_at(0, 0), 0);
    }

    #[test]
    fn test_missing_image_reports_path() {
        match Heightmap::from_path(Path::new("/nonexistent/heightmap.png")) {
            Err(TextureError::Image { path, .. }) => assert!(path.ends_with("heightmap.png")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}

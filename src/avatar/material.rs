//! Part materials and texture data.

use crate::error::{ExportError, Result};
use image::RgbaImage;

/// Raw texture data, RGBA8.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    /// Texture width in pixels.
    pub width: u32,
    /// Texture height in pixels.
    pub height: u32,
    /// RGBA8 pixel data (4 bytes per pixel).
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Create a new texture from RGBA data.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Create a texture filled with one color.
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = (0..width * height).flat_map(|_| color).collect();
        Self::new(width, height, pixels)
    }

    /// Get a pixel at (x, y).
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    /// Check dimensions against the pixel buffer.
    pub fn validate(&self, what: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::MalformedInput(format!(
                "{} has zero size ({}x{})",
                what, self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != expected {
            return Err(ExportError::MalformedInput(format!(
                "{} is {}x{} but carries {} bytes (expected {})",
                what,
                self.width,
                self.height,
                self.pixels.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Borrow-free copy as an `image` buffer for resampling.
    pub(crate) fn to_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            ExportError::MalformedInput(format!(
                "texture {}x{} does not match its pixel buffer",
                self.width, self.height
            ))
        })
    }

    /// Export the texture as PNG bytes.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        use image::ImageEncoder;

        let mut bytes = Vec::new();
        let cursor = std::io::Cursor::new(&mut bytes);
        let encoder = image::codecs::png::PngEncoder::new(cursor);

        encoder
            .write_image(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| ExportError::EncodingFailure(format!("Failed to encode PNG: {}", e)))?;

        Ok(bytes)
    }
}

/// Load a texture from PNG bytes.
pub fn load_texture_from_bytes(data: &[u8]) -> Result<TextureData> {
    let rgba = image::load_from_memory(data)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(TextureData::new(width, height, rgba.into_raw()))
}

/// The rendering surface of one part.
#[derive(Debug, Clone, PartialEq)]
pub struct PartMaterial {
    /// Base color map. Its size decides the part's atlas cell.
    pub base_color: TextureData,
    /// Tangent-space normal map.
    pub normal: Option<TextureData>,
    /// glTF metallic-roughness map (G = roughness, B = metallic).
    pub metallic_roughness: Option<TextureData>,
    /// Pixels near the chroma key become the transparent atlas background.
    pub transparent: bool,
}

impl PartMaterial {
    pub fn new(base_color: TextureData) -> Self {
        Self {
            base_color,
            normal: None,
            metallic_roughness: None,
            transparent: false,
        }
    }

    pub fn with_normal(mut self, normal: TextureData) -> Self {
        self.normal = Some(normal);
        self
    }

    pub fn with_metallic_roughness(mut self, map: TextureData) -> Self {
        self.metallic_roughness = Some(map);
        self
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    /// Validate every texture this material carries.
    pub fn validate(&self, part_name: &str) -> Result<()> {
        self.base_color
            .validate(&format!("base color texture of part '{}'", part_name))?;
        if let Some(normal) = &self.normal {
            normal.validate(&format!("normal map of part '{}'", part_name))?;
        }
        if let Some(map) = &self.metallic_roughness {
            map.validate(&format!("metallic-roughness map of part '{}'", part_name))?;
        }
        Ok(())
    }
}

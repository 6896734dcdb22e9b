//! Shelf packing of part textures into one square atlas.

use crate::avatar::{PartMaterial, TextureData};
use crate::error::{ExportError, Result};
use crate::types::Rgb;
use image::imageops::{self, FilterType};
use image::{Rgba, Rgba32FImage, RgbaImage};

/// Flat tangent-space normal used where a part has no normal map.
pub const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];

/// Fully rough, non-metallic fill for the metallic-roughness atlas.
pub const DEFAULT_METALLIC_ROUGHNESS: [u8; 4] = [255, 255, 0, 255];

/// Atlas packing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasConfig {
    /// Width and height of the square atlas in pixels.
    pub size: u32,
    /// Gutter between cells in pixels.
    pub padding: u32,
    /// Largest dimension any single part may occupy.
    pub max_texture_size: u32,
    /// Background color of transparent parts.
    pub chroma_key: Rgb,
    /// Pixels within this RGB distance of the key count as background.
    pub chroma_tolerance: f32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            size: 4096,
            padding: 2,
            max_texture_size: 1024,
            chroma_key: Rgb::default(),
            chroma_tolerance: 0.0,
        }
    }
}

impl AtlasConfig {
    /// The value written to unused and chroma-keyed pixels.
    pub fn background(&self) -> [u8; 4] {
        self.chroma_key.with_alpha(0)
    }
}

/// A pixel rectangle within the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AtlasRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the two rectangles share any pixel.
    pub fn overlaps(&self, other: &AtlasRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Linear map from a part's UV space into atlas UV space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvTransform {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl UvTransform {
    pub const IDENTITY: Self = Self {
        scale: [1.0, 1.0],
        offset: [0.0, 0.0],
    };

    /// `uv * scale + offset`.
    pub fn apply(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            uv[0] * self.scale[0] + self.offset[0],
            uv[1] * self.scale[1] + self.offset[1],
        ]
    }
}

/// Where one part landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rect: AtlasRect,
    pub uv: UvTransform,
}

/// Placement of every part, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasLayout {
    pub size: u32,
    pub placements: Vec<Placement>,
    /// Fill value of pixels no cell covers.
    pub background: [u8; 4],
}

impl AtlasLayout {
    /// Fraction of the atlas covered by cells.
    pub fn coverage(&self) -> f32 {
        let used: u64 = self.placements.iter().map(|p| p.rect.area()).sum();
        used as f32 / (self.size as f32 * self.size as f32)
    }
}

/// One cell's source when rasterizing a channel.
#[derive(Debug, Clone, Copy)]
pub struct AtlasSource<'a> {
    /// `None` leaves the cell at the channel fill.
    pub texture: Option<&'a TextureData>,
    /// Replace pixels near the chroma key with the background value.
    pub chroma_key: bool,
}

/// All atlas channels built for one export.
#[derive(Debug, Clone)]
pub struct TextureAtlas {
    pub layout: AtlasLayout,
    pub base_color: TextureData,
    pub normal: Option<TextureData>,
    pub metallic_roughness: Option<TextureData>,
    /// Whether any cell was chroma keyed.
    pub has_transparency: bool,
}

/// Packs part textures into a square atlas.
#[derive(Debug, Clone)]
pub struct AtlasPacker {
    config: AtlasConfig,
}

impl AtlasPacker {
    pub fn new(config: AtlasConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Cell size for a texture: its own size, shrunk to `max_texture_size`
    /// along the longer side with the aspect ratio kept.
    pub fn requested_size(&self, width: u32, height: u32) -> (u32, u32) {
        let limit = self.config.max_texture_size.max(1);
        let longest = width.max(height);
        if longest <= limit {
            return (width, height);
        }
        let factor = limit as f64 / longest as f64;
        let scale = |v: u32| ((v as f64 * factor).round() as u32).clamp(1, limit);
        (scale(width), scale(height))
    }

    /// Compute a non-overlapping placement for every `(width, height)`.
    ///
    /// Cells are placed on shelves in order of decreasing height; ties keep
    /// input order, so the same input always produces the same layout.
    pub fn pack(&self, sizes: &[(u32, u32)]) -> Result<AtlasLayout> {
        let atlas_size = self.config.size;
        let padding = self.config.padding;

        let requested: Vec<(u32, u32)> = sizes
            .iter()
            .map(|&(w, h)| self.requested_size(w, h))
            .collect();

        let total_area: u64 = requested.iter().map(|&(w, h)| w as u64 * h as u64).sum();
        let capacity = atlas_size as u64 * atlas_size as u64;
        if total_area > capacity {
            return Err(ExportError::AtlasOverflow(format!(
                "{} textures need {} pixels but a {}x{} atlas holds {}",
                requested.len(),
                total_area,
                atlas_size,
                atlas_size,
                capacity
            )));
        }

        // Sort by height (tallest first), then width, keeping input order on ties.
        let mut order: Vec<usize> = (0..requested.len()).collect();
        order.sort_by(|&a, &b| {
            requested[b]
                .1
                .cmp(&requested[a].1)
                .then(requested[b].0.cmp(&requested[a].0))
        });

        let mut rects = vec![None; requested.len()];
        let mut current_x = 0u32;
        let mut current_y = 0u32;
        let mut row_height = 0u32;

        for index in order {
            let (width, height) = requested[index];

            // Check if we need to start a new shelf
            if current_x > 0 && current_x + width > atlas_size {
                current_x = 0;
                current_y += row_height + padding;
                row_height = 0;
            }

            if current_x + width > atlas_size || current_y + height > atlas_size {
                return Err(ExportError::AtlasOverflow(format!(
                    "texture {} ({}x{}) does not fit in the {}x{} atlas after shelf packing",
                    index, width, height, atlas_size, atlas_size
                )));
            }

            rects[index] = Some(AtlasRect {
                x: current_x,
                y: current_y,
                width,
                height,
            });

            current_x += width + padding;
            row_height = row_height.max(height);
        }

        let size_f = atlas_size as f32;
        let placements = rects
            .into_iter()
            .flatten()
            .map(|rect| Placement {
                rect,
                uv: UvTransform {
                    scale: [rect.width as f32 / size_f, rect.height as f32 / size_f],
                    offset: [rect.x as f32 / size_f, rect.y as f32 / size_f],
                },
            })
            .collect();

        Ok(AtlasLayout {
            size: atlas_size,
            placements,
            background: self.config.background(),
        })
    }

    /// Rasterize one channel of the atlas for a computed layout.
    ///
    /// Each source is resampled into its cell and edge-extended into half of
    /// the surrounding gutter. Keyed sources are keyed at full resolution
    /// before resampling.
    pub fn render(
        &self,
        layout: &AtlasLayout,
        sources: &[AtlasSource<'_>],
        fill: [u8; 4],
    ) -> Result<TextureData> {
        if sources.len() != layout.placements.len() {
            return Err(ExportError::MalformedInput(format!(
                "{} atlas sources for {} placements",
                sources.len(),
                layout.placements.len()
            )));
        }

        let size = layout.size;
        let mut canvas = RgbaImage::from_pixel(size, size, Rgba(fill));
        let half_gutter = (self.config.padding / 2) as i64;

        for (placement, source) in layout.placements.iter().zip(sources) {
            let Some(texture) = source.texture else {
                continue;
            };
            let rect = placement.rect;
            let cell = if source.chroma_key {
                let mut keyed = texture.to_image()?;
                let key = self.config.chroma_key;
                let tolerance = self.config.chroma_tolerance;
                for pixel in keyed.pixels_mut() {
                    if key.distance(pixel.0) <= tolerance {
                        *pixel = Rgba(layout.background);
                    }
                }
                resample_premultiplied(keyed, rect.width, rect.height, layout.background)
            } else {
                resample(texture, rect.width, rect.height)?
            };

            // Copy with edge-clamped padding so bilinear filtering at the
            // cell border samples the cell's own edge color.
            for py in -half_gutter..rect.height as i64 + half_gutter {
                let dst_y = rect.y as i64 + py;
                if dst_y < 0 || dst_y >= size as i64 {
                    continue;
                }
                let sy = py.clamp(0, rect.height as i64 - 1) as u32;
                for px in -half_gutter..rect.width as i64 + half_gutter {
                    let dst_x = rect.x as i64 + px;
                    if dst_x < 0 || dst_x >= size as i64 {
                        continue;
                    }
                    let sx = px.clamp(0, rect.width as i64 - 1) as u32;
                    canvas.put_pixel(dst_x as u32, dst_y as u32, *cell.get_pixel(sx, sy));
                }
            }
        }

        Ok(TextureData::new(size, size, canvas.into_raw()))
    }

    /// Pack the base color maps of `materials` and rasterize every channel any
    /// material provides.
    pub fn build(&self, materials: &[&PartMaterial]) -> Result<TextureAtlas> {
        let sizes: Vec<(u32, u32)> = materials
            .iter()
            .map(|m| (m.base_color.width, m.base_color.height))
            .collect();
        let layout = self.pack(&sizes)?;
        log::debug!(
            "packed {} textures into {}x{} atlas ({:.1}% used)",
            layout.placements.len(),
            layout.size,
            layout.size,
            layout.coverage() * 100.0
        );

        let base_sources: Vec<AtlasSource<'_>> = materials
            .iter()
            .map(|m| AtlasSource {
                texture: Some(&m.base_color),
                chroma_key: m.transparent,
            })
            .collect();
        let base_color = self.render(&layout, &base_sources, layout.background)?;

        let normal = if materials.iter().any(|m| m.normal.is_some()) {
            let sources: Vec<_> = materials
                .iter()
                .map(|m| AtlasSource {
                    texture: m.normal.as_ref(),
                    chroma_key: false,
                })
                .collect();
            Some(self.render(&layout, &sources, FLAT_NORMAL)?)
        } else {
            None
        };

        let metallic_roughness = if materials.iter().any(|m| m.metallic_roughness.is_some()) {
            let sources: Vec<_> = materials
                .iter()
                .map(|m| AtlasSource {
                    texture: m.metallic_roughness.as_ref(),
                    chroma_key: false,
                })
                .collect();
            Some(self.render(&layout, &sources, DEFAULT_METALLIC_ROUGHNESS)?)
        } else {
            None
        };

        Ok(TextureAtlas {
            layout,
            base_color,
            normal,
            metallic_roughness,
            has_transparency: materials.iter().any(|m| m.transparent),
        })
    }
}

/// Resample a texture to `width` x `height`, averaging source texels when shrinking.
fn resample(texture: &TextureData, width: u32, height: u32) -> Result<RgbaImage> {
    let image = texture.to_image()?;
    if image.dimensions() == (width, height) {
        return Ok(image);
    }
    Ok(imageops::resize(&image, width, height, FilterType::Triangle))
}

/// Resample with premultiplied alpha so transparent texels lend no color to
/// their neighbours. Texels that end up fully transparent take `background`.
fn resample_premultiplied(image: RgbaImage, width: u32, height: u32, background: [u8; 4]) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    let premultiplied = Rgba32FImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0.map(|c| c as f32 / 255.0);
        Rgba([r * a, g * a, b * a, a])
    });
    let resized = imageops::resize(&premultiplied, width, height, FilterType::Triangle);
    RgbaImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = resized.get_pixel(x, y).0;
        let alpha = (a * 255.0).round().clamp(0.0, 255.0);
        if alpha == 0.0 {
            return Rgba(background);
        }
        let channel = |c: f32| (c / a * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgba([channel(r), channel(g), channel(b), alpha as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packer(size: u32) -> AtlasPacker {
        AtlasPacker::new(AtlasConfig {
            size,
            max_texture_size: size,
            ..Default::default()
        })
    }

    fn assert_no_overlap(layout: &AtlasLayout) {
        for (i, a) in layout.placements.iter().enumerate() {
            assert!(a.rect.right() <= layout.size && a.rect.bottom() <= layout.size);
            for b in &layout.placements[i + 1..] {
                assert!(!a.rect.overlaps(&b.rect), "{:?} overlaps {:?}", a.rect, b.rect);
            }
        }
    }

    #[test]
    fn test_single_texture_keeps_full_size() {
        let layout = packer(1024).pack(&[(256, 128)]).unwrap();
        assert_eq!(layout.placements.len(), 1);
        let rect = layout.placements[0].rect;
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 256, 128));
    }

    #[test]
    fn test_two_small_textures_fit() {
        let layout = packer(256).pack(&[(50, 50), (50, 50)]).unwrap();
        assert_eq!(layout.placements.len(), 2);
        assert_no_overlap(&layout);
    }

    #[test]
    fn test_overflow_by_area() {
        let result = packer(256).pack(&[(256, 256), (16, 16)]);
        assert!(matches!(result, Err(ExportError::AtlasOverflow(_))));
    }

    #[test]
    fn test_overflow_by_shelves() {
        // 52000 of 65536 pixels by area, but each cell needs its own shelf
        // and the third shelf would end at row 264.
        let result = packer(256).pack(&[(200, 100), (200, 100), (200, 60)]);
        assert!(matches!(result, Err(ExportError::AtlasOverflow(_))));
    }

    #[test]
    fn test_many_textures_no_overlap() {
        let sizes: Vec<(u32, u32)> = (0..40).map(|i| (8 + (i * 7) % 60, 8 + (i * 13) % 50)).collect();
        let layout = packer(1024).pack(&sizes).unwrap();
        assert_eq!(layout.placements.len(), 40);
        assert_no_overlap(&layout);
        for (placement, &(w, h)) in layout.placements.iter().zip(&sizes) {
            assert_eq!((placement.rect.width, placement.rect.height), (w, h));
        }
    }

    #[test]
    fn test_packing_is_deterministic() {
        let sizes = [(64, 32), (32, 64), (64, 64), (32, 32)];
        let a = packer(256).pack(&sizes).unwrap();
        let b = packer(256).pack(&sizes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tallest_first() {
        let layout = packer(512).pack(&[(10, 10), (10, 40)]).unwrap();
        assert_eq!(layout.placements[1].rect.x, 0);
        assert!(layout.placements[0].rect.x > 0);
    }

    #[test]
    fn test_requested_size_clamps_long_side() {
        let packer = AtlasPacker::new(AtlasConfig {
            size: 4096,
            max_texture_size: 1024,
            ..Default::default()
        });
        assert_eq!(packer.requested_size(2048, 1024), (1024, 512));
        assert_eq!(packer.requested_size(512, 512), (512, 512));
    }

    #[test]
    fn test_uv_transform_maps_corners() {
        let layout = packer(256).pack(&[(64, 128)]).unwrap();
        let uv = layout.placements[0].uv;
        assert_eq!(uv.apply([0.0, 0.0]), [0.0, 0.0]);
        assert_eq!(uv.apply([1.0, 1.0]), [0.25, 0.5]);
    }

    #[test]
    fn test_render_chroma_key_and_background() {
        let key = Rgb(0, 255, 0);
        let packer = AtlasPacker::new(AtlasConfig {
            size: 256,
            padding: 0,
            max_texture_size: 256,
            chroma_key: key,
            chroma_tolerance: 10.0,
        });
        let mut texture = TextureData::solid(2, 1, [200, 0, 0, 255]);
        texture.pixels[4..8].copy_from_slice(&[3, 250, 4, 255]);

        let layout = packer.pack(&[(2, 1)]).unwrap();
        let source = AtlasSource {
            texture: Some(&texture),
            chroma_key: true,
        };
        let atlas = packer.render(&layout, &[source], layout.background).unwrap();

        assert_eq!(atlas.get_pixel(0, 0), [200, 0, 0, 255]);
        assert_eq!(atlas.get_pixel(1, 0), [0, 255, 0, 0]);
        assert_eq!(atlas.get_pixel(100, 100), [0, 255, 0, 0]);
    }

    #[test]
    fn test_render_without_chroma_key_keeps_pixels() {
        let packer = packer(256);
        let texture = TextureData::solid(4, 4, [255, 255, 255, 255]);
        let layout = packer.pack(&[(4, 4)]).unwrap();
        let source = AtlasSource {
            texture: Some(&texture),
            chroma_key: false,
        };
        let atlas = packer.render(&layout, &[source], layout.background).unwrap();
        assert_eq!(atlas.get_pixel(3, 3), [255, 255, 255, 255]);
    }

    #[test]
    fn test_render_gutter_is_edge_extended() {
        let packer = AtlasPacker::new(AtlasConfig {
            size: 256,
            padding: 4,
            max_texture_size: 256,
            ..Default::default()
        });
        let red = TextureData::solid(8, 8, [255, 0, 0, 255]);
        let layout = packer.pack(&[(8, 8)]).unwrap();
        let source = AtlasSource {
            texture: Some(&red),
            chroma_key: false,
        };
        let atlas = packer.render(&layout, &[source], [0, 0, 0, 0]).unwrap();
        // Two gutter pixels on each side are filled.
        assert_eq!(atlas.get_pixel(9, 4), [255, 0, 0, 255]);
        assert_eq!(atlas.get_pixel(10, 4), [0, 0, 0, 0]);
    }

    #[test]
    fn test_render_downsamples_into_cell() {
        let packer = AtlasPacker::new(AtlasConfig {
            size: 256,
            padding: 0,
            max_texture_size: 4,
            ..Default::default()
        });
        let texture = TextureData::solid(16, 16, [10, 20, 30, 255]);
        let layout = packer.pack(&[(16, 16)]).unwrap();
        assert_eq!(layout.placements[0].rect.width, 4);
        let source = AtlasSource {
            texture: Some(&texture),
            chroma_key: false,
        };
        let atlas = packer.render(&layout, &[source], [0; 4]).unwrap();
        assert_eq!(atlas.get_pixel(2, 2), [10, 20, 30, 255]);
        assert_eq!(atlas.get_pixel(4, 2), [0, 0, 0, 0]);
    }

    #[test]
    fn test_chroma_key_before_downsample_leaves_no_fringe() {
        let packer = AtlasPacker::new(AtlasConfig {
            size: 256,
            padding: 0,
            max_texture_size: 4,
            chroma_key: Rgb(255, 255, 255),
            chroma_tolerance: 0.0,
        });
        let mut texture = TextureData::solid(8, 8, [200, 0, 0, 255]);
        for y in 0..8 {
            for x in 0..4 {
                let idx = ((y * 8 + x) * 4) as usize;
                texture.pixels[idx..idx + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let layout = packer.pack(&[(8, 8)]).unwrap();
        assert_eq!(layout.placements[0].rect.width, 4);
        let source = AtlasSource {
            texture: Some(&texture),
            chroma_key: true,
        };
        let atlas = packer.render(&layout, &[source], layout.background).unwrap();

        assert_eq!(atlas.get_pixel(0, 0), [255, 255, 255, 0]);
        assert_eq!(atlas.get_pixel(3, 0), [200, 0, 0, 255]);
        for x in 0..4 {
            let pixel = atlas.get_pixel(x, 0);
            assert!(
                pixel[3] == 0 || (pixel[1] == 0 && pixel[2] == 0),
                "key color bled into {:?}",
                pixel
            );
        }
    }

    #[test]
    fn test_build_normal_channel_only_when_present() {
        let packer = packer(256);
        let plain = PartMaterial::new(TextureData::solid(8, 8, [1, 2, 3, 255]));
        let atlas = packer.build(&[&plain]).unwrap();
        assert!(atlas.normal.is_none());
        assert!(atlas.metallic_roughness.is_none());

        let bumpy = PartMaterial::new(TextureData::solid(8, 8, [1, 2, 3, 255]))
            .with_normal(TextureData::solid(8, 8, [100, 100, 250, 255]));
        let atlas = packer.build(&[&plain, &bumpy]).unwrap();
        let normal = atlas.normal.unwrap();
        let rect = atlas.layout.placements[1].rect;
        assert_eq!(normal.get_pixel(rect.x, rect.y), [100, 100, 250, 255]);
        let plain_rect = atlas.layout.placements[0].rect;
        assert_eq!(normal.get_pixel(plain_rect.x, plain_rect.y), FLAT_NORMAL);
    }
}

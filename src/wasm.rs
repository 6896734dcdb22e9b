//! WASM bindings for avatar-export.
//!
//! The browser hands over an avatar pack as ZIP bytes and receives the
//! exported file back, ready to wrap in a `Blob` for download.

use crate::{ExportConfig, ExportFormat, GltfContainer, Rgb};
use wasm_bindgen::prelude::*;

#[wasm_bindgen(start)]
pub fn init() {
    // Set up better panic messages in the browser console
    console_error_panic_hook::set_once();
}

/// Export options.
#[wasm_bindgen]
pub struct ExportOptions {
    format: String,
    atlas_size: u32,
    chroma_key: Option<String>,
    chroma_tolerance: f32,
    max_texture_size: u32,
    separate: bool,
    file_name: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        let defaults = ExportConfig::default();
        ExportOptions {
            format: defaults.format.to_string(),
            atlas_size: defaults.atlas_size,
            chroma_key: None,
            chroma_tolerance: defaults.chroma_tolerance,
            max_texture_size: defaults.max_texture_size,
            separate: false,
            file_name: None,
        }
    }
}

#[wasm_bindgen]
impl ExportOptions {
    #[wasm_bindgen(constructor)]
    pub fn new() -> ExportOptions {
        ExportOptions::default()
    }

    /// `"generic"` / `"glb"` or `"avatar"` / `"vrm"`.
    #[wasm_bindgen(setter)]
    pub fn set_format(&mut self, value: String) {
        self.format = value;
    }

    #[wasm_bindgen(setter)]
    pub fn set_atlas_size(&mut self, value: u32) {
        self.atlas_size = value;
    }

    /// Chroma key as `#rrggbb`.
    #[wasm_bindgen(setter)]
    pub fn set_chroma_key(&mut self, value: String) {
        self.chroma_key = Some(value);
    }

    #[wasm_bindgen(setter)]
    pub fn set_chroma_tolerance(&mut self, value: f32) {
        self.chroma_tolerance = value;
    }

    #[wasm_bindgen(setter)]
    pub fn set_max_texture_size(&mut self, value: u32) {
        self.max_texture_size = value;
    }

    /// Write a `.gltf` document plus `.bin` buffer instead of one `.glb`.
    #[wasm_bindgen(setter)]
    pub fn set_separate(&mut self, value: bool) {
        self.separate = value;
    }

    #[wasm_bindgen(setter)]
    pub fn set_file_name(&mut self, value: String) {
        self.file_name = Some(value);
    }
}

impl ExportOptions {
    fn to_config(&self) -> crate::Result<ExportConfig> {
        let mut config = ExportConfig::default()
            .with_format(self.format.parse::<ExportFormat>()?)
            .with_atlas_size(self.atlas_size)
            .with_max_texture_size(self.max_texture_size);
        if let Some(key) = &self.chroma_key {
            let key = key
                .parse::<Rgb>()
                .map_err(crate::ExportError::InvalidConfiguration)?;
            config = config.with_chroma_key(key, self.chroma_tolerance);
        } else {
            config.chroma_tolerance = self.chroma_tolerance;
        }
        if self.separate {
            config = config.with_container(GltfContainer::Separate);
        }
        if let Some(name) = &self.file_name {
            config = config.with_file_name(name.clone());
        }
        Ok(config)
    }
}

/// Export result handed back to JavaScript.
#[wasm_bindgen]
pub struct ExportResult {
    data: Vec<u8>,
    sidecar: Option<Vec<u8>>,
    file_name: String,
    sidecar_file_name: Option<String>,
    mime_type: String,
}

#[wasm_bindgen]
impl ExportResult {
    /// The exported file as a `Uint8Array`.
    #[wasm_bindgen(getter)]
    pub fn data(&self) -> js_sys::Uint8Array {
        js_sys::Uint8Array::from(self.data.as_slice())
    }

    /// The `.bin` buffer of a separate export, if any.
    #[wasm_bindgen(getter)]
    pub fn sidecar(&self) -> Option<js_sys::Uint8Array> {
        self.sidecar
            .as_ref()
            .map(|bytes| js_sys::Uint8Array::from(bytes.as_slice()))
    }

    #[wasm_bindgen(getter)]
    pub fn file_name(&self) -> String {
        self.file_name.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn sidecar_file_name(&self) -> Option<String> {
        self.sidecar_file_name.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn mime_type(&self) -> String {
        self.mime_type.clone()
    }
}

/// Export an avatar pack (ZIP bytes) and return the file to download.
#[wasm_bindgen]
pub fn export_avatar_pack(
    data: &[u8],
    options: Option<ExportOptions>,
) -> Result<ExportResult, JsError> {
    let options = options.unwrap_or_default();
    let config = options
        .to_config()
        .map_err(|e| JsError::new(&e.to_string()))?;

    let avatar = crate::load_avatar_from_bytes(data).map_err(|e| JsError::new(&e.to_string()))?;
    let out = crate::export_with_config(&avatar, &config)
        .map_err(|e| JsError::new(&e.to_string()))?;

    Ok(ExportResult {
        file_name: out.suggested_file_name(),
        sidecar_file_name: out.sidecar_file_name(),
        mime_type: out.mime_type().to_string(),
        data: out.bytes,
        sidecar: out.sidecar,
    })
}

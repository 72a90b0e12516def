//! Document assembler — one A4 PDF page per photo.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{ColorType, GenericImageView, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use super::{encode_jpeg, flatten_to_rgb};
use crate::config::JPEG_QUALITY;
use crate::error::DocumentError;

/// Resource name every page uses for its single image.
const IMAGE_RESOURCE: &str = "Im0";

/// Page geometry in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    /// Blank border kept on every side.
    pub margin: f32,
}

impl PageLayout {
    /// A4 portrait with a 20 pt border.
    pub const A4: Self = Self {
        width: 595.2756,
        height: 841.8898,
        margin: 20.0,
    };
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::A4
    }
}

/// Where an image lands on its page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scale uniformly to fit inside the margins and center on the page.
pub fn fit_to_page(image_width: u32, image_height: u32, layout: &PageLayout) -> Placement {
    let (w, h) = (image_width as f32, image_height as f32);
    let avail_w = layout.width - 2.0 * layout.margin;
    let avail_h = layout.height - 2.0 * layout.margin;
    let scale = (avail_w / w).min(avail_h / h);

    let width = w * scale;
    let height = h * scale;
    Placement {
        x: (layout.width - width) / 2.0,
        y: (layout.height - height) / 2.0,
        width,
        height,
    }
}

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub path: PathBuf,
    pub pages: usize,
    pub bytes: u64,
}

impl DocumentSummary {
    pub fn size_mb(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }
}

/// JPEG payload ready to drop into an image XObject.
struct EmbeddedImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    data: Vec<u8>,
}

/// Build a PDF at `output` with one page per image, in order.
///
/// Any unreadable image aborts the whole document. Nothing is cleaned up
/// if writing fails part-way.
pub fn assemble_document(
    images: &[PathBuf],
    output: &Path,
    layout: &PageLayout,
) -> Result<DocumentSummary, DocumentError> {
    if images.is_empty() {
        return Err(DocumentError::EmptyBatch);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(images.len());

    for path in images {
        let image = load_embeddable(path)?;
        let placement = fit_to_page(image.width, image.height, layout);

        let image_id = doc.add_object(
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(image.width),
                    "Height" => i64::from(image.height),
                    "ColorSpace" => image.color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                image.data,
            )
            .with_compression(false),
        );

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        placement.width.into(),
                        0.into(),
                        0.into(),
                        placement.height.into(),
                        placement.x.into(),
                        placement.y.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), layout.width.into(), layout.height.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    IMAGE_RESOURCE => image_id,
                },
            },
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => images.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output)?);
    doc.save_to(&mut writer)?;
    writer.flush()?;

    let bytes = std::fs::metadata(output)?.len();
    tracing::info!(path = %output.display(), pages = images.len(), bytes, "PDF written");

    Ok(DocumentSummary {
        path: output.to_path_buf(),
        pages: images.len(),
        bytes,
    })
}

/// Read an image and produce DCT data for it. Baseline RGB or grayscale
/// JPEGs are embedded as-is; anything else is re-encoded.
fn load_embeddable(path: &Path) -> Result<EmbeddedImage, DocumentError> {
    let image_err = |reason: String| DocumentError::Image {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| image_err(e.to_string()))?;
    let format = image::guess_format(&bytes).map_err(|e| image_err(e.to_string()))?;
    let img = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| image_err(e.to_string()))?;
    let (width, height) = img.dimensions();

    let components = if format == ImageFormat::Jpeg {
        jpeg_components(&bytes)
    } else {
        None
    };
    let (color_space, data) = match (components, img.color()) {
        (Some(3), ColorType::Rgb8) => ("DeviceRGB", bytes),
        (Some(1), ColorType::L8) => ("DeviceGray", bytes),
        _ => {
            let rgb = flatten_to_rgb(img);
            let data = encode_jpeg(&rgb, JPEG_QUALITY).map_err(|e| image_err(e.to_string()))?;
            ("DeviceRGB", data)
        }
    };

    Ok(EmbeddedImage {
        width,
        height,
        color_space,
        data,
    })
}

/// Component count from the first SOF header of a JPEG stream.
/// The decoder reports CMYK files as RGB, so this is what tells them apart.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        let len = usize::from(u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]));
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            return bytes.get(i + 9).copied();
        }
        i += 2 + len;
    }
    None
}

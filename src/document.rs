//! Document object walker support.
//!
//! Thin wrapper around `lopdf::Document` that exposes what the compression
//! pass needs: ordered page enumeration, per-page image XObject lookup,
//! image metadata extraction, an explicit replace-image operation, and the
//! final prune-and-save step.

use lopdf::{Dictionary, Document, Object, ObjectId, SaveOptions, Stream};
use std::fs::File;
use std::path::Path;

use crate::error::CompressError;
use crate::image::{EncodedJpeg, ImageMeta};

pub struct PdfDocument {
    doc: Document,
}

impl PdfDocument {
    /// Open a PDF from disk. A file that is not a well-formed PDF fails
    /// with `CompressError::Open`.
    pub fn open(path: &Path) -> Result<Self, CompressError> {
        let doc = Document::load(path)
            .map_err(|e| CompressError::Open(format!("{}: {}", path.display(), e)))?;
        Ok(PdfDocument { doc })
    }

    /// Pages in first-to-last order as (page number, object id).
    pub fn pages(&self) -> Vec<(u32, ObjectId)> {
        self.doc
            .get_pages()
            .iter()
            .map(|(&num, &id)| (num, id))
            .collect()
    }

    /// Image XObjects referenced by a page's resources, in the resource
    /// dictionary's insertion order, as (resource name, object id).
    pub fn page_images(&self, page_id: ObjectId) -> Vec<(String, ObjectId)> {
        let mut images = Vec::new();

        let page_dict = match self.doc.get_object(page_id) {
            Ok(Object::Dictionary(d)) => d.clone(),
            _ => return images,
        };

        let resources = self.page_resources(&page_dict);
        let res_dict = match self.resolve(&resources) {
            Some(Object::Dictionary(d)) => d.clone(),
            _ => return images,
        };

        let xobjects = match res_dict.get(b"XObject").ok().and_then(|x| self.resolve(x)) {
            Some(Object::Dictionary(d)) => d.clone(),
            _ => return images,
        };

        for (name, value) in xobjects.iter() {
            let obj_id = match value {
                Object::Reference(id) => *id,
                _ => continue,
            };
            if let Ok(Object::Stream(stream)) = self.doc.get_object(obj_id) {
                if name_entry(&stream.dict, b"Subtype").as_deref() == Some("Image") {
                    images.push((String::from_utf8_lossy(name).to_string(), obj_id));
                }
            }
        }

        images
    }

    /// Extract an image's metadata and raw stored bytes.
    pub fn image_parts(&self, id: ObjectId) -> Option<(ImageMeta, Vec<u8>)> {
        let stream = match self.doc.get_object(id) {
            Ok(Object::Stream(s)) => s,
            _ => return None,
        };

        let width = int_entry(&stream.dict, b"Width")?;
        let height = int_entry(&stream.dict, b"Height")?;

        let color_space = stream
            .dict
            .get(b"ColorSpace")
            .ok()
            .map(|cs| self.color_space_name(cs))
            .unwrap_or_else(|| "DeviceRGB".to_string());

        let meta = ImageMeta {
            width,
            height,
            bits_per_component: int_entry(&stream.dict, b"BitsPerComponent").unwrap_or(8),
            color_space,
            filters: filter_names(&stream.dict),
            has_predictor: self.has_predictor(&stream.dict),
            dpi: None,
        };

        Some((meta, stream.content.clone()))
    }

    /// Replace an image object's payload with a freshly encoded JPEG,
    /// discarding the prior filter chain. Unrelated dictionary entries
    /// (SMask, Name, ...) are retained.
    pub fn replace_image(&mut self, id: ObjectId, jpeg: &EncodedJpeg) {
        let mut dict = match self.doc.get_object(id) {
            Ok(Object::Stream(s)) => s.dict.clone(),
            _ => return,
        };

        dict.set("Width", Object::Integer(jpeg.width as i64));
        dict.set("Height", Object::Integer(jpeg.height as i64));
        dict.set("BitsPerComponent", Object::Integer(8));
        dict.set(
            "ColorSpace",
            Object::Name(if jpeg.grayscale {
                b"DeviceGray".to_vec()
            } else {
                b"DeviceRGB".to_vec()
            }),
        );
        dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        dict.remove(b"DecodeParms");

        self.doc
            .objects
            .insert(id, Object::Stream(Stream::new(dict, jpeg.data.clone())));
    }

    /// Drop unreferenced resources and write a compact PDF: compressed
    /// streams, object streams and a cross-reference stream, no
    /// linearization.
    pub fn finish(mut self, output: &Path) -> Result<(), CompressError> {
        self.doc.renumber_objects();
        let _ = self.doc.prune_objects();
        self.doc.compress();

        let mut file = File::create(output)
            .map_err(|e| CompressError::Save(format!("{}: {}", output.display(), e)))?;
        let options = SaveOptions::builder()
            .use_object_streams(true)
            .use_xref_streams(true)
            .build();
        self.doc
            .save_with_options(&mut file, options)
            .map_err(|e| CompressError::Save(format!("{}: {}", output.display(), e)))?;
        Ok(())
    }

    /// Resolve a reference to the actual object.
    fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(id) => self.doc.get_object(*id).ok(),
            _ => Some(obj),
        }
    }

    /// Resources for a page, falling back to the inherited parent entry.
    fn page_resources(&self, page_dict: &Dictionary) -> Object {
        if let Ok(resources) = page_dict.get(b"Resources") {
            return resources.clone();
        }

        if let Ok(Object::Reference(parent_id)) = page_dict.get(b"Parent") {
            if let Ok(Object::Dictionary(parent_dict)) = self.doc.get_object(*parent_id) {
                if let Ok(resources) = parent_dict.get(b"Resources") {
                    return resources.clone();
                }
            }
        }

        Object::Null
    }

    /// Color space name from a PDF object (name, array, or reference).
    fn color_space_name(&self, obj: &Object) -> String {
        match obj {
            Object::Name(name) => String::from_utf8_lossy(name).to_string(),
            Object::Array(arr) => {
                if let Some(Object::Name(name)) = arr.first() {
                    String::from_utf8_lossy(name).to_string()
                } else {
                    "Unknown".to_string()
                }
            }
            Object::Reference(id) => {
                if let Ok(resolved) = self.doc.get_object(*id) {
                    self.color_space_name(resolved)
                } else {
                    "Unknown".to_string()
                }
            }
            _ => "Unknown".to_string(),
        }
    }

    /// Whether /DecodeParms declares a predictor above 1.
    fn has_predictor(&self, dict: &Dictionary) -> bool {
        let parms = match dict.get(b"DecodeParms").ok().and_then(|p| self.resolve(p)) {
            Some(p) => p,
            None => return false,
        };

        let parms_dict = match parms {
            Object::Dictionary(d) => Some(d),
            Object::Array(arr) => arr.first().and_then(|p| match self.resolve(p) {
                Some(Object::Dictionary(d)) => Some(d),
                _ => None,
            }),
            _ => None,
        };

        parms_dict
            .and_then(|d| d.get(b"Predictor").ok())
            .and_then(|p| match p {
                Object::Integer(n) => Some(*n),
                _ => None,
            })
            .map(|p| p > 1)
            .unwrap_or(false)
    }
}

/// Read a name entry from a stream dictionary.
fn name_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key).ok().and_then(|v| match v {
        Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
        _ => None,
    })
}

/// Read an integer entry from a stream dictionary.
fn int_entry(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key).ok().and_then(|v| match v {
        Object::Integer(n) => Some(*n as u32),
        _ => None,
    })
}

/// Filter chain as a list of names. A single name and an array of names
/// are both normalized to a vector.
fn filter_names(dict: &Dictionary) -> Vec<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|f| match f {
                Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

//! Asset document model.
//!
//! Documents that describe externally written data so a run engine can
//! reference it without holding the bytes:
//!
//! - **ResourceDoc** / **DatumDoc**: one file, addressed per field (PandABox HDF5)
//! - **StreamResourceDoc** / **StreamDatumDoc**: a growing stream of frames
//!   (camera TIFF files)
//! - **FlyEvent**: the event a flyer emits, whose values are datum ids
//!
//! # Document Flow
//!
//! ```text
//! ResourceDoc (1 per session)
//!    │
//!    └── DatumDoc (1 per field, "<resource uid>/<n>")
//!
//! StreamResourceDoc (1 per stage)
//!    │
//!    └── StreamDatumDoc (1 per trigger, "<stream resource uid>/<n>")
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in seconds since the Unix epoch
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Resource document - one externally written file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDoc {
    /// Unique resource ID
    pub uid: String,
    /// Handler spec used to read the file back (e.g. "PANDA")
    pub spec: String,
    /// Root directory, not part of the logical path
    pub root: String,
    /// Path of the file relative to `root`
    pub resource_path: String,
    /// Handler construction parameters
    pub resource_kwargs: Map<String, Value>,
    /// Path convention of `root` and `resource_path`
    pub path_semantics: String,
}

/// Datum document - one addressable slice of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatumDoc {
    /// "<resource uid>/<n>"
    pub datum_id: String,
    /// Links to ResourceDoc
    pub resource: String,
    /// Handler call parameters (e.g. `{"field": "COUNTER1.OUT.Value"}`)
    pub datum_kwargs: Map<String, Value>,
}

/// Half-open index range `[start, stop)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRange {
    /// First index (inclusive)
    pub start: u64,
    /// Last index (exclusive)
    pub stop: u64,
}

/// Stream resource document - a stream of frames written by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResourceDoc {
    /// Unique stream resource ID
    pub uid: String,
    /// Data key the stream fills
    pub data_key: String,
    /// MIME type of the stored frames
    pub mimetype: String,
    /// Location of the stream
    pub uri: String,
    /// Reader parameters
    pub parameters: Map<String, Value>,
}

/// Stream datum document - a range of frames within a stream resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDatumDoc {
    /// "<stream resource uid>/<n>"
    pub uid: String,
    /// Links to StreamResourceDoc
    pub stream_resource: String,
    /// Event descriptor uid, filled in by the run engine
    pub descriptor: String,
    /// Frame indices within the stream
    pub indices: StreamRange,
    /// Event sequence numbers, filled in by the run engine
    pub seq_nums: StreamRange,
}

/// Asset documents as emitted to the run engine, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "doc", rename_all = "snake_case")]
pub enum AssetDocument {
    /// File-level record
    Resource(ResourceDoc),
    /// Per-field record within a resource
    Datum(DatumDoc),
    /// Stream-level record
    StreamResource(StreamResourceDoc),
    /// Frame range within a stream resource
    StreamDatum(StreamDatumDoc),
}

impl AssetDocument {
    /// Document kind name
    pub fn kind(&self) -> &'static str {
        match self {
            AssetDocument::Resource(_) => "resource",
            AssetDocument::Datum(_) => "datum",
            AssetDocument::StreamResource(_) => "stream_resource",
            AssetDocument::StreamDatum(_) => "stream_datum",
        }
    }
}

/// Produces datum documents for one resource, numbering them from 0.
#[derive(Debug, Clone)]
pub struct DatumFactory {
    resource_uid: String,
    counter: u64,
}

impl DatumFactory {
    /// Compose the next datum for this resource
    pub fn datum(&mut self, datum_kwargs: Map<String, Value>) -> DatumDoc {
        let datum_id = format!("{}/{}", self.resource_uid, self.counter);
        self.counter += 1;
        DatumDoc {
            datum_id,
            resource: self.resource_uid.clone(),
            datum_kwargs,
        }
    }
}

/// Produces stream datum documents for one stream resource.
#[derive(Debug, Clone)]
pub struct StreamDatumFactory {
    stream_resource_uid: String,
    counter: u64,
}

impl StreamDatumFactory {
    /// Compose the next stream datum covering `indices`
    pub fn datum(&mut self, indices: StreamRange) -> StreamDatumDoc {
        let uid = format!("{}/{}", self.stream_resource_uid, self.counter);
        self.counter += 1;
        StreamDatumDoc {
            uid,
            stream_resource: self.stream_resource_uid.clone(),
            descriptor: String::new(),
            indices,
            seq_nums: StreamRange::default(),
        }
    }
}

/// Compose a resource document and its datum factory.
///
/// `run_start` is not set; the run engine attaches the resource to
/// its run when the document is emitted.
pub fn compose_resource(
    spec: &str,
    root: &str,
    resource_path: &str,
    resource_kwargs: Map<String, Value>,
) -> (ResourceDoc, DatumFactory) {
    let resource = ResourceDoc {
        uid: new_uid(),
        spec: spec.to_string(),
        root: root.to_string(),
        resource_path: resource_path.to_string(),
        resource_kwargs,
        path_semantics: "posix".to_string(),
    };
    let factory = DatumFactory {
        resource_uid: resource.uid.clone(),
        counter: 0,
    };
    (resource, factory)
}

/// Compose a stream resource document and its stream datum factory.
pub fn compose_stream_resource(
    data_key: &str,
    mimetype: &str,
    uri: &str,
    parameters: Map<String, Value>,
) -> (StreamResourceDoc, StreamDatumFactory) {
    let resource = StreamResourceDoc {
        uid: new_uid(),
        data_key: data_key.to_string(),
        mimetype: mimetype.to_string(),
        uri: uri.to_string(),
        parameters,
    };
    let factory = StreamDatumFactory {
        stream_resource_uid: resource.uid.clone(),
        counter: 0,
    };
    (resource, factory)
}

/// Schema for a data field within events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Source device name
    pub source: String,
    /// Data type: "number", "integer", "string", "array"
    pub dtype: String,
    /// Numpy-style element encoding (e.g. "<f8"), when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype_str: Option<String>,
    /// Shape for arrays (empty for scalars)
    pub shape: Vec<i64>,
    /// External storage tag ("FILESTORE:" or "STREAM:")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

impl DataKey {
    /// Create an array data key
    pub fn array(source: &str, shape: Vec<i64>) -> Self {
        Self {
            source: source.to_string(),
            dtype: "array".to_string(),
            dtype_str: None,
            shape,
            external: None,
        }
    }

    pub fn with_dtype_str(mut self, dtype_str: Option<&str>) -> Self {
        self.dtype_str = dtype_str.map(str::to_string);
        self
    }

    pub fn with_external(mut self, external: &str) -> Self {
        self.external = Some(external.to_string());
        self
    }
}

/// Event emitted by a flyer.
///
/// Values are datum ids; the data itself lives in the external file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlyEvent {
    /// Field name -> datum id
    pub data: BTreeMap<String, String>,
    /// Field name -> timestamp (seconds)
    pub timestamps: BTreeMap<String, f64>,
    /// Event time (seconds)
    pub time: f64,
    /// Field name -> whether the value has been loaded from the file
    pub filled: BTreeMap<String, bool>,
}

impl FlyEvent {
    /// Build an unfilled event stamped with a single wall-clock time.
    pub fn unfilled<'a>(datums: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let time = now_secs();
        let mut event = Self {
            data: BTreeMap::new(),
            timestamps: BTreeMap::new(),
            time,
            filled: BTreeMap::new(),
        };
        for (field, datum_id) in datums {
            event.data.insert(field.to_string(), datum_id.to_string());
            event.timestamps.insert(field.to_string(), time);
            event.filled.insert(field.to_string(), false);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datum_ids_follow_resource_uid() {
        let (resource, mut factory) = compose_resource("PANDA", "/data", "scan.h5", Map::new());
        assert_eq!(resource.path_semantics, "posix");
        assert!(resource.resource_kwargs.is_empty());

        let mut kwargs = Map::new();
        kwargs.insert("field".into(), Value::from("COUNTER1.OUT.Value"));
        let first = factory.datum(kwargs.clone());
        let second = factory.datum(kwargs);

        assert_eq!(first.datum_id, format!("{}/0", resource.uid));
        assert_eq!(second.datum_id, format!("{}/1", resource.uid));
        assert_eq!(first.resource, resource.uid);
        assert_eq!(first.datum_kwargs["field"], "COUNTER1.OUT.Value");
    }

    #[test]
    fn test_stream_datum_composition() {
        let (resource, mut factory) = compose_stream_resource(
            "uvc-cam1",
            "image/tiff",
            "file://localhost/data/img.tiff",
            Map::new(),
        );
        let datum = factory.datum(StreamRange { start: 0, stop: 1 });
        assert_eq!(datum.uid, format!("{}/0", resource.uid));
        assert_eq!(datum.stream_resource, resource.uid);
        assert_eq!(datum.indices, StreamRange { start: 0, stop: 1 });
        assert_eq!(datum.seq_nums, StreamRange::default());
    }

    #[test]
    fn test_asset_document_serialization() {
        let (resource, _) = compose_resource("PANDA", "/data", "scan.h5", Map::new());
        let doc = AssetDocument::Resource(resource);
        assert_eq!(doc.kind(), "resource");

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["kind"], "resource");
        assert_eq!(json["doc"]["spec"], "PANDA");
        assert!(json["doc"].get("run_start").is_none());
    }

    #[test]
    fn test_data_key_skips_absent_hints() {
        let key = DataKey::array("uvc-cam1", vec![480, 640, 3]).with_external("STREAM:");
        let json = serde_json::to_value(&key).unwrap();
        assert!(json.get("dtype_str").is_none());
        assert_eq!(json["external"], "STREAM:");
    }

    #[test]
    fn test_fly_event_is_unfilled_with_uniform_time() {
        let event = FlyEvent::unfilled([("a", "r/0"), ("b", "r/1")]);
        assert_eq!(event.data["b"], "r/1");
        assert!(event.filled.values().all(|filled| !filled));
        assert!(event.timestamps.values().all(|t| *t == event.time));
    }
}

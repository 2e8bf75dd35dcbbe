//! Annotation exchange records and render-time stripping policy

use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};

use super::options::EngineOptions;
use crate::error::{CosError, CosResult};
use crate::pdf::{AnnotationDict, PdfDate, Reference};

/// Annotation state exchanged with the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDto {
    /// Object id of the page the annotation sits on
    pub page_id: u32,
    /// Stable identity, stored as `/NM`
    #[serde(default)]
    pub uuid: String,
    /// Annotation `/Subtype`, e.g. `Ink`
    pub annotation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    pub rect: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ink_list: Option<Vec<Vec<f64>>>,
}

/// Which annotations `data_for_renderer` removes before hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StripPolicy {
    /// Remove the subtypes the host draws itself
    Supported,
    /// Remove everything the host cannot draw
    Unsupported,
}

impl StripPolicy {
    pub fn strips(&self, subtype: Option<&str>, options: &EngineOptions) -> bool {
        let supported = subtype.map_or(false, |s| options.is_supported(s));
        match self {
            StripPolicy::Supported => supported,
            StripPolicy::Unsupported => !supported,
        }
    }
}

/// Random RFC 4122 version 4 identifier
pub fn new_uuid() -> String {
    let mut bytes = [0u8; 16];
    thread_rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    let hex = hex::encode(bytes);
    format!("{}-{}-{}-{}-{}", &hex[..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..])
}

/// Identity of a stored annotation without `/NM`, stable across exports
pub(crate) fn fallback_uuid(reference: Reference) -> String {
    format!("annot-{}-{}", reference.id, reference.generation)
}

fn parse_date(field: &str, value: &Option<String>) -> CosResult<Option<PdfDate>> {
    match value {
        None => Ok(None),
        Some(text) => PdfDate::from_rfc3339(text)
            .map(Some)
            .ok_or_else(|| CosError::InvalidAnnotation(format!("{} is not an RFC 3339 date: {}", field, text))),
    }
}

impl AnnotationDto {
    /// Record for `annotation` on `page_id`; `None` without a subtype.
    /// `reference` is the annotation's place in the file, absent for ones
    /// added since loading
    pub(crate) fn from_annotation(annotation: &AnnotationDict, reference: Option<Reference>, page_id: u32) -> Option<Self> {
        let rect = annotation.rect();
        let rect = match rect {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => [0.0; 4],
        };
        Some(Self {
            page_id,
            uuid: annotation
                .name()
                .or_else(|| reference.map(fallback_uuid))
                .unwrap_or_else(new_uuid),
            annotation_type: annotation.subtype()?.to_string(),
            author: annotation.author(),
            date_created: annotation.created().map(PdfDate::to_rfc3339),
            date_modified: annotation.modified().map(PdfDate::to_rfc3339),
            text_content: annotation.contents(),
            rect,
            color: (!annotation.color().is_empty()).then(|| annotation.color().to_vec()),
            ink_list: (!annotation.ink_list().is_empty()).then(|| annotation.ink_list().to_vec()),
        })
    }

    /// Reject records that cannot be written before anything is applied
    pub(crate) fn validate(&self) -> CosResult<()> {
        if self.annotation_type.is_empty() {
            return Err(CosError::InvalidAnnotation(format!("{} has no annotation type", self.uuid)));
        }
        if self.rect.iter().any(|v| !v.is_finite()) {
            return Err(CosError::InvalidAnnotation(format!("{} has a non-finite rect", self.uuid)));
        }
        parse_date("dateCreated", &self.date_created)?;
        parse_date("dateModified", &self.date_modified)?;
        Ok(())
    }

    /// Bring `annotation` in line with this record, touching only fields that differ
    pub(crate) fn apply_to(&self, annotation: &mut AnnotationDict, page: Reference, default_author: Option<&str>) -> CosResult<()> {
        if annotation.subtype() != Some(self.annotation_type.as_str()) {
            annotation.set_subtype(&self.annotation_type);
        }
        if annotation.rect() != &self.rect[..] {
            annotation.set_rect(self.rect);
        }
        if annotation.name().as_deref() != Some(self.uuid.as_str()) {
            annotation.set_name(Some(&self.uuid));
        }
        if annotation.page() != Some(page) {
            annotation.set_page(Some(page));
        }

        let author = self.author.as_deref().or(default_author);
        if author.is_some() && annotation.author().as_deref() != author {
            annotation.set_author(author);
        }
        if annotation.contents() != self.text_content {
            annotation.set_contents(self.text_content.as_deref());
        }
        if let Some(color) = &self.color {
            if annotation.color() != color.as_slice() {
                annotation.set_color(color.clone());
            }
        }
        if let Some(ink_list) = &self.ink_list {
            if annotation.ink_list() != ink_list.as_slice() {
                annotation.set_ink_list(ink_list.clone());
            }
        }

        let created = parse_date("dateCreated", &self.date_created)?;
        match created {
            Some(date) if annotation.created() != Some(&date) => annotation.set_created(Some(date)),
            None if annotation.created().is_none() => annotation.set_created(Some(PdfDate::now())),
            _ => {}
        }
        if annotation.core().is_edited() || annotation.core().is_added() {
            let modified = parse_date("dateModified", &self.date_modified)?.unwrap_or_else(PdfDate::now);
            if annotation.modified() != Some(&modified) {
                annotation.set_modified(Some(modified));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn ink_record() -> AnnotationDto {
        AnnotationDto {
            page_id: 3,
            uuid: "a1b2".into(),
            annotation_type: "Ink".into(),
            author: None,
            date_created: Some("2024-03-01T12:00:00Z".into()),
            date_modified: None,
            text_content: Some("scribble".into()),
            rect: [10.0, 10.0, 50.0, 40.0],
            color: Some(vec![0.0, 0.0, 1.0]),
            ink_list: Some(vec![vec![10.0, 10.0, 50.0, 40.0]]),
        }
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(ink_record()).unwrap();
        assert_eq!(json["pageId"], 3);
        assert_eq!(json["annotationType"], "Ink");
        assert_eq!(json["textContent"], "scribble");
        assert!(json.get("author").is_none());

        let parsed: AnnotationDto = serde_json::from_str(
            r#"{"pageId": 4, "annotationType": "Text", "rect": [0, 0, 20, 20]}"#,
        )
        .unwrap();
        assert_eq!(parsed.page_id, 4);
        assert_eq!(parsed.uuid, "");
        assert_eq!(parsed.ink_list, None);
    }

    #[test]
    fn test_apply_and_read_back() {
        let record = ink_record();
        let mut annotation = AnnotationDict::new("Ink", [0.0; 4]);
        record.apply_to(&mut annotation, Reference::new(3, 0), Some("host-user")).unwrap();

        assert_eq!(annotation.author().as_deref(), Some("host-user"));
        assert!(annotation.modified().is_some());
        let back = AnnotationDto::from_annotation(&annotation, None, 3).unwrap();
        assert_eq!(back.uuid, "a1b2");
        assert_eq!(back.rect, record.rect);
        assert_eq!(back.date_created.as_deref(), Some("2024-03-01T12:00:00Z"));
        assert_eq!(back.ink_list, record.ink_list);
    }

    #[test]
    fn test_validation() {
        let mut record = ink_record();
        record.date_modified = Some("yesterday".into());
        assert!(matches!(record.validate(), Err(CosError::InvalidAnnotation(_))));

        let mut record = ink_record();
        record.annotation_type.clear();
        assert!(record.validate().is_err());
        assert!(ink_record().validate().is_ok());
    }

    #[test]
    fn test_strip_policy() {
        let options = EngineOptions::default();
        assert!(StripPolicy::Supported.strips(Some("Ink"), &options));
        assert!(!StripPolicy::Supported.strips(Some("Widget"), &options));
        assert!(StripPolicy::Unsupported.strips(Some("Widget"), &options));
        assert!(StripPolicy::Unsupported.strips(None, &options));
    }

    #[test]
    fn test_unnamed_annotation_identity() {
        let annotation = AnnotationDict::new("Square", [0.0, 0.0, 10.0, 10.0]);
        let stored = Some(Reference::new(12, 0));
        let first = AnnotationDto::from_annotation(&annotation, stored, 3).unwrap();
        let second = AnnotationDto::from_annotation(&annotation, stored, 3).unwrap();
        assert_eq!(first.uuid, "annot-12-0");
        assert_eq!(first.uuid, second.uuid);

        let added = AnnotationDto::from_annotation(&annotation, None, 3).unwrap();
        assert_eq!(added.uuid.len(), 36);
    }

    #[test]
    fn test_uuid_format() {
        let uuid = new_uuid();
        assert_eq!(uuid.len(), 36);
        assert_eq!(&uuid[14..15], "4");
        assert_ne!(uuid, new_uuid());
    }
}

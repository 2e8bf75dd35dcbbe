//! In-memory documents for the integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use pdf_cos::pdf::{Dictionary, Serializable, Value};
use pdf_cos::{
    CryptInfo, DocumentCrypt, EncryptionAlgorithm, PDFPermissions, Reference, StandardSecurityHandler,
};

pub const FILE_ID: &[u8] = b"\x8a\x11\x0c\x42\x90\xfe\x17\x33\x5e\x01\xaa\x70\x64\x2b\x9d\xc8";

/// Classic or xref-stream document assembled from object bodies
#[derive(Debug, Clone, Default)]
pub struct PdfBuilder {
    objects: BTreeMap<u32, Vec<u8>>,
    trailer_extra: String,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(mut self, id: u32, body: impl AsRef<[u8]>) -> Self {
        self.objects.insert(id, body.as_ref().to_vec());
        self
    }

    /// Extra entries appended inside the trailer dictionary
    pub fn trailer(mut self, entries: &str) -> Self {
        self.trailer_extra = entries.to_string();
        self
    }

    fn size(&self) -> u32 {
        self.objects.keys().next_back().map_or(1, |id| id + 1)
    }

    fn header() -> Vec<u8> {
        b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec()
    }

    fn write_object(out: &mut Vec<u8>, id: u32, body: &[u8]) -> usize {
        let offset = out.len();
        out.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
        offset
    }

    /// Document with a classic `xref` table
    pub fn build(&self) -> Vec<u8> {
        let mut out = Self::header();
        let mut offsets = BTreeMap::new();
        for (id, body) in &self.objects {
            offsets.insert(*id, Self::write_object(&mut out, *id, body));
        }

        let size = self.size();
        let startxref = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        for id in 0..size {
            let row = match offsets.get(&id) {
                Some(offset) => format!("{:010} 00000 n\r\n", offset),
                None if id == 0 => "0000000000 65535 f\r\n".to_string(),
                None => "0000000000 00000 f\r\n".to_string(),
            };
            out.extend_from_slice(row.as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n",
                size, self.trailer_extra, startxref
            )
            .as_bytes(),
        );
        out
    }

    /// Document whose `packed` objects live in an object stream, indexed by an
    /// unfiltered cross-reference stream
    pub fn build_with_object_stream(&self, packed: &[u32]) -> Vec<u8> {
        let container_id = self.size();
        let xref_id = container_id + 1;
        let size = xref_id + 1;

        let mut out = Self::header();
        let mut rows: BTreeMap<u32, (u8, u32, u16)> = BTreeMap::new();
        for (id, body) in &self.objects {
            if !packed.contains(id) {
                let offset = Self::write_object(&mut out, *id, body);
                rows.insert(*id, (1, offset as u32, 0));
            }
        }

        let mut table = String::new();
        let mut payload = Vec::new();
        for (index, id) in packed.iter().enumerate() {
            table.push_str(&format!("{} {} ", id, payload.len()));
            payload.extend_from_slice(&self.objects[id]);
            payload.push(b'\n');
            rows.insert(*id, (2, container_id, index as u16));
        }
        let first = table.len();
        let mut content = table.into_bytes();
        content.extend_from_slice(&payload);
        let mut container = format!(
            "<< /Type /ObjStm /N {} /First {} /Length {} >>\nstream\n",
            packed.len(),
            first,
            content.len()
        )
        .into_bytes();
        container.extend_from_slice(&content);
        container.extend_from_slice(b"\nendstream");
        let offset = Self::write_object(&mut out, container_id, &container);
        rows.insert(container_id, (1, offset as u32, 0));

        let startxref = out.len();
        rows.insert(xref_id, (1, startxref as u32, 0));
        let mut data = Vec::new();
        for id in 0..size {
            let (kind, field, generation) = match rows.get(&id) {
                Some(row) => *row,
                None if id == 0 => (0, 0, 65535),
                None => (0, 0, 0),
            };
            data.push(kind);
            data.extend_from_slice(&field.to_be_bytes());
            data.extend_from_slice(&generation.to_be_bytes());
        }
        let mut xref = format!(
            "<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R {} /Length {} >>\nstream\n",
            size,
            self.trailer_extra,
            data.len()
        )
        .into_bytes();
        xref.extend_from_slice(&data);
        xref.extend_from_slice(b"\nendstream");
        Self::write_object(&mut out, xref_id, &xref);
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes());
        out
    }
}

/// Catalog, page tree and a single page carrying `annots`
pub fn single_page(annots: &str) -> PdfBuilder {
    PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(
            3,
            format!("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [{}] >>", annots),
        )
}

/// Two pages; page 3 has an ink and a link annotation, page 4 a square
pub fn annotated_document() -> PdfBuilder {
    PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [5 0 R 6 0 R] >>")
        .object(4, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots 8 0 R >>")
        .object(
            5,
            "<< /Type /Annot /Subtype /Ink /Rect [10 10 90 60] /NM (ink-one) /T (alice) \
             /CreationDate (D:20240301120000Z) /InkList [[10 10 50 30 90 60]] /C [0 0 1] >>",
        )
        .object(6, "<< /Type /Annot /Subtype /Link /Rect [100 700 200 720] >>")
        .object(7, "<< /Subtype /Square /Rect [50 50 150 150] /NM (square-one) /Contents (boxed) >>")
        .object(8, "[7 0 R]")
}

/// Encrypted single-page document with an info dictionary and a content stream
pub struct EncryptedDocument {
    pub bytes: Vec<u8>,
    pub title: &'static [u8],
    pub content: &'static [u8],
}

pub fn encrypted_document(algorithm: EncryptionAlgorithm, user: &str, owner: &str) -> EncryptedDocument {
    let title: &'static [u8] = b"Quarterly figures";
    let content: &'static [u8] = b"BT /F1 12 Tf 72 712 Td (Confidential) Tj ET";

    let handler = StandardSecurityHandler::new(
        algorithm,
        PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::ANNOTATE),
        user,
        owner,
        FILE_ID.to_vec(),
    )
    .unwrap();
    let (crypt, _) = handler.authenticate(owner).unwrap().unwrap();
    let crypt = Arc::new(crypt);
    let info = |id: u32| CryptInfo::new(Reference::new(id, 0), Arc::clone(&crypt));

    let mut info_dict = Dictionary::new();
    info_dict.set("Title", Value::String(title.to_vec()));
    info_dict.set("Producer", Value::HexString(b"pdf-cos tests".to_vec()));

    let stream = pdf_cos::pdf::PdfStream::new(Dictionary::new(), Vec::new(), content.to_vec());

    let bytes = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 5 0 R >>")
        .object(4, info_dict.to_bytes(Some(&info(4))).unwrap())
        .object(5, stream.to_bytes(Some(&info(5))).unwrap())
        .object(6, handler.to_dict().to_bytes(None).unwrap())
        .trailer(&format!(
            "/Info 4 0 R /Encrypt 6 0 R /ID [<{0}> <{0}>]",
            hex::encode(FILE_ID)
        ))
        .build();

    EncryptedDocument { bytes, title, content }
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

//! Document engine: authentication, editing, annotation exchange and saving
//!
//! A [`DocumentEngine`] owns one document buffer at a time and moves through
//! `Unloaded -> Authenticating -> Ready -> (Editing <-> Ready) -> Closed`.
//! Objects are read lazily through the cross-reference table; edits stay in
//! memory until [`DocumentEngine::save`] writes them out as an incremental
//! update or a full rewrite and re-adopts the written bytes.

mod annotations;
mod graph;
mod options;
mod pages;
mod undo;
mod writer;

pub use annotations::{new_uuid, AnnotationDto, StripPolicy};
pub use graph::ObjectKey;
pub use options::{EngineOptions, SaveMode, DEFAULT_SUPPORTED_SUBTYPES};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::error::{CosError, CosResult};
use crate::handlers::SecurityHandler;
use crate::pdf::{AnnotationDict, PdfObject, Reference};
use crate::security::PasswordKind;
use crate::EncryptionInfo;
use annotations::fallback_uuid;
use graph::ObjectGraph;
use undo::{UndoRecord, UndoStack};

/// Lifecycle of the document held by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Unloaded,
    /// Encrypted document waiting for a password
    Authenticating,
    Ready,
    /// Unsaved edits that can be undone
    Editing,
    Closed,
}

/// Supplies passwords while a document is authenticating
pub trait PasswordProvider {
    /// Password for the `attempt`-th try (starting at 1); `None` abandons the load
    fn request_password(&mut self, attempt: u32) -> Option<String>;
}

impl<F> PasswordProvider for F
where
    F: FnMut(u32) -> Option<String>,
{
    fn request_password(&mut self, attempt: u32) -> Option<String> {
        self(attempt)
    }
}

/// External renderer that draws the bytes handed over by the engine
pub trait RenderBackend {
    type Document;

    fn load_document(&mut self, data: Vec<u8>, password: Option<&str>) -> CosResult<Self::Document>;
}

/// Result of a save
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Complete output file
    pub bytes: Vec<u8>,
    /// Mode actually used
    pub mode: SaveMode,
    /// Objects written to the output
    pub written: Vec<Reference>,
    /// Objects that could not be serialized; their previous version stays in the output
    pub failed: Vec<(ObjectKey, String)>,
}

/// Owner of one loaded document
#[derive(Debug)]
pub struct DocumentEngine {
    options: EngineOptions,
    state: DocumentState,
    graph: Option<ObjectGraph>,
    handler: Option<SecurityHandler>,
    password: Option<Zeroizing<String>>,
    unlocked_with: Option<PasswordKind>,
    undo: UndoStack,
}

fn has_changed(previous: &PdfObject, current: &PdfObject) -> bool {
    previous != current
        || previous.is_edited() != current.is_edited()
        || previous.is_deleted() != current.is_deleted()
}

impl Default for DocumentEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl DocumentEngine {
    pub fn new(options: EngineOptions) -> Self {
        let undo = UndoStack::new(options.undo_limit);
        Self {
            options,
            state: DocumentState::Unloaded,
            graph: None,
            handler: None,
            password: None,
            unlocked_with: None,
            undo,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    /// Bytes of the current document, as loaded or last saved
    pub fn document_bytes(&self) -> Option<&[u8]> {
        self.graph.as_ref().map(|graph| &graph.buffer()[..])
    }

    pub fn encryption_info(&self) -> Option<EncryptionInfo> {
        self.handler.as_ref().map(|handler| EncryptionInfo {
            algorithm: handler.algorithm(),
            permissions: handler.permissions(),
            unlocked_with: self.unlocked_with,
        })
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    fn expect_state(&self, operation: &'static str, allowed: &[DocumentState]) -> CosResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CosError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn parts(&mut self, operation: &'static str) -> CosResult<(&mut ObjectGraph, &EngineOptions)> {
        self.expect_state(operation, &[DocumentState::Ready, DocumentState::Editing])?;
        let state = self.state;
        match self.graph.as_mut() {
            Some(graph) => Ok((graph, &self.options)),
            None => Err(CosError::InvalidState { operation, state }),
        }
    }

    fn editable_graph(&mut self, operation: &'static str) -> CosResult<&mut ObjectGraph> {
        self.parts(operation).map(|(graph, _)| graph)
    }

    fn record(&mut self, record: UndoRecord) {
        self.undo.push(record);
        self.sync_state();
    }

    fn sync_state(&mut self) {
        self.state = if self.undo.is_empty() {
            DocumentState::Ready
        } else {
            DocumentState::Editing
        };
    }

    fn unload(&mut self) {
        self.graph = None;
        self.handler = None;
        self.password = None;
        self.unlocked_with = None;
        self.undo.clear();
        self.state = DocumentState::Unloaded;
    }

    /// Open `data`; encrypted documents are tried with the empty password
    /// and stay in `Authenticating` when it does not unlock them
    pub fn load(&mut self, data: impl Into<Arc<[u8]>>) -> CosResult<DocumentState> {
        self.expect_state("load", &[DocumentState::Unloaded])?;

        let mut graph = ObjectGraph::open(data.into(), self.options.parser_strategy)?;
        let handler = match graph.encrypt_dictionary()? {
            Some(encrypt) => Some(SecurityHandler::from_dict(&encrypt, &graph.file_id())?),
            None => None,
        };
        debug!("Loaded {:?}", graph);

        self.graph = Some(graph);
        self.handler = handler;
        self.password = None;
        self.unlocked_with = None;
        self.undo.clear();
        if self.handler.is_none() {
            self.state = DocumentState::Ready;
            return Ok(self.state);
        }

        self.state = DocumentState::Authenticating;
        if let Err(e) = self.try_authenticate("") {
            self.unload();
            return Err(e);
        }
        Ok(self.state)
    }

    /// Try one password; a rejected password leaves the engine authenticating
    pub fn try_authenticate(&mut self, password: &str) -> CosResult<bool> {
        self.expect_state("try_authenticate", &[DocumentState::Authenticating])?;
        let (Some(handler), Some(graph)) = (self.handler.as_ref(), self.graph.as_mut()) else {
            return Err(CosError::InvalidState {
                operation: "try_authenticate",
                state: self.state,
            });
        };

        match handler.authenticate(password)? {
            Some((crypt, kind)) => {
                debug!("Document unlocked with the {:?} password", kind);
                graph.set_crypt(Some(Arc::new(crypt)));
                self.password = Some(Zeroizing::new(password.to_string()));
                self.unlocked_with = Some(kind);
                self.state = DocumentState::Ready;
                Ok(true)
            }
            None => {
                debug!("Password rejected");
                Ok(false)
            }
        }
    }

    /// Ask `provider` for passwords until one unlocks the document
    pub fn authenticate_with<P>(&mut self, provider: &mut P) -> CosResult<()>
    where
        P: PasswordProvider + ?Sized,
    {
        if self.state == DocumentState::Ready {
            return Ok(());
        }
        self.expect_state("authenticate_with", &[DocumentState::Authenticating])?;

        let mut attempt = 1;
        loop {
            let Some(password) = provider.request_password(attempt) else {
                info!("Password entry abandoned after {} attempts", attempt - 1);
                self.unload();
                return Err(CosError::AuthenticationAborted);
            };
            let password = Zeroizing::new(password);
            if self.try_authenticate(&password)? {
                return Ok(());
            }
            attempt += 1;
        }
    }

    /// Page references in document order
    pub fn pages(&mut self) -> CosResult<Vec<Reference>> {
        pages::collect_pages(self.editable_graph("pages")?)
    }

    pub fn get_object(&mut self, key: ObjectKey) -> CosResult<Option<&PdfObject>> {
        self.editable_graph("get_object")?.object(key)
    }

    /// Mutate one object; an undo record is kept when `edit` changed it
    pub fn edit_object<R>(&mut self, key: ObjectKey, edit: impl FnOnce(&mut PdfObject) -> R) -> CosResult<R> {
        let graph = self.editable_graph("edit_object")?;
        let object = graph.object_mut(key)?.ok_or(CosError::UnknownObject(key))?;
        let previous = object.clone();
        let result = edit(object);
        if has_changed(&previous, object) {
            self.record(UndoRecord::Edited { key, previous });
        }
        Ok(result)
    }

    /// Add an object that gets an id on the next save
    pub fn add_object(&mut self, object: PdfObject) -> CosResult<ObjectKey> {
        let key = self.editable_graph("add_object")?.add(object, None);
        trace!("Added object {}", key);
        self.record(UndoRecord::Added { key });
        Ok(key)
    }

    /// Add `annotation` to the `/Annots` of page `page_id`
    pub fn add_annotation(&mut self, page_id: u32, mut annotation: AnnotationDict) -> CosResult<ObjectKey> {
        let (graph, options) = self.parts("add_annotation")?;
        let page = pages::collect_pages(graph)?
            .into_iter()
            .find(|page| page.id == page_id)
            .ok_or_else(|| CosError::InvalidAnnotation(format!("{} is not a page", page_id)))?;

        annotation.set_page(Some(page));
        if annotation.author().is_none() {
            if let Some(author) = options.author.as_deref() {
                annotation.set_author(Some(author));
            }
        }
        if annotation.name().is_none() {
            annotation.set_name(Some(&new_uuid()));
        }
        let key = graph.add(PdfObject::Annotation(annotation), Some(page_id));
        self.record(UndoRecord::Added { key });
        Ok(key)
    }

    /// Mark `key` deleted; deleting twice is a no-op
    pub fn delete_object(&mut self, key: ObjectKey) -> CosResult<()> {
        let graph = self.editable_graph("delete_object")?;
        let object = graph.object_mut(key)?.ok_or(CosError::UnknownObject(key))?;
        if object.is_deleted() {
            return Ok(());
        }
        object.mark_deleted();
        self.record(UndoRecord::Deleted { key });
        Ok(())
    }

    /// Revert the most recent edit; false when there is nothing to undo
    pub fn undo(&mut self) -> CosResult<bool> {
        self.expect_state("undo", &[DocumentState::Ready, DocumentState::Editing])?;
        let Some(record) = self.undo.pop() else {
            return Ok(false);
        };
        let graph = self.editable_graph("undo")?;
        record.revert(graph)?;
        self.sync_state();
        Ok(true)
    }

    /// Keys changed since the last call, in key order
    pub fn take_changed(&self) -> Vec<ObjectKey> {
        self.graph.as_ref().map(ObjectGraph::take_changed).unwrap_or_default()
    }

    /// Records for every live annotation of a supported subtype
    pub fn serialize_annotations(&mut self) -> CosResult<Vec<AnnotationDto>> {
        let (graph, options) = self.parts("serialize_annotations")?;
        let exported = |annotation: &AnnotationDict| {
            !annotation.core().is_deleted() && annotation.subtype().map_or(false, |s| options.is_supported(s))
        };

        let mut records = Vec::new();
        for page in pages::collect_pages(graph)? {
            for annot in pages::page_annotations(graph, page.id)? {
                if !graph.load_annotation(annot.id)? {
                    continue;
                }
                if let Some(annotation) = graph.peek(annot.id).and_then(PdfObject::as_annotation) {
                    if exported(annotation) {
                        records.extend(AnnotationDto::from_annotation(annotation, Some(annot), page.id));
                    }
                }
            }
            for (_, added) in graph.added() {
                match added.object.as_annotation() {
                    Some(annotation) if added.page == Some(page.id) && exported(annotation) => {
                        records.extend(AnnotationDto::from_annotation(annotation, None, page.id));
                    }
                    _ => {}
                }
            }
        }
        debug!("Exported {} annotations", records.len());
        Ok(records)
    }

    pub fn serialize_annotations_json(&mut self) -> CosResult<String> {
        Ok(serde_json::to_string(&self.serialize_annotations()?)?)
    }

    /// Merge `records` into the document by uuid; the import is undone as one step
    pub fn append_serialized_annotations(&mut self, records: &[AnnotationDto]) -> CosResult<Vec<ObjectKey>> {
        for record in records {
            record.validate()?;
        }
        let (graph, options) = self.parts("append_serialized_annotations")?;
        let author = options.author.clone();

        let pages: HashMap<u32, Reference> = pages::collect_pages(graph)?
            .into_iter()
            .map(|page| (page.id, page))
            .collect();
        if let Some(record) = records.iter().find(|r| !pages.contains_key(&r.page_id)) {
            return Err(CosError::InvalidAnnotation(format!(
                "{} refers to missing page {}",
                record.uuid, record.page_id
            )));
        }

        let mut index = annotation_index(graph)?;
        let mut batch = Vec::new();
        let imported = import_records(graph, &pages, &mut index, records, author.as_deref(), &mut batch);
        let keys = match imported {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Annotation import failed, rolling back: {}", e);
                UndoRecord::Batch(batch).revert(graph)?;
                return Err(e);
            }
        };

        debug!("Imported {} annotations", keys.len());
        if !batch.is_empty() {
            self.record(UndoRecord::Batch(batch));
        }
        Ok(keys)
    }

    pub fn append_serialized_annotations_json(&mut self, json: &str) -> CosResult<Vec<ObjectKey>> {
        let records: Vec<AnnotationDto> = serde_json::from_str(json)?;
        self.append_serialized_annotations(&records)
    }

    /// Bytes for the renderer with annotations removed per `policy`; the live
    /// document is left as it is
    pub fn data_for_renderer(&mut self, policy: StripPolicy) -> CosResult<Vec<u8>> {
        let (graph, options) = self.parts("data_for_renderer")?;
        writer::render_copy(graph, &|subtype: Option<&str>| policy.strips(subtype, options))
    }

    pub fn render_with<B: RenderBackend>(&mut self, backend: &mut B, policy: StripPolicy) -> CosResult<B::Document> {
        let data = self.data_for_renderer(policy)?;
        let password = self.password.as_ref().map(|password| password.as_str());
        backend.load_document(data, password)
    }

    /// Write pending changes and continue from the written bytes
    pub fn save(&mut self, mode: SaveMode) -> CosResult<SaveReport> {
        let graph = self.editable_graph("save")?;
        let mode = match mode {
            SaveMode::Incremental if graph.xref().is_recovered() || graph.xref().startxref().is_none() => {
                warn!("Cross-reference chain was rebuilt, writing a full rewrite instead");
                SaveMode::Full
            }
            mode => mode,
        };

        let outcome = match mode {
            SaveMode::Incremental => writer::incremental(graph)?,
            SaveMode::Full => writer::full(graph)?,
        };
        let saved = ObjectGraph::open(Arc::<[u8]>::from(outcome.bytes.clone()), graph.strategy())?;

        let mut keep = HashMap::new();
        let mut keep_added = BTreeMap::new();
        for (key, _) in &outcome.failed {
            match *key {
                ObjectKey::Id(id) => {
                    if let Some(object) = graph.peek(id) {
                        keep.insert(id, object.clone());
                    }
                }
                ObjectKey::Added(slot) => {
                    if let Some((_, added)) = graph.added().find(|(s, _)| *s == slot) {
                        keep_added.insert(slot, added.clone());
                    }
                }
            }
        }
        graph.adopt(saved, keep, keep_added);

        info!(
            "Saved {} bytes ({:?}, {} objects written, {} failed)",
            outcome.bytes.len(),
            mode,
            outcome.written.len(),
            outcome.failed.len()
        );
        self.undo.clear();
        self.state = DocumentState::Ready;
        Ok(SaveReport {
            bytes: outcome.bytes,
            mode,
            written: outcome.written,
            failed: outcome.failed,
        })
    }

    /// Save with the configured default mode
    pub fn save_default(&mut self) -> CosResult<SaveReport> {
        self.save(self.options.save_mode)
    }

    pub fn close(&mut self) {
        self.unload();
        self.state = DocumentState::Closed;
    }
}

/// Live annotations by uuid with their page
fn annotation_index(graph: &mut ObjectGraph) -> CosResult<HashMap<String, (ObjectKey, u32)>> {
    let mut index = HashMap::new();
    for page in pages::collect_pages(graph)? {
        for annot in pages::page_annotations(graph, page.id)? {
            if !graph.load_annotation(annot.id)? {
                continue;
            }
            if let Some(annotation) = graph.peek(annot.id).and_then(PdfObject::as_annotation) {
                if !annotation.core().is_deleted() {
                    let uuid = annotation.name().unwrap_or_else(|| fallback_uuid(annot));
                    index.insert(uuid, (ObjectKey::Id(annot.id), page.id));
                }
            }
        }
    }
    for (slot, added) in graph.added() {
        if let (Some(annotation), Some(page)) = (added.object.as_annotation(), added.page) {
            if annotation.core().is_deleted() {
                continue;
            }
            if let Some(uuid) = annotation.name() {
                index.insert(uuid, (ObjectKey::Added(slot), page));
            }
        }
    }
    Ok(index)
}

fn import_records(
    graph: &mut ObjectGraph,
    pages: &HashMap<u32, Reference>,
    index: &mut HashMap<String, (ObjectKey, u32)>,
    records: &[AnnotationDto],
    author: Option<&str>,
    batch: &mut Vec<UndoRecord>,
) -> CosResult<Vec<ObjectKey>> {
    let mut keys = Vec::with_capacity(records.len());
    for record in records {
        let mut record = record.clone();
        if record.uuid.is_empty() {
            record.uuid = new_uuid();
        }
        let Some(&page) = pages.get(&record.page_id) else {
            continue;
        };

        let existing = index.get(&record.uuid).copied();
        if let Some((key, page_id)) = existing {
            if page_id == record.page_id {
                if let Some(object) = graph.object_mut(key)? {
                    let previous = object.clone();
                    if let Some(annotation) = object.as_annotation_mut() {
                        record.apply_to(annotation, page, author)?;
                    }
                    if has_changed(&previous, object) {
                        batch.push(UndoRecord::Edited { key, previous });
                    }
                    keys.push(key);
                    continue;
                }
            }
            // moved to another page: drop the old one and add it again there
            if let Some(object) = graph.object_mut(key)? {
                object.mark_deleted();
                batch.push(UndoRecord::Deleted { key });
            }
        }

        let mut annotation = AnnotationDict::new(&record.annotation_type, record.rect);
        record.apply_to(&mut annotation, page, author)?;
        let key = graph.add(PdfObject::Annotation(annotation), Some(record.page_id));
        batch.push(UndoRecord::Added { key });
        index.insert(record.uuid.clone(), (key, record.page_id));
        keys.push(key);
    }
    Ok(keys)
}

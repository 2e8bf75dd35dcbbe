//! Incremental and full serialization of the object graph

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, trace, warn};

use super::graph::{ObjectGraph, ObjectKey};
use super::pages::{collect_pages, page_annotations};
use crate::error::CosResult;
use crate::pdf::{write_indirect, Dictionary, PdfObject, Reference, Value, XrefEntry};

const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

enum Output {
    Object { reference: Reference, bytes: Vec<u8> },
    Free { generation: u16 },
}

/// Everything a save produced, before the engine adopts it
#[derive(Debug, Default)]
pub(crate) struct SaveOutcome {
    pub bytes: Vec<u8>,
    pub written: Vec<Reference>,
    pub failed: Vec<(ObjectKey, String)>,
}

#[derive(Default)]
struct Plan {
    outputs: BTreeMap<u32, Output>,
    written: Vec<Reference>,
    failed: Vec<(ObjectKey, String)>,
}

impl Plan {
    fn object(&mut self, reference: Reference, bytes: Vec<u8>) {
        self.outputs.insert(reference.id, Output::Object { reference, bytes });
    }

    fn free(&mut self, id: u32, generation: u16) {
        self.outputs.insert(id, Output::Free { generation });
    }

    fn fail(&mut self, key: ObjectKey, error: impl ToString) {
        let message = error.to_string();
        warn!("Object {} could not be serialized: {}", key, message);
        self.failed.push((key, message));
    }

    fn into_outcome(self, bytes: Vec<u8>) -> SaveOutcome {
        let written = self
            .outputs
            .values()
            .filter_map(|o| match o {
                Output::Object { reference, .. } => Some(*reference),
                Output::Free { .. } => None,
            })
            .collect();
        SaveOutcome {
            bytes,
            written,
            failed: self.failed,
        }
    }
}

fn serialize(graph: &ObjectGraph, object: &PdfObject, reference: Reference) -> CosResult<Vec<u8>> {
    object.to_indirect_bytes(reference, graph.crypt_for(reference).as_ref())
}

fn generation_of(graph: &ObjectGraph, id: u32) -> u16 {
    match graph.xref().entry(id) {
        Some(XrefEntry::Normal { generation, .. }) => *generation,
        _ => 0,
    }
}

/// Give ids to added objects and serialize them; returns new links per page
fn emit_added(graph: &ObjectGraph, plan: &mut Plan, next_id: &mut u32) -> HashMap<u32, Vec<Reference>> {
    let mut links: HashMap<u32, Vec<Reference>> = HashMap::new();
    for (slot, added) in graph.added() {
        if added.object.is_deleted() {
            continue;
        }
        let reference = Reference::new(*next_id, 0);
        match serialize(graph, &added.object, reference) {
            Ok(bytes) => {
                trace!("Added object {} becomes {}", ObjectKey::Added(slot), reference);
                *next_id += 1;
                plan.object(reference, bytes);
                if let Some(page) = added.page {
                    links.entry(page).or_default().push(reference);
                }
            }
            Err(e) => plan.fail(ObjectKey::Added(slot), e),
        }
    }
    links
}

/// Rewrite `/Annots` of pages that gain new annotations or lose deleted ones
fn relink_pages(
    graph: &mut ObjectGraph,
    plan: &mut Plan,
    links: &HashMap<u32, Vec<Reference>>,
    removed: &HashSet<u32>,
) -> CosResult<()> {
    let mut pages: BTreeSet<u32> = links.keys().copied().collect();
    if !removed.is_empty() {
        for page in collect_pages(graph)? {
            if page_annotations(graph, page.id)?.iter().any(|r| removed.contains(&r.id)) {
                pages.insert(page.id);
            }
        }
    }

    for page_id in pages {
        let new_links = links.get(&page_id).map(Vec::as_slice).unwrap_or_default();
        if let Err(e) = rewrite_annots(graph, plan, page_id, |refs| {
            refs.retain(|v| v.as_reference().map_or(true, |r| !removed.contains(&r.id)));
            refs.extend(new_links.iter().copied().map(Value::Reference));
        }) {
            plan.fail(ObjectKey::Id(page_id), e);
        }
    }
    Ok(())
}

/// Emit `page_id` (or its indirect `/Annots` array) with the list changed by `update`
fn rewrite_annots(
    graph: &mut ObjectGraph,
    plan: &mut Plan,
    page_id: u32,
    update: impl FnOnce(&mut Vec<Value>),
) -> CosResult<()> {
    let Some(mut page) = graph.dict(page_id)? else {
        warn!("Page {} is not a dictionary, annotations left unlinked", page_id);
        return Ok(());
    };
    let annots = page.get("Annots").cloned();
    let resolved = match &annots {
        Some(value) => graph.resolve_array(value)?,
        None => None,
    };
    let indirect = match annots {
        Some(Value::Reference(array)) if resolved.is_some() => Some(array),
        _ => None,
    };
    let mut refs = resolved.unwrap_or_default();
    update(&mut refs);

    let (reference, body) = match indirect {
        Some(array) => (array, Value::Array(refs).to_bytes(graph.crypt_for(array).as_ref())?),
        None => {
            let reference = match graph.get(page_id)? {
                Some(object) => object.reference(),
                None => None,
            }
            .unwrap_or_else(|| Reference::new(page_id, generation_of(graph, page_id)));
            page.set("Annots", Value::Array(refs));
            (reference, page.to_bytes(graph.crypt_for(reference).as_ref())?)
        }
    };
    plan.object(reference, write_indirect(reference, &body));
    Ok(())
}

fn write_xref(out: &mut Vec<u8>, rows: &BTreeMap<u32, XrefEntry>) {
    out.extend_from_slice(b"xref\n");
    let ids: Vec<u32> = rows.keys().copied().collect();
    let mut i = 0;
    while i < ids.len() {
        let mut j = i + 1;
        while j < ids.len() && ids[j] == ids[j - 1] + 1 {
            j += 1;
        }
        out.extend_from_slice(format!("{} {}\n", ids[i], j - i).as_bytes());
        for id in &ids[i..j] {
            let row = match rows[id] {
                XrefEntry::Normal { offset, generation } => format!("{:010} {:05} n\r\n", offset, generation),
                XrefEntry::Free { next, generation } => format!("{:010} {:05} f\r\n", next, generation),
                XrefEntry::Compressed { .. } => continue,
            };
            out.extend_from_slice(row.as_bytes());
        }
        i = j;
    }
}

/// Current trailer without the entries that only describe the previous sections
fn section_trailer(graph: &ObjectGraph, size: u32) -> Dictionary {
    let mut trailer = graph.trailer().clone();
    for key in ["Prev", "XRefStm", "Type", "W", "Index", "Filter", "DecodeParms", "Length"] {
        trailer.remove(key);
    }
    trailer.set("Size", Value::Number(f64::from(size)));
    trailer
}

fn write_trailer(out: &mut Vec<u8>, trailer: &Dictionary, startxref: usize) -> CosResult<()> {
    out.extend_from_slice(b"trailer\n");
    trailer.write_to(out, None)?;
    out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", startxref).as_bytes());
    Ok(())
}

/// Append `plan` after the current bytes as a new update section
fn assemble_incremental(graph: &ObjectGraph, plan: Plan) -> CosResult<SaveOutcome> {
    let mut out = graph.buffer().to_vec();
    if plan.outputs.is_empty() {
        debug!("Nothing changed, incremental save leaves the document as is");
        return Ok(plan.into_outcome(out));
    }
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }

    let mut rows = BTreeMap::new();
    let mut size = graph.xref().size();
    for (id, output) in &plan.outputs {
        size = size.max(id + 1);
        match output {
            Output::Object { reference, bytes } => {
                rows.insert(*id, XrefEntry::Normal { offset: out.len(), generation: reference.generation });
                out.extend_from_slice(bytes);
            }
            Output::Free { generation } => {
                rows.insert(*id, XrefEntry::Free { next: 0, generation: *generation });
            }
        }
    }

    let startxref = out.len();
    write_xref(&mut out, &rows);
    let mut trailer = section_trailer(graph, size);
    if let Some(prev) = graph.xref().startxref() {
        trailer.set("Prev", Value::Number(prev as f64));
    }
    write_trailer(&mut out, &trailer, startxref)?;

    debug!(
        "Incremental update: {} objects, {} failed, {} bytes appended",
        plan.outputs.len(),
        plan.failed.len(),
        out.len() - graph.buffer().len()
    );
    Ok(plan.into_outcome(out))
}

/// Write every object in `plan` as a standalone document
fn assemble_full(graph: &ObjectGraph, plan: Plan) -> CosResult<SaveOutcome> {
    let source = graph.buffer();
    let header = if source.starts_with(b"%PDF-") {
        let end = source.iter().position(|&b| b == b'\r' || b == b'\n').unwrap_or(source.len());
        &source[..end]
    } else {
        b"%PDF-1.7".as_slice()
    };
    let mut out = header.to_vec();
    out.push(b'\n');
    out.extend_from_slice(BINARY_MARKER);

    let size = plan
        .outputs
        .keys()
        .next_back()
        .map_or(1, |id| id + 1)
        .max(graph.xref().size());
    let mut rows = BTreeMap::new();
    let mut free = vec![0u32];
    for id in 1..size {
        match plan.outputs.get(&id) {
            Some(Output::Object { reference, bytes }) => {
                rows.insert(id, XrefEntry::Normal { offset: out.len(), generation: reference.generation });
                out.extend_from_slice(bytes);
            }
            Some(Output::Free { generation }) => {
                rows.insert(id, XrefEntry::Free { next: 0, generation: *generation });
                free.push(id);
            }
            None => {
                rows.insert(id, XrefEntry::Free { next: 0, generation: 0 });
                free.push(id);
            }
        }
    }
    rows.insert(0, XrefEntry::Free { next: 0, generation: 65535 });
    // chain the free entries through their `next` fields
    for pair in free.windows(2) {
        if let Some(XrefEntry::Free { next, .. }) = rows.get_mut(&pair[0]) {
            *next = pair[1];
        }
    }

    let startxref = out.len();
    write_xref(&mut out, &rows);
    let trailer = section_trailer(graph, size);
    write_trailer(&mut out, &trailer, startxref)?;

    debug!("Full rewrite: {} objects, {} failed", plan.outputs.len(), plan.failed.len());
    Ok(plan.into_outcome(out))
}

fn removed_ids(graph: &ObjectGraph) -> HashSet<u32> {
    graph
        .cached()
        .into_iter()
        .filter(|(_, object)| object.is_deleted())
        .map(|(id, _)| id)
        .collect()
}

/// Original bytes plus added, edited and deleted objects
pub(crate) fn incremental(graph: &mut ObjectGraph) -> CosResult<SaveOutcome> {
    let mut plan = Plan::default();
    let mut next_id = graph.xref().size().max(1);
    let links = emit_added(graph, &mut plan, &mut next_id);

    for (id, object) in graph.cached() {
        if object.is_deleted() {
            let generation = generation_of(graph, id).saturating_add(1);
            plan.free(id, generation);
        } else if object.is_edited() {
            let reference = object.reference().unwrap_or_else(|| Reference::new(id, generation_of(graph, id)));
            match serialize(graph, object, reference) {
                Ok(bytes) => plan.object(reference, bytes),
                Err(e) => plan.fail(ObjectKey::Id(id), e),
            }
        }
    }

    let removed = removed_ids(graph);
    relink_pages(graph, &mut plan, &links, &removed)?;
    assemble_incremental(graph, plan)
}

/// Every live object as a plain indirect object, containers dropped
pub(crate) fn full(graph: &mut ObjectGraph) -> CosResult<SaveOutcome> {
    let mut plan = Plan::default();
    let ids: Vec<u32> = graph.xref().live_ids().collect();
    for id in ids {
        if !graph.load(id)? {
            match graph.raw_object(id)? {
                Some(bytes) => {
                    warn!("Copying undecodable object {} verbatim", id);
                    plan.object(Reference::new(id, generation_of(graph, id)), bytes);
                }
                None => warn!("Dropping unresolvable object {}", id),
            }
        }
    }

    let mut next_id = graph.xref().size().max(1);
    for (id, object) in graph.cached() {
        if object.is_deleted() {
            plan.free(id, generation_of(graph, id).saturating_add(1));
            continue;
        }
        if matches!(object, PdfObject::ObjectStream(_)) || object.type_name() == Some("XRef") {
            continue;
        }
        let reference = object.reference().unwrap_or_else(|| Reference::new(id, generation_of(graph, id)));
        match serialize(graph, object, reference) {
            Ok(bytes) => plan.object(reference, bytes),
            Err(e) => {
                plan.fail(ObjectKey::Id(id), e);
                if object.core().stream_id().is_none() {
                    if let Some(source) = object.core().source_bytes() {
                        plan.object(reference, write_indirect(reference, source));
                    }
                }
            }
        }
    }
    let links = emit_added(graph, &mut plan, &mut next_id);

    let removed = removed_ids(graph);
    relink_pages(graph, &mut plan, &links, &removed)?;
    assemble_full(graph, plan)
}

/// Current bytes with `/Annots` entries filtered by `strip`, for rendering
pub(crate) fn render_copy(graph: &mut ObjectGraph, strip: &dyn Fn(Option<&str>) -> bool) -> CosResult<Vec<u8>> {
    let mut plan = Plan::default();
    for page in collect_pages(graph)? {
        let mut stripped = HashSet::new();
        for annot in page_annotations(graph, page.id)? {
            let subtype = if graph.load_annotation(annot.id)? {
                graph
                    .get(annot.id)?
                    .and_then(PdfObject::as_annotation)
                    .and_then(|a| a.subtype().map(str::to_string))
            } else {
                None
            };
            if strip(subtype.as_deref()) {
                stripped.insert(annot.id);
            }
        }
        if !stripped.is_empty() {
            trace!("Stripping {} annotations from page {}", stripped.len(), page);
            rewrite_annots(graph, &mut plan, page.id, |refs| {
                refs.retain(|v| v.as_reference().map_or(true, |r| !stripped.contains(&r.id)));
            })?;
        }
    }

    let outcome = if graph.xref().startxref().is_some() {
        assemble_incremental(graph, plan)?
    } else {
        // no chain to append to: copy the saved objects under the stripped pages
        let mut full = verbatim_plan(graph)?;
        full.outputs.extend(plan.outputs);
        assemble_full(graph, full)?
    };
    Ok(outcome.bytes)
}

/// Every live object as found in the current bytes
fn verbatim_plan(graph: &mut ObjectGraph) -> CosResult<Plan> {
    let mut plan = Plan::default();
    let ids: Vec<u32> = graph.xref().live_ids().collect();
    for id in ids {
        if let Some(bytes) = graph.raw_object(id)? {
            plan.object(Reference::new(id, generation_of(graph, id)), bytes);
        } else if graph.load(id)? {
            if let Some(object) = graph.peek(id) {
                let reference = Reference::new(id, 0);
                let bytes = serialize(graph, object, reference)?;
                plan.object(reference, bytes);
            }
        }
    }
    Ok(plan)
}

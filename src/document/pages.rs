//! Page tree walk and per-page annotation lists

use std::collections::HashSet;

use log::{trace, warn};

use super::graph::ObjectGraph;
use crate::error::{CosError, CosResult};
use crate::pdf::{Reference, Value};

/// Leaf pages of the catalog's page tree in document order
pub(crate) fn collect_pages(graph: &mut ObjectGraph) -> CosResult<Vec<Reference>> {
    let root = graph
        .trailer()
        .get_reference("Root")
        .ok_or_else(|| CosError::MissingDictionaryEntry("Root".into()))?;
    let catalog = graph.dict(root.id)?.ok_or(CosError::ObjectNotFound(root))?;
    let pages = catalog
        .get_reference("Pages")
        .ok_or_else(|| CosError::MissingDictionaryEntry("Pages".into()))?;

    let mut visited = HashSet::new();
    let mut out = Vec::new();
    walk(graph, pages, &mut visited, &mut out)?;
    trace!("Page tree holds {} pages", out.len());
    Ok(out)
}

fn walk(
    graph: &mut ObjectGraph,
    node: Reference,
    visited: &mut HashSet<u32>,
    out: &mut Vec<Reference>,
) -> CosResult<()> {
    if !visited.insert(node.id) {
        warn!("Page tree visits {} twice", node);
        return Ok(());
    }
    let Some(dict) = graph.dict(node.id)? else {
        warn!("Page tree node {} is unreadable", node);
        return Ok(());
    };

    let kids = match dict.get("Kids") {
        Some(kids) if dict.get_name("Type") != Some("Page") => graph.resolve_array(kids)?.unwrap_or_default(),
        _ => {
            out.push(node);
            return Ok(());
        }
    };
    for kid in kids {
        match kid {
            Value::Reference(kid) => walk(graph, kid, visited, out)?,
            other => warn!("Ignoring non-reference kid {:?} of {}", other, node),
        }
    }
    Ok(())
}

/// References listed in a page's `/Annots`
pub(crate) fn page_annotations(graph: &mut ObjectGraph, page: u32) -> CosResult<Vec<Reference>> {
    let Some(dict) = graph.dict(page)? else {
        return Ok(Vec::new());
    };
    let Some(annots) = dict.get("Annots") else {
        return Ok(Vec::new());
    };
    Ok(graph
        .resolve_array(annots)?
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_reference)
        .collect())
}

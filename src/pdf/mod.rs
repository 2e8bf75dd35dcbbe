//! COS object model: values, object variants, filters and cross-references

pub mod string;
pub mod filter;
mod reference;
mod dict;
pub(crate) mod props;
mod object;
mod stream;
mod object_stream;
mod annotation;
mod xref;

pub use reference::Reference;
pub use dict::{format_number, frame_stream, DictWriter, Dictionary, Value};
pub use props::{FieldKey, PropReader};
pub use object::{
    write_indirect, ChangeObserver, DictObject, ObjectCore, ParserInfo, PdfObject, RawObject, Serializable,
};
pub use stream::PdfStream;
pub use object_stream::ObjectStream;
pub use annotation::AnnotationDict;
pub use xref::{CrossRefTable, XrefEntry, XrefLocation};
pub use string::PdfDate;

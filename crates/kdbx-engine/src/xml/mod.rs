//! The XML body: element names, a small DOM, and the document codec

pub(crate) mod dom;
pub(crate) mod reader;
pub(crate) mod tags;
pub(crate) mod writer;

//! Minimal element tree built on quick-xml events
//!
//! Children keep document order, which the body decoder relies on to consume
//! the inner keystream in the same order the writer produced it.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated text and CDATA directly inside this element
    pub text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Error::MalformedDocument("Invalid UTF-8 in document".to_string()))
}

fn open(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(utf8(start.name().as_ref())?);
    for attr in start.attributes() {
        let attr = attr?;
        element
            .attributes
            .push((utf8(attr.key.as_ref())?, attr.unescape_value()?.into_owned()));
    }
    Ok(element)
}

/// Parse a complete document and return its root element
pub fn parse(data: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(data);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let mut attach = |stack: &mut Vec<Element>, element: Element| -> Result<()> {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None if root.is_none() => root = Some(element),
            None => {
                return Err(Error::MalformedDocument(
                    "More than one root element".to_string(),
                ))
            }
        }
        Ok(())
    };

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(open(&start)?),
            Event::Empty(start) => {
                let element = open(&start)?;
                attach(&mut stack, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::MalformedDocument("Unbalanced end tag".to_string()))?;
                attach(&mut stack, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&utf8(&data.into_inner())?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::MalformedDocument(
            "Unexpected end of document".to_string(),
        ));
    }
    root.ok_or_else(|| Error::MalformedDocument("Empty document".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let doc = br#"<?xml version="1.0" encoding="utf-8" standalone="yes"?>
<Root a="1"><Item>one</Item><Item Protected="True">t&amp;wo</Item><Empty/></Root>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "Root");
        assert_eq!(root.attr("a"), Some("1"));
        let items: Vec<&Element> = root.children_named("Item").collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].text, "t&wo");
        assert_eq!(items[1].attr("Protected"), Some("True"));
        assert!(root.child("Empty").is_some());
    }

    #[test]
    fn test_whitespace_is_preserved() {
        let root = parse(b"<V>  padded  </V>").unwrap();
        assert_eq!(root.text, "  padded  ");
    }

    #[test]
    fn test_cdata() {
        let root = parse(b"<V><![CDATA[<raw>]]></V>").unwrap();
        assert_eq!(root.text, "<raw>");
    }

    #[test]
    fn test_unclosed_is_error() {
        assert!(matches!(
            parse(b"<Root><Child></Child>"),
            Err(Error::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_mismatched_end_is_error() {
        assert!(parse(b"<Root></Other>").is_err());
    }

    #[test]
    fn test_empty_document() {
        assert!(matches!(parse(b""), Err(Error::MalformedDocument(_))));
    }
}

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML parse error: {0}")]
    XmlParse(String),
    #[error("OPML document contains no feeds")]
    Empty,
}

/// Collects the `xmlUrl` of every `<outline>`, at any nesting depth.
///
/// Category outlines without `xmlUrl` are traversed but contribute nothing.
/// A well-formed document with no feed outlines is an error.
pub fn parse_opml(content: &str) -> Result<Vec<String>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut urls = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                saw_root = true;
                if e.name().as_ref() == b"outline" {
                    if let Some(url) = xml_url(&e, &reader)? {
                        urls.push(url);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if !saw_root {
        return Err(OpmlError::XmlParse("no elements found".to_string()));
    }
    if urls.is_empty() {
        return Err(OpmlError::Empty);
    }
    Ok(urls)
}

fn xml_url(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<String>, OpmlError> {
    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!("Skipping malformed OPML attribute: {}", err);
                continue;
            }
        };
        if attr.key.as_ref() == b"xmlUrl" {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|err| OpmlError::XmlParse(err.to_string()))?;
            let value = value.trim();
            if value.is_empty() {
                return Ok(None);
            }
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

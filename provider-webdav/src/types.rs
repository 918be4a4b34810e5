//! WebDAV multistatus parsing
//!
//! Turns a `207 Multi-Status` body into one [`PropResponse`] per `<d:response>`.
//! Only properties from a `propstat` with status 200 are kept; Nextcloud
//! reports unknown properties in a separate 404 `propstat`.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

use crate::error::{Result, WebDavError};

/// Properties of one resource in a multistatus response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropResponse {
    /// Percent-encoded href as sent by the server
    pub href: String,
    /// Local property name (namespace prefix dropped) to text content
    pub props: BTreeMap<String, String>,
    /// `<d:resourcetype>` contained `<d:collection/>`
    pub is_collection: bool,
}

impl PropResponse {
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.props
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// `Some(is_collection)` when the server reported a resource type
    pub fn resource_type(&self) -> Option<bool> {
        self.props
            .contains_key("resourcetype")
            .then_some(self.is_collection)
    }

    /// Compact rendering for diagnostics
    pub fn describe(&self) -> String {
        format!(
            "href={} collection={} props={:?}",
            self.href, self.is_collection, self.props
        )
    }
}

#[derive(Default)]
struct PropStat {
    props: BTreeMap<String, String>,
    is_collection: bool,
    status: String,
}

impl PropStat {
    fn is_ok(&self) -> bool {
        self.status.is_empty() || self.status.split_whitespace().nth(1) == Some("200")
    }
}

/// Parse a multistatus document
pub fn parse_multistatus(xml: &str) -> Result<Vec<PropResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut current: Option<PropResponse> = None;
    let mut propstat = PropStat::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| WebDavError::Parse(e.to_string()))?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "response" => current = Some(PropResponse::default()),
                    "propstat" => propstat = PropStat::default(),
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match stack.last().map(String::as_str) {
                    Some("resourcetype") if name == "collection" => propstat.is_collection = true,
                    Some("prop") => {
                        propstat.props.insert(name, String::new());
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|e| WebDavError::Parse(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                let parent = stack.last().map(String::as_str);

                match (name.as_str(), parent) {
                    ("href", Some("response")) => {
                        if let Some(response) = current.as_mut() {
                            response.href = text.trim().to_string();
                        }
                    }
                    ("status", Some("propstat")) => propstat.status = text.trim().to_string(),
                    ("propstat", _) => {
                        let finished = std::mem::take(&mut propstat);
                        if let (true, Some(response)) = (finished.is_ok(), current.as_mut()) {
                            response.props.extend(finished.props);
                            response.is_collection |= finished.is_collection;
                        }
                    }
                    ("response", _) => {
                        if let Some(response) = current.take() {
                            responses.push(response);
                        }
                    }
                    (_, Some("prop")) => {
                        propstat.props.insert(name, text.trim().to_string());
                    }
                    _ => {}
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(responses)
}

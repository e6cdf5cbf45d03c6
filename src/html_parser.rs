use anyhow::{Context, Result};
use html5ever::serialize::{serialize, SerializeOpts};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};

pub fn parse_html(html: &str) -> RcDom {
    parse_document(RcDom::default(), ParseOpts::default()).one(html)
}

pub fn serialize_html(dom: &RcDom) -> Result<String> {
    let mut buf: Vec<u8> = Vec::new();
    let document: SerializableHandle = dom.document.clone().into();
    serialize(&mut buf, &document, SerializeOpts::default())
        .context("Failed to serialize document")?;
    String::from_utf8(buf).context("Serialized document is not valid UTF-8")
}

pub fn is_element(node: &Handle, tag: &str) -> bool {
    match node.data {
        NodeData::Element { ref name, .. } => name.local.as_ref().eq_ignore_ascii_case(tag),
        _ => false,
    }
}

pub fn get_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match node.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| attr.name.local.as_ref() == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// Overwrites an attribute the element already carries. Returns false if it has none.
pub fn set_attr(node: &Handle, attr_name: &str, value: &str) -> bool {
    let NodeData::Element { ref attrs, .. } = node.data else {
        return false;
    };

    let mut attrs = attrs.borrow_mut();
    match attrs.iter_mut().find(|attr| attr.name.local.as_ref() == attr_name) {
        Some(attr) => {
            attr.value = StrTendril::from(value);
            true
        }
        None => false,
    }
}

pub fn remove_attr(node: &Handle, attr_name: &str) -> bool {
    let NodeData::Element { ref attrs, .. } = node.data else {
        return false;
    };

    let mut attrs = attrs.borrow_mut();
    let before = attrs.len();
    attrs.retain(|attr| attr.name.local.as_ref() != attr_name);
    attrs.len() != before
}

/// Space-separated tokens of an attribute, lowercased (`rel="Shortcut Icon"`).
pub fn attr_tokens(node: &Handle, attr_name: &str) -> Vec<String> {
    get_attr(node, attr_name)
        .map(|value| {
            value
                .split_ascii_whitespace()
                .map(|token| token.to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

/// Every element under `root` in document order.
pub fn elements(root: &Handle) -> Vec<Handle> {
    let mut found = Vec::new();
    collect_elements(root, &mut found);
    found
}

fn collect_elements(node: &Handle, found: &mut Vec<Handle>) {
    for child in node.children.borrow().iter() {
        if matches!(child.data, NodeData::Element { .. }) {
            found.push(child.clone());
        }
        collect_elements(child, found);
    }
}

pub fn elements_named(root: &Handle, tag: &str) -> Vec<Handle> {
    elements(root)
        .into_iter()
        .filter(|node| is_element(node, tag))
        .collect()
}

/// Detaches every `tag` element under `root`. Returns how many were removed.
pub fn remove_elements(root: &Handle, tag: &str) -> usize {
    let mut removed = 0;
    let mut children = root.children.borrow_mut();
    children.retain(|child| {
        let keep = !is_element(child, tag);
        if !keep {
            child.parent.set(None);
            removed += 1;
        }
        keep
    });

    for child in children.iter() {
        removed += remove_elements(child, tag);
    }
    removed
}

pub fn text_content(node: &Handle) -> String {
    node.children
        .borrow()
        .iter()
        .filter_map(|child| match child.data {
            NodeData::Text { ref contents } => Some(contents.borrow().to_string()),
            _ => None,
        })
        .collect()
}

/// Replaces the text children of `node` with a single text node holding `text`.
pub fn set_text_content(node: &Handle, text: &str) {
    let mut children = node.children.borrow_mut();
    let mut written = false;
    children.retain(|child| match child.data {
        NodeData::Text { ref contents } => {
            if written {
                return false;
            }
            *contents.borrow_mut() = StrTendril::from(text);
            written = true;
            true
        }
        _ => true,
    });
}

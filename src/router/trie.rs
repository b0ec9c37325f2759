//! Trie representation used once a router's route population crosses its
//! configured threshold.

use super::{Handler, Method, Segment};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct TrieNode {
    literal: HashMap<String, TrieNode>,
    param: Option<(String, Box<TrieNode>)>,
    wildcard: Option<(String, Box<TrieNode>)>,
    handlers: HashMap<Method, Arc<dyn Handler>>,
    any_handler: Option<Arc<dyn Handler>>,
}

impl TrieNode {
    pub fn new() -> Self {
        TrieNode::default()
    }

    pub fn insert(&mut self, segments: &[Segment], method: Method, handler: Arc<dyn Handler>) {
        match segments.split_first() {
            None => {
                if method == Method::Any {
                    self.any_handler = Some(handler);
                } else {
                    self.handlers.insert(method, handler);
                }
            }
            Some((Segment::Literal(text), rest)) => {
                let child = self.literal.entry(text.clone()).or_default();
                child.insert(rest, method, handler);
            }
            Some((Segment::Param(name), rest)) => {
                let child = self
                    .param
                    .get_or_insert_with(|| (name.clone(), Box::new(TrieNode::new())));
                child.1.insert(rest, method, handler);
            }
            Some((Segment::Wildcard, _rest)) => {
                self.wildcard = Some((String::new(), Box::new(TrieNode::new())));
                if let Some((_, node)) = self.wildcard.as_mut() {
                    if method == Method::Any {
                        node.any_handler = Some(handler);
                    } else {
                        node.handlers.insert(method, handler);
                    }
                }
            }
        }
    }

    /// Tie-break order at each level is literal > parameter > wildcard; at
    /// a terminal node, a method-specific handler beats the ANY handler.
    pub fn lookup(
        &self,
        path_segments: &[&str],
        method: Method,
        params: &mut Vec<(String, String)>,
    ) -> Option<Arc<dyn Handler>> {
        if let Some((first, rest)) = path_segments.split_first() {
            if let Some(child) = self.literal.get(*first) {
                if let Some(h) = child.lookup(rest, method, params) {
                    return Some(h);
                }
            }
            if let Some((name, child)) = &self.param {
                let mark = params.len();
                params.push((name.clone(), percent_decode(first)));
                if let Some(h) = child.lookup(rest, method, params) {
                    return Some(h);
                }
                params.truncate(mark);
            }
            if let Some((_, child)) = &self.wildcard {
                let mark = params.len();
                let _ = mark;
                if let Some(h) = child.terminal_handler(method) {
                    return Some(h);
                }
            }
            None
        } else {
            self.terminal_handler(method)
        }
    }

    fn terminal_handler(&self, method: Method) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(&method)
            .cloned()
            .or_else(|| self.any_handler.clone())
    }
}

pub fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_encoded_space() {
        assert_eq!(percent_decode("my%20slug"), "my slug");
    }

    #[test]
    fn percent_decode_leaves_invalid_escapes_alone() {
        assert_eq!(percent_decode("100%"), "100%");
    }
}

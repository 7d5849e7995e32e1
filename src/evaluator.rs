//! Expression evaluation adapter
//!
//! [`Evaluator`] sits between the Schematron interpreter and the XPath
//! engine. On top of plain evaluation it recognises one syntactic form, an
//! expression that *starts* with `document('path')` or `document("path")`.
//! That document is loaded from the working directory and the rest of the
//! expression is evaluated against it, ignoring the caller's context node.
//! `document()` anywhere else in an expression is left to the XPath engine.
//!
//! An evaluator lives for one validation call. Documents it loads are kept
//! until it is dropped, so their nodes can be bound to variables and reused
//! by later expressions of the same call.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::error::{Result, ValidationError};
use crate::libxml2::{LibXml2Wrapper, Node, ParseOptions, XmlDocument};
use crate::resolver::ResourceResolver;
use crate::schematron::ValidationOptions;
use crate::xpath::{self, Item, Namespaces, Sequence};

/// Cached regex for a leading `document('…')` call
static DOCUMENT_CALL_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_document_call_regex() -> &'static Regex {
    DOCUMENT_CALL_REGEX.get_or_init(|| {
        Regex::new(r#"^\s*document\s*\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#)
            .expect("Failed to compile document() regex")
    })
}

/// Split a leading `document('path')` call off `expression`
///
/// Returns the quoted path and the remaining expression, or `None` when the
/// expression does not start with such a call.
pub fn split_document_call(expression: &str) -> Option<(&str, &str)> {
    let captures = get_document_call_regex().captures(expression)?;
    let path = captures.get(1).or_else(|| captures.get(2))?.as_str();
    let end = captures.get(0)?.end();
    Some((path, &expression[end..]))
}

/// Evaluates expressions for one validation call
pub struct Evaluator {
    wrapper: LibXml2Wrapper,
    working_directory: PathBuf,
    resolver: ResourceResolver,
    parse_options: ParseOptions,
    // Resolved location → document loaded through `document()`
    loaded: RefCell<Vec<(String, XmlDocument)>>,
}

impl Evaluator {
    pub fn new(options: &ValidationOptions) -> Self {
        Self {
            wrapper: LibXml2Wrapper::new(),
            working_directory: options.working_directory.clone(),
            resolver: options.resolver.clone(),
            parse_options: ParseOptions {
                load_dtd: options.load_dtd,
            },
            loaded: RefCell::new(Vec::new()),
        }
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    /// Parse a document with this evaluator's resolver and parse options
    pub fn parse_document(&self, data: &[u8], base_url: Option<&str>) -> Result<XmlDocument> {
        self.wrapper
            .parse_document(data, base_url, &self.parse_options, &self.resolver)
    }

    /// Evaluate `expression` against `document`
    ///
    /// With a `context` node the expression sees it as `.`; without one it is
    /// evaluated from the document node. `variables` must already be
    /// evaluated.
    pub fn evaluate<'d>(
        &'d self,
        document: &'d XmlDocument,
        context: Option<Node<'d>>,
        expression: &str,
        namespaces: &Namespaces,
        variables: &[(String, Sequence<'d>)],
    ) -> Result<Sequence<'d>> {
        if let Some((path, remainder)) = split_document_call(expression) {
            let loaded = self.load_document(path)?;
            let remainder = remainder.trim();
            let remainder = if remainder.is_empty() { "/" } else { remainder };
            trace!(path, remainder, "evaluating against external document");
            return xpath::evaluate(loaded, remainder, namespaces, variables);
        }

        let node = context.unwrap_or_else(|| document.document_node());
        xpath::evaluate(node, expression, namespaces, variables)
    }

    /// Evaluate `expression` once per node selected by `context_expression`
    ///
    /// `context_expression` defaults to `.` (the document node). Empty
    /// results are dropped, the others are returned in context order.
    pub fn select<'d>(
        &'d self,
        document: &'d XmlDocument,
        expression: &str,
        context_expression: Option<&str>,
        namespaces: &Namespaces,
    ) -> Result<Vec<Sequence<'d>>> {
        let context_expression = context_expression.unwrap_or(".");
        let contexts = self.evaluate(document, None, context_expression, namespaces, &[])?;

        let mut results = Vec::new();
        for item in contexts.iter() {
            let Item::Node(node) = item else {
                return Err(ValidationError::expression(
                    context_expression,
                    format!("context selected a {} instead of a node", item.type_name()),
                ));
            };
            let result = self.evaluate(document, Some(*node), expression, namespaces, &[])?;
            if !result.is_empty() {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Load (or reuse) the document a `document()` path points at
    ///
    /// The path is taken relative to the working directory and then passed
    /// through the resource resolver.
    pub fn load_document(&self, path: &str) -> Result<Node<'_>> {
        let joined = self.working_directory.join(path);
        let joined = joined.to_string_lossy();
        let location = self.resolver.resolve_joined(&joined);

        if let Some(ptr) = self
            .loaded
            .borrow()
            .iter()
            .find(|(loaded, _)| *loaded == location)
            .map(|(_, document)| document.as_node_ptr())
        {
            trace!(location = %location, "reusing loaded document");
            // Safety: arena documents are only dropped with the evaluator.
            return Ok(unsafe { Node::from_raw(ptr) });
        }

        let data = self.resolver.open(&joined)?;
        let document = self.parse_document(&data, Some(&location))?;
        let ptr = document.as_node_ptr();
        debug!(path, location = %location, "loaded external document");

        self.loaded.borrow_mut().push((location, document));
        // Safety: the tree is heap-allocated by libxml2 and owned by the
        // arena until the evaluator is dropped; moving `XmlDocument` into the
        // arena does not move the tree.
        Ok(unsafe { Node::from_raw(ptr) })
    }

    /// Number of documents loaded through `document()` so far
    pub fn loaded_documents(&self) -> usize {
        self.loaded.borrow().len()
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("working_directory", &self.working_directory)
            .field("resolver", &self.resolver)
            .field("parse_options", &self.parse_options)
            .field("loaded", &self.loaded_documents())
            .finish()
    }
}

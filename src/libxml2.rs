//! LibXML2 FFI Wrapper Module
//!
//! This module provides a safe wrapper around the libxml2 calls the Schematron
//! interpreter needs from its two external collaborators:
//!
//! - **Tree parser**: `xmlReadMemory` produces an in-memory tree with source
//!   line metadata (`xmlGetLineNo`). External references met while parsing
//!   (DTDs) go through a process-wide entity loader that consults the
//!   [`ResourceResolver`] active on the calling thread.
//! - **Expression evaluator**: libxml2 XPath, wrapped in [`crate::xpath`].
//!
//! ## Why direct FFI
//!
//! The Rust XML ecosystem has good parsers (roxmltree, quick-xml) but no
//! mature XPath evaluator that works over a tree with source line numbers and
//! pluggable entity resolution. libxml2 offers all three, and direct FFI keeps
//! full control over memory management and error capture:
//!
//! - ✅ **RAII documents**: [`XmlDocument`] frees its tree on drop; [`Node`]
//!   handles borrow the document they belong to
//! - ✅ **Structured errors**: parser and XPath errors are captured per call
//!   instead of being printed to stderr
//! - ✅ **Per-thread resolution**: the entity loader is installed once, the
//!   candidate list is scoped to the parse running on the current thread
//!
//! ## Thread Safety Strategy
//!
//! After `xmlInitParser()`, libxml2 parses and evaluates independent
//! documents on different threads without locking. Error handlers are
//! per-thread globals in threaded builds. Nothing in this module shares a
//! document between threads: [`XmlDocument`] is `Send` but not `Sync`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{Once, OnceLock};

use libc::{c_char, c_int, c_long, c_uchar, c_void};
use tracing::{debug, trace};

use crate::error::{LibXml2Error, Result, ValidationError};
use crate::resolver::{ResourceResolver, local_path};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are NOT thread-safe, so they run
/// exactly once behind `std::sync::Once`. The resolving entity loader is
/// installed in the same step.
static LIBXML2_INIT: Once = Once::new();

/// libxml2's own entity loader, captured before ours is installed
static DEFAULT_ENTITY_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

/// Pseudo base URL used for documents parsed from memory without a location
pub const MEMORY_DOCUMENT: &str = "<memory>";

// Parser options (xmlParserOption)
pub const XML_PARSE_DTDLOAD: c_int = 1 << 2;
pub const XML_PARSE_DTDATTR: c_int = 1 << 3;
pub const XML_PARSE_NONET: c_int = 1 << 11;
pub const XML_PARSE_BIG_LINES: c_int = 1 << 22;

// Node types (xmlElementType)
pub const XML_ELEMENT_NODE: c_int = 1;
pub const XML_ATTRIBUTE_NODE: c_int = 2;
pub const XML_TEXT_NODE: c_int = 3;
pub const XML_CDATA_SECTION_NODE: c_int = 4;
pub const XML_PI_NODE: c_int = 7;
pub const XML_COMMENT_NODE: c_int = 8;
pub const XML_DOCUMENT_NODE: c_int = 9;
pub const XML_NAMESPACE_DECL: c_int = 18;

/// Opaque libxml2 document (`xmlDoc`)
///
/// Its leading fields share the `xmlNode` layout, so a document pointer can be
/// viewed as the document node.
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInput {
    _private: [u8; 0],
}

/// Leading, ABI-stable fields of `xmlNode`
///
/// `xmlAttr` and `xmlDoc` share this prefix. Only fields up to `ns` are
/// declared; the struct is never allocated on the Rust side.
#[repr(C)]
pub struct XmlNode {
    pub _private: *mut c_void,
    pub node_type: c_int,
    pub name: *const c_uchar,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
}

/// Leading fields of `xmlNs`
///
/// `node_type` lines up with [`XmlNode::node_type`], which is how namespace
/// nodes in XPath node-sets are told apart.
#[repr(C)]
pub struct XmlNs {
    pub next: *mut XmlNs,
    pub node_type: c_int,
    pub href: *const c_uchar,
    pub prefix: *const c_uchar,
}

#[allow(non_camel_case_types)]
#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        context: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
#[allow(non_upper_case_globals)]
unsafe extern "C" {
    pub static xmlFree: XmlFreeFunc;

    pub fn xmlInitParser();

    // Document parsing
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Tree access
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlGetLineNo(node: *const XmlNode) -> c_long;
    pub fn xmlGetNoNsProp(node: *const XmlNode, name: *const c_uchar) -> *mut c_uchar;
    pub fn xmlNodeGetContent(node: *const XmlNode) -> *mut c_uchar;

    // Error handling
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    // External resources
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
}

/// Copy a libxml2 string without taking ownership
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn borrow_xml_string(ptr: *const c_uchar) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let c_str = unsafe { CStr::from_ptr(ptr.cast::<c_char>()) };
    Some(c_str.to_string_lossy().into_owned())
}

/// Copy a libxml2-allocated string and release it with `xmlFree`
///
/// # Safety
///
/// `ptr` must be null or a string allocated by libxml2 that the caller owns.
pub(crate) unsafe fn take_xml_string(ptr: *mut c_uchar) -> Option<String> {
    let value = unsafe { borrow_xml_string(ptr) };
    if !ptr.is_null() {
        unsafe { free_xml(ptr.cast()) };
    }
    value
}

/// Release memory allocated by libxml2
///
/// # Safety
///
/// `ptr` must have been allocated by libxml2's allocator and not freed yet.
pub(crate) unsafe fn free_xml(ptr: *mut c_void) {
    if let Some(free) = unsafe { xmlFree } {
        unsafe { free(ptr) };
    }
}

pub(crate) fn to_c_string(value: &str) -> std::result::Result<CString, LibXml2Error> {
    CString::new(value).map_err(|_| LibXml2Error::InteriorNul {
        details: value.chars().take(64).collect(),
    })
}

/// Callback for libxml2 to report errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let errors = unsafe { &mut *(user_data as *mut Vec<String>) };

    let msg_ptr = unsafe { (*error).message };
    if !msg_ptr.is_null() {
        let c_str = unsafe { CStr::from_ptr(msg_ptr) };
        let line = unsafe { (*error).line };
        let message = c_str.to_string_lossy();
        let message = message.trim();
        if line > 0 {
            errors.push(format!("line {}: {}", line, message));
        } else {
            errors.push(message.to_string());
        }
    }
}

/// Captures libxml2 errors raised on the current thread
///
/// Installs the structured error handler on creation and removes it on drop.
/// Captures do not nest: only one may be alive per thread at a time.
pub(crate) struct StructuredErrors {
    messages: Box<Vec<String>>,
}

impl StructuredErrors {
    pub(crate) fn capture() -> Self {
        let mut messages = Box::new(Vec::new());
        let messages_ptr = &mut *messages as *mut Vec<String> as *mut c_void;
        unsafe { xmlSetStructuredErrorFunc(messages_ptr, Some(structured_error_callback)) };
        Self { messages }
    }

    /// Stop capturing and return what was reported
    pub(crate) fn finish(mut self) -> Vec<String> {
        unsafe { xmlSetStructuredErrorFunc(ptr::null_mut(), None) };
        std::mem::take(&mut *self.messages)
    }
}

impl Drop for StructuredErrors {
    fn drop(&mut self) {
        unsafe { xmlSetStructuredErrorFunc(ptr::null_mut(), None) };
    }
}

struct ResolverFrame {
    resolver: ResourceResolver,
    missing: Vec<String>,
}

thread_local! {
    static ACTIVE_RESOLVER: RefCell<Option<ResolverFrame>> = const { RefCell::new(None) };
}

/// Makes a resolver visible to the entity loader for one parse
///
/// The frame that was active before is restored when the scope ends.
struct ResolverScope {
    // `None` once restored
    previous: Option<Option<ResolverFrame>>,
}

impl ResolverScope {
    fn enter(resolver: &ResourceResolver) -> Self {
        let frame = ResolverFrame {
            resolver: resolver.clone(),
            missing: Vec::new(),
        };
        let previous = ACTIVE_RESOLVER.with(|slot| slot.borrow_mut().replace(frame));
        Self {
            previous: Some(previous),
        }
    }

    /// References that could not be found while the scope was active
    fn finish(mut self) -> Vec<String> {
        self.restore()
    }

    fn restore(&mut self) -> Vec<String> {
        let Some(previous) = self.previous.take() else {
            return Vec::new();
        };
        ACTIVE_RESOLVER.with(|slot| {
            std::mem::replace(&mut *slot.borrow_mut(), previous)
                .map(|frame| frame.missing)
                .unwrap_or_default()
        })
    }
}

impl Drop for ResolverScope {
    fn drop(&mut self) {
        self.restore();
    }
}

enum LoaderDecision {
    Default,
    Redirect(String),
    Missing,
}

/// Entity loader that routes references through the active resolver
unsafe extern "C" fn resolving_entity_loader(
    url: *const c_char,
    id: *const c_char,
    context: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let Some(default_loader) = DEFAULT_ENTITY_LOADER.get().copied().flatten() else {
        return ptr::null_mut();
    };
    if url.is_null() {
        return unsafe { default_loader(url, id, context) };
    }

    let requested = unsafe { CStr::from_ptr(url) }
        .to_string_lossy()
        .into_owned();

    let decision = ACTIVE_RESOLVER.with(|slot| {
        let mut slot = slot.borrow_mut();
        let Some(frame) = slot.as_mut() else {
            return LoaderDecision::Default;
        };
        // `requested` arrives joined to the referring document's base URL.
        let resolved = frame.resolver.resolve_joined(&requested);
        match local_path(&resolved) {
            Some(path) if !path.exists() => {
                frame.missing.push(requested.clone());
                LoaderDecision::Missing
            }
            _ => LoaderDecision::Redirect(resolved),
        }
    });

    match decision {
        LoaderDecision::Default => unsafe { default_loader(url, id, context) },
        LoaderDecision::Missing => {
            debug!(reference = %requested, "external resource not found");
            ptr::null_mut()
        }
        LoaderDecision::Redirect(resolved) => match CString::new(resolved) {
            Ok(c_resolved) => unsafe { default_loader(c_resolved.as_ptr(), id, context) },
            Err(_) => ptr::null_mut(),
        },
    }
}

/// Options for turning bytes into a tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Load external DTDs (and apply their default attributes)
    pub load_dtd: bool,
}

impl ParseOptions {
    pub fn flags(&self) -> c_int {
        let mut flags = XML_PARSE_NONET | XML_PARSE_BIG_LINES;
        if self.load_dtd {
            flags |= XML_PARSE_DTDLOAD | XML_PARSE_DTDATTR;
        }
        flags
    }
}

/// An owned libxml2 document tree
pub struct XmlDocument {
    ptr: NonNull<XmlDoc>,
    name: String,
}

// Safety: the tree is exclusively owned by this value; libxml2 allows a
// document to be used from any single thread at a time.
unsafe impl Send for XmlDocument {}

impl XmlDocument {
    /// Name used in error messages (base URL or [`MEMORY_DOCUMENT`])
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The document node itself (what `/` selects)
    pub fn document_node(&self) -> Node<'_> {
        unsafe { Node::from_raw(self.ptr.as_ptr().cast::<XmlNode>()) }
    }

    /// The document element
    pub fn root(&self) -> Option<Node<'_>> {
        let root = unsafe { xmlDocGetRootElement(self.ptr.as_ptr()) };
        NonNull::new(root).map(|ptr| Node {
            ptr,
            _document: PhantomData,
        })
    }

    pub(crate) fn as_node_ptr(&self) -> *mut XmlNode {
        self.ptr.as_ptr().cast::<XmlNode>()
    }
}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("name", &self.name)
            .finish()
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        unsafe { xmlFreeDoc(self.ptr.as_ptr()) };
    }
}

/// Kind of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Attribute,
    Text,
    CData,
    ProcessingInstruction,
    Comment,
    Document,
    Other(i32),
}

impl NodeKind {
    fn from_raw(node_type: c_int) -> Self {
        match node_type {
            XML_ELEMENT_NODE => NodeKind::Element,
            XML_ATTRIBUTE_NODE => NodeKind::Attribute,
            XML_TEXT_NODE => NodeKind::Text,
            XML_CDATA_SECTION_NODE => NodeKind::CData,
            XML_PI_NODE => NodeKind::ProcessingInstruction,
            XML_COMMENT_NODE => NodeKind::Comment,
            XML_DOCUMENT_NODE => NodeKind::Document,
            other => NodeKind::Other(other),
        }
    }

    fn has_own_line(&self) -> bool {
        matches!(
            self,
            NodeKind::Element
                | NodeKind::Text
                | NodeKind::CData
                | NodeKind::ProcessingInstruction
                | NodeKind::Comment
        )
    }
}

/// A node reference borrowed from a live document
#[derive(Clone, Copy)]
pub struct Node<'d> {
    ptr: NonNull<XmlNode>,
    _document: PhantomData<&'d XmlDocument>,
}

impl<'d> Node<'d> {
    /// Wrap a raw node pointer
    ///
    /// # Safety
    ///
    /// `ptr` must be a non-null node (not a namespace declaration) of a
    /// document that stays alive for `'d`.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlNode) -> Self {
        Node {
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            _document: PhantomData,
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlNode {
        self.ptr.as_ptr()
    }

    fn raw(&self) -> &XmlNode {
        unsafe { self.ptr.as_ref() }
    }

    pub(crate) fn document_ptr(&self) -> *mut XmlDoc {
        match self.kind() {
            NodeKind::Document => self.ptr.as_ptr().cast::<XmlDoc>(),
            _ => self.raw().doc,
        }
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::from_raw(self.raw().node_type)
    }

    pub fn is_element(&self) -> bool {
        self.kind() == NodeKind::Element
    }

    /// Local name of elements, attributes and processing instructions
    pub fn local_name(&self) -> Option<String> {
        match self.kind() {
            NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction => unsafe {
                borrow_xml_string(self.raw().name)
            },
            _ => None,
        }
    }

    /// Prefixed name as written in the source (`prefix:local`)
    pub fn qualified_name(&self) -> Option<String> {
        let local = self.local_name()?;
        let prefix = self.namespace_prefix();
        Some(match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
            _ => local,
        })
    }

    /// Namespace URI of an element or attribute, if any
    pub fn namespace_uri(&self) -> Option<String> {
        let ns = self.namespace()?;
        unsafe { borrow_xml_string(ns.href) }
    }

    fn namespace_prefix(&self) -> Option<String> {
        let ns = self.namespace()?;
        unsafe { borrow_xml_string(ns.prefix) }
    }

    fn namespace(&self) -> Option<&XmlNs> {
        match self.kind() {
            NodeKind::Element | NodeKind::Attribute => unsafe { self.raw().ns.as_ref() },
            _ => None,
        }
    }

    /// Value of an attribute in no namespace
    pub fn attribute(&self, name: &str) -> Option<String> {
        if !self.is_element() {
            return None;
        }
        let c_name = CString::new(name).ok()?;
        unsafe { take_xml_string(xmlGetNoNsProp(self.as_ptr(), c_name.as_ptr().cast())) }
    }

    /// XPath string value: concatenated text of all descendants
    pub fn text_content(&self) -> String {
        unsafe { take_xml_string(xmlNodeGetContent(self.as_ptr())) }.unwrap_or_default()
    }

    pub fn parent(&self) -> Option<Node<'d>> {
        if self.kind() == NodeKind::Document {
            return None;
        }
        NonNull::new(self.raw().parent).map(|ptr| Node {
            ptr,
            _document: PhantomData,
        })
    }

    /// All child nodes in document order
    pub fn children(&self) -> Children<'d> {
        let first = match self.kind() {
            NodeKind::Element | NodeKind::Document => self.raw().children,
            _ => ptr::null_mut(),
        };
        Children {
            next: NonNull::new(first),
            _document: PhantomData,
        }
    }

    /// Element children in document order
    pub fn element_children(&self) -> impl Iterator<Item = Node<'d>> + use<'d> {
        self.children().filter(Node::is_element)
    }

    fn own_line(&self) -> Option<u32> {
        if !self.kind().has_own_line() {
            return None;
        }
        let line = unsafe { xmlGetLineNo(self.as_ptr()) };
        u32::try_from(line).ok().filter(|line| *line > 0)
    }

    /// Source line of this node
    ///
    /// Nodes without a line of their own report the nearest one: the document
    /// node reports its document element, attributes their owner element.
    pub fn line(&self) -> Option<u32> {
        let mut current = Some(*self);
        while let Some(node) = current {
            if node.kind() == NodeKind::Document {
                let root = unsafe { xmlDocGetRootElement(node.document_ptr()) };
                return NonNull::new(root).and_then(|ptr| {
                    Node::<'d> {
                        ptr,
                        _document: PhantomData,
                    }
                    .own_line()
                });
            }
            if let Some(line) = node.own_line() {
                return Some(line);
            }
            current = node.parent();
        }
        None
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for Node<'_> {}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind())
            .field("name", &self.qualified_name())
            .field("line", &self.line())
            .finish()
    }
}

/// Iterator over the children of a node
pub struct Children<'d> {
    next: Option<NonNull<XmlNode>>,
    _document: PhantomData<&'d XmlDocument>,
}

impl<'d> Iterator for Children<'d> {
    type Item = Node<'d>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = NonNull::new(unsafe { current.as_ref() }.next);
        Some(Node {
            ptr: current,
            _document: PhantomData,
        })
    }
}

/// LibXML2 wrapper providing safe access to libxml2 functionality
///
/// Creating a wrapper initializes libxml2 (once per process) and installs the
/// resolving entity loader. The wrapper itself carries no state.
#[derive(Debug, Clone, Copy)]
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a new LibXML2 wrapper instance
    ///
    /// It's safe to call this multiple times - initialization happens exactly once.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            let default_loader = xmlGetExternalEntityLoader();
            let _ = DEFAULT_ENTITY_LOADER.set(default_loader);
            xmlSetExternalEntityLoader(Some(resolving_entity_loader));
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse a document from a memory buffer
    ///
    /// `base_url` is used to resolve relative external references and to name
    /// the document in error messages. External references are routed through
    /// `resolver`; one that cannot be found aborts the parse with
    /// [`ValidationError::ResourceNotFound`].
    pub fn parse_document(
        &self,
        data: &[u8],
        base_url: Option<&str>,
        options: &ParseOptions,
        resolver: &ResourceResolver,
    ) -> Result<XmlDocument> {
        let name = base_url.unwrap_or(MEMORY_DOCUMENT).to_string();
        let size = c_int::try_from(data.len())
            .map_err(|_| LibXml2Error::DocumentTooLarge { size: data.len() })?;
        let c_url = base_url.map(to_c_string).transpose()?;

        let scope = ResolverScope::enter(resolver);
        let errors = StructuredErrors::capture();

        let doc_ptr = unsafe {
            xmlReadMemory(
                data.as_ptr().cast::<c_char>(),
                size,
                c_url.as_ref().map_or(ptr::null(), |url| url.as_ptr()),
                ptr::null(),
                options.flags(),
            )
        };

        let messages = errors.finish();
        let missing = scope.finish();

        // Owned before any early return so the tree is always freed.
        let document = NonNull::new(doc_ptr).map(|ptr| XmlDocument {
            ptr,
            name: name.clone(),
        });

        if let Some(reference) = missing.into_iter().next() {
            return Err(ValidationError::ResourceNotFound { reference });
        }

        match document {
            Some(document) => {
                trace!(document = %name, warnings = messages.len(), "parsed document");
                Ok(document)
            }
            None => Err(ValidationError::MalformedDocument {
                document: name,
                details: if messages.is_empty() {
                    "parser returned no document".to_string()
                } else {
                    messages.join("; ")
                },
            }),
        }
    }

    /// Read and parse a document from the file system
    pub fn parse_file(
        &self,
        path: &Path,
        options: &ParseOptions,
        resolver: &ResourceResolver,
    ) -> Result<XmlDocument> {
        let data = std::fs::read(path)?;
        let base_url = path.to_string_lossy();
        self.parse_document(&data, Some(&base_url), options, resolver)
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

//! XPath evaluation over libxml2 trees
//!
//! Results are converted into owned [`Sequence`]s of [`Item`]s right after
//! evaluation, so no libxml2 result object outlives the call that produced it.
//! Node items keep borrowing the document they were selected from.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::fmt;
use std::ptr::{self, NonNull};

use libc::{c_int, c_uchar};
use tracing::trace;

use crate::error::{LibXml2Error, LibXml2Result, Result, ValidationError};
use crate::functions;
use crate::libxml2::{
    Node, StructuredErrors, XML_NAMESPACE_DECL, XmlDoc, XmlNode, XmlNs, borrow_xml_string,
    take_xml_string, to_c_string,
};

/// Prefix → namespace URI mapping used for every expression of a call
pub type Namespaces = BTreeMap<String, String>;

/// Already-evaluated variable values, in binding order
pub type Variables<'d> = Vec<(String, Sequence<'d>)>;

// xmlXPathObjectType
pub const XPATH_NODESET: c_int = 1;
pub const XPATH_BOOLEAN: c_int = 2;
pub const XPATH_NUMBER: c_int = 3;
pub const XPATH_STRING: c_int = 4;
pub const XPATH_XSLT_TREE: c_int = 9;

#[repr(C)]
pub struct XmlXPathContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathParserContext {
    _private: [u8; 0],
}

/// Leading fields of `xmlNodeSet`
#[repr(C)]
pub struct XmlNodeSet {
    pub node_nr: c_int,
    pub node_max: c_int,
    pub node_tab: *mut *mut XmlNode,
}

/// Leading fields of `xmlXPathObject`
#[repr(C)]
pub struct XmlXPathObject {
    pub object_type: c_int,
    pub nodesetval: *mut XmlNodeSet,
    pub boolval: c_int,
    pub floatval: f64,
    pub stringval: *mut c_uchar,
}

pub type XmlXPathFunction =
    Option<unsafe extern "C" fn(ctxt: *mut XmlXPathParserContext, nargs: c_int)>;

#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlXPathNewContext(doc: *mut XmlDoc) -> *mut XmlXPathContext;
    pub fn xmlXPathFreeContext(ctxt: *mut XmlXPathContext);
    pub fn xmlXPathRegisterNs(
        ctxt: *mut XmlXPathContext,
        prefix: *const c_uchar,
        ns_uri: *const c_uchar,
    ) -> c_int;
    pub fn xmlXPathRegisterVariable(
        ctxt: *mut XmlXPathContext,
        name: *const c_uchar,
        value: *mut XmlXPathObject,
    ) -> c_int;
    pub fn xmlXPathRegisterFunc(
        ctxt: *mut XmlXPathContext,
        name: *const c_uchar,
        f: XmlXPathFunction,
    ) -> c_int;
    pub fn xmlXPathRegisterFuncNS(
        ctxt: *mut XmlXPathContext,
        name: *const c_uchar,
        ns_uri: *const c_uchar,
        f: XmlXPathFunction,
    ) -> c_int;
    pub fn xmlXPathNodeEval(
        node: *mut XmlNode,
        expr: *const c_uchar,
        ctxt: *mut XmlXPathContext,
    ) -> *mut XmlXPathObject;
    pub fn xmlXPathFreeObject(obj: *mut XmlXPathObject);

    // Object construction
    pub fn xmlXPathNodeSetCreate(val: *mut XmlNode) -> *mut XmlNodeSet;
    pub fn xmlXPathNodeSetAdd(cur: *mut XmlNodeSet, val: *mut XmlNode) -> c_int;
    pub fn xmlXPathWrapNodeSet(val: *mut XmlNodeSet) -> *mut XmlXPathObject;
    pub fn xmlXPathNewFloat(val: f64) -> *mut XmlXPathObject;
    pub fn xmlXPathNewBoolean(val: c_int) -> *mut XmlXPathObject;
    pub fn xmlXPathNewString(val: *const c_uchar) -> *mut XmlXPathObject;

    // Casts
    pub fn xmlXPathCastToString(val: *mut XmlXPathObject) -> *mut c_uchar;
    pub fn xmlXPathCastToNumber(val: *mut XmlXPathObject) -> f64;
}

/// One item of an expression result
#[derive(Debug, Clone, PartialEq)]
pub enum Item<'d> {
    Node(Node<'d>),
    Text(String),
    Number(f64),
    Boolean(bool),
}

impl<'d> Item<'d> {
    /// XPath string value of the item
    pub fn string_value(&self) -> String {
        match self {
            Item::Node(node) => node.text_content(),
            Item::Text(text) => text.clone(),
            Item::Number(number) => format_number(*number),
            Item::Boolean(value) => value.to_string(),
        }
    }

    pub fn as_node(&self) -> Option<Node<'d>> {
        match self {
            Item::Node(node) => Some(*node),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Item::Node(_) => "node",
            Item::Text(_) => "string",
            Item::Number(_) => "number",
            Item::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for Item<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_value())
    }
}

/// Ordered result of one evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence<'d> {
    items: Vec<Item<'d>>,
}

impl<'d> Sequence<'d> {
    pub fn new(items: Vec<Item<'d>>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item<'d>> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&Item<'d>> {
        self.items.first()
    }

    pub fn items(&self) -> &[Item<'d>] {
        &self.items
    }

    /// Node items, in order
    pub fn nodes(&self) -> impl Iterator<Item = Node<'d>> + '_ {
        self.items.iter().filter_map(Item::as_node)
    }

    /// Effective boolean value
    ///
    /// Empty is false, a leading node is true, a single atomic value follows
    /// the XPath `boolean()` rules and several atomic values count as true.
    pub fn is_truthy(&self) -> bool {
        match self.items.as_slice() {
            [] => false,
            [Item::Node(_), ..] => true,
            [Item::Boolean(value)] => *value,
            [Item::Number(number)] => *number != 0.0 && !number.is_nan(),
            [Item::Text(text)] => !text.is_empty(),
            _ => true,
        }
    }

    /// String value of the first item, empty for an empty sequence
    pub fn string_value(&self) -> String {
        self.items
            .first()
            .map(Item::string_value)
            .unwrap_or_default()
    }
}

impl<'d> From<Item<'d>> for Sequence<'d> {
    fn from(item: Item<'d>) -> Self {
        Self { items: vec![item] }
    }
}

impl<'d> FromIterator<Item<'d>> for Sequence<'d> {
    fn from_iter<I: IntoIterator<Item = Item<'d>>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'d> IntoIterator for Sequence<'d> {
    type Item = Item<'d>;
    type IntoIter = std::vec::IntoIter<Item<'d>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, 'd> IntoIterator for &'a Sequence<'d> {
    type Item = &'a Item<'d>;
    type IntoIter = std::slice::Iter<'a, Item<'d>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Format a number the way XPath `string()` does
pub fn format_number(number: f64) -> String {
    if number.is_nan() {
        return "NaN".to_string();
    }
    if number.is_infinite() {
        return if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if number == 0.0 {
        return "0".to_string();
    }
    if number.fract() == 0.0 && number.abs() < 1e15 {
        return format!("{}", number as i64);
    }
    format!("{}", number)
}

/// RAII wrapper for an XPath evaluation context
pub(crate) struct XPathContext {
    ptr: NonNull<XmlXPathContext>,
}

impl XPathContext {
    pub(crate) fn new(doc: *mut XmlDoc) -> LibXml2Result<Self> {
        let ptr = unsafe { xmlXPathNewContext(doc) };
        NonNull::new(ptr)
            .map(|ptr| Self { ptr })
            .ok_or(LibXml2Error::XPathContextCreationFailed)
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlXPathContext {
        self.ptr.as_ptr()
    }

    fn register_namespace(&self, prefix: &str, uri: &str) -> LibXml2Result<()> {
        let c_prefix = to_c_string(prefix)?;
        let c_uri = to_c_string(uri)?;
        let status = unsafe {
            xmlXPathRegisterNs(
                self.as_ptr(),
                c_prefix.as_ptr().cast(),
                c_uri.as_ptr().cast(),
            )
        };
        if status != 0 {
            return Err(LibXml2Error::RegistrationFailed {
                what: "namespace",
                name: prefix.to_string(),
            });
        }
        Ok(())
    }

    fn register_variable(&self, name: &str, value: &Sequence<'_>) -> Result<()> {
        let c_name = to_c_string(name)?;
        let object = to_xpath_object(value).map_err(|details| {
            ValidationError::expression(format!("${}", name), details)
        })?;
        // The context takes ownership of the object, even on failure.
        let status =
            unsafe { xmlXPathRegisterVariable(self.as_ptr(), c_name.as_ptr().cast(), object) };
        if status != 0 {
            return Err(LibXml2Error::RegistrationFailed {
                what: "variable",
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for XPathContext {
    fn drop(&mut self) {
        unsafe { xmlXPathFreeContext(self.ptr.as_ptr()) };
    }
}

/// Evaluate `expression` with `node` as the context item
///
/// A fresh XPath context is built for every call: the namespaces, the
/// variables and the compatibility functions are registered on it and it is
/// dropped when the call returns.
pub fn evaluate<'d>(
    node: Node<'d>,
    expression: &str,
    namespaces: &Namespaces,
    variables: &[(String, Sequence<'d>)],
) -> Result<Sequence<'d>> {
    let c_expression = to_c_string(expression)?;
    let context = XPathContext::new(node.document_ptr())?;

    for (prefix, uri) in namespaces {
        if prefix.is_empty() {
            continue;
        }
        context.register_namespace(prefix, uri)?;
    }
    functions::register_compat_functions(&context)?;
    for (name, value) in variables {
        context.register_variable(name, value)?;
    }

    let errors = StructuredErrors::capture();
    let object =
        unsafe { xmlXPathNodeEval(node.as_ptr(), c_expression.as_ptr().cast(), context.as_ptr()) };
    let messages = errors.finish();

    let Some(object) = NonNull::new(object) else {
        let details = if messages.is_empty() {
            "evaluation failed".to_string()
        } else {
            messages.join("; ")
        };
        return Err(ValidationError::expression(expression, details));
    };

    let sequence = unsafe { from_xpath_object(object.as_ptr()) };
    unsafe { xmlXPathFreeObject(object.as_ptr()) };

    trace!(expression, items = sequence.len(), "evaluated expression");
    Ok(sequence)
}

/// Copy a libxml2 result object into an owned sequence
///
/// # Safety
///
/// `object` must be a valid XPath object whose nodes belong to documents that
/// live for `'d`. The object is not freed.
unsafe fn from_xpath_object<'d>(object: *mut XmlXPathObject) -> Sequence<'d> {
    let value = unsafe { &*object };
    match value.object_type {
        XPATH_NODESET | XPATH_XSLT_TREE => unsafe { node_set_items(value.nodesetval) },
        XPATH_BOOLEAN => Item::Boolean(value.boolval != 0).into(),
        XPATH_NUMBER => Item::Number(value.floatval).into(),
        XPATH_STRING => {
            Item::Text(unsafe { borrow_xml_string(value.stringval) }.unwrap_or_default()).into()
        }
        _ => {
            let text = unsafe { take_xml_string(xmlXPathCastToString(object)) };
            Item::Text(text.unwrap_or_default()).into()
        }
    }
}

unsafe fn node_set_items<'d>(set: *mut XmlNodeSet) -> Sequence<'d> {
    let Some(set) = (unsafe { set.as_ref() }) else {
        return Sequence::empty();
    };
    if set.node_tab.is_null() || set.node_nr <= 0 {
        return Sequence::empty();
    }

    let nodes = unsafe { std::slice::from_raw_parts(set.node_tab, set.node_nr as usize) };
    nodes
        .iter()
        .filter(|node| !node.is_null())
        .map(|&node| {
            if unsafe { (*node).node_type } == XML_NAMESPACE_DECL {
                // Namespace nodes are copies owned by the result object.
                let ns = node.cast::<XmlNs>();
                Item::Text(unsafe { borrow_xml_string((*ns).href) }.unwrap_or_default())
            } else {
                Item::Node(unsafe { Node::from_raw(node) })
            }
        })
        .collect()
}

/// Build a libxml2 object holding `value`
///
/// Node-only sequences become node-sets, a single atomic item becomes the
/// matching scalar. Anything else is rejected with a description.
fn to_xpath_object(value: &Sequence<'_>) -> std::result::Result<*mut XmlXPathObject, String> {
    let object = match value.items() {
        [Item::Boolean(flag)] => unsafe { xmlXPathNewBoolean(c_int::from(*flag)) },
        [Item::Number(number)] => unsafe { xmlXPathNewFloat(*number) },
        [Item::Text(text)] => {
            let c_text = CString::new(text.as_str())
                .map_err(|_| "string value contains a NUL byte".to_string())?;
            unsafe { xmlXPathNewString(c_text.as_ptr().cast()) }
        }
        items if items.iter().all(|item| matches!(item, Item::Node(_))) => {
            let set = unsafe { xmlXPathNodeSetCreate(ptr::null_mut()) };
            if set.is_null() {
                return Err(LibXml2Error::MemoryAllocation.to_string());
            }
            for node in value.nodes() {
                unsafe { xmlXPathNodeSetAdd(set, node.as_ptr()) };
            }
            unsafe { xmlXPathWrapNodeSet(set) }
        }
        items => {
            let nodes = value.nodes().count();
            return Err(if nodes == 0 {
                // Several namespace nodes arrive here as strings.
                format!(
                    "cannot bind {} atomic values to a variable; only a node-set or a single value can be bound",
                    items.len()
                )
            } else {
                format!(
                    "cannot bind a sequence mixing {} nodes and {} atomic values to a variable",
                    nodes,
                    items.len() - nodes
                )
            });
        }
    };

    if object.is_null() {
        return Err(LibXml2Error::MemoryAllocation.to_string());
    }
    Ok(object)
}

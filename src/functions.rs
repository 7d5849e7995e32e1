//! XPath 2.0 functions missing from libxml2's XPath 1.0 engine
//!
//! Rule sets written for XPath 2.0 processors (EN 16931, Factur-X, XRechnung)
//! lean on a handful of functions that XPath 1.0 does not define. They are
//! registered on every evaluation context:
//!
//! | function        | signature                               |
//! |-----------------|-----------------------------------------|
//! | `exists`        | `boolean exists(object)`                |
//! | `empty`         | `boolean empty(object)`                 |
//! | `upper-case`    | `string upper-case(string)`             |
//! | `lower-case`    | `string lower-case(string)`             |
//! | `abs`           | `number abs(number)`                    |
//! | `ends-with`     | `boolean ends-with(string, string)`     |
//! | `xs:decimal`    | `number xs:decimal(object)`             |
//!
//! `xs:decimal` lives in the XML Schema namespace, so it is only callable
//! when the schema binds a prefix to [`XML_SCHEMA_NS`].
//!
//! ## Limits
//!
//! These are functions only; the grammar stays XPath 1.0. XPath 2.0 syntax
//! is rejected by libxml2 and surfaces as
//! [`ValidationError::Expression`](crate::error::ValidationError::Expression):
//!
//! - predicates on an abbreviated step, e.g. `.[ram:TypeCode = 'VAT']`
//!   (write `self::node()[ram:TypeCode = 'VAT']` instead)
//! - function calls as path steps, e.g. `ram:Tax/xs:decimal(ram:Rate)`
//!   (write `xs:decimal(ram:Tax/ram:Rate)` instead)
//! - sequence types, `for`/`if`/`some` expressions and the `eq`/`lt` family

use std::ffi::CString;

use libc::{c_int, c_uchar};

use crate::error::{LibXml2Error, LibXml2Result};
use crate::libxml2::take_xml_string;
use crate::xpath::{
    XPATH_NODESET, XPATH_XSLT_TREE, XPathContext, XmlXPathFunction, XmlXPathObject,
    XmlXPathParserContext, xmlXPathCastToNumber, xmlXPathCastToString, xmlXPathFreeObject,
    xmlXPathNewBoolean, xmlXPathNewFloat, xmlXPathNewString, xmlXPathRegisterFunc,
    xmlXPathRegisterFuncNS,
};

/// Namespace of the XML Schema datatypes (`xs:`)
pub const XML_SCHEMA_NS: &str = "http://www.w3.org/2001/XMLSchema";

// xmlXPathError
const XPATH_INVALID_ARITY: c_int = 12;
const XPATH_STACK_ERROR: c_int = 23;

#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    fn valuePop(ctxt: *mut XmlXPathParserContext) -> *mut XmlXPathObject;
    fn valuePush(ctxt: *mut XmlXPathParserContext, value: *mut XmlXPathObject) -> c_int;
    fn xmlXPathErr(ctxt: *mut XmlXPathParserContext, error: c_int);
}

/// Register all compatibility functions on `context`
pub(crate) fn register_compat_functions(context: &XPathContext) -> LibXml2Result<()> {
    let plain: [(&str, XmlXPathFunction); 6] = [
        ("exists", Some(exists_function)),
        ("empty", Some(empty_function)),
        ("upper-case", Some(upper_case_function)),
        ("lower-case", Some(lower_case_function)),
        ("abs", Some(abs_function)),
        ("ends-with", Some(ends_with_function)),
    ];

    for (name, function) in plain {
        let c_name = c_name(name)?;
        let status =
            unsafe { xmlXPathRegisterFunc(context.as_ptr(), c_name.as_ptr().cast(), function) };
        if status != 0 {
            return Err(registration_failed(name));
        }
    }

    let c_decimal = c_name("decimal")?;
    let c_namespace = c_name(XML_SCHEMA_NS)?;
    let status = unsafe {
        xmlXPathRegisterFuncNS(
            context.as_ptr(),
            c_decimal.as_ptr().cast(),
            c_namespace.as_ptr().cast(),
            Some(decimal_function),
        )
    };
    if status != 0 {
        return Err(registration_failed("xs:decimal"));
    }

    Ok(())
}

fn c_name(name: &str) -> LibXml2Result<CString> {
    CString::new(name).map_err(|_| LibXml2Error::InteriorNul {
        details: name.to_string(),
    })
}

fn registration_failed(name: &str) -> LibXml2Error {
    LibXml2Error::RegistrationFailed {
        what: "function",
        name: name.to_string(),
    }
}

/// Popped argument, freed on drop
struct Argument(*mut XmlXPathObject);

impl Argument {
    fn is_node_set(&self) -> bool {
        let object_type = unsafe { (*self.0).object_type };
        object_type == XPATH_NODESET || object_type == XPATH_XSLT_TREE
    }

    fn node_count(&self) -> usize {
        let set = unsafe { (*self.0).nodesetval };
        if set.is_null() {
            return 0;
        }
        usize::try_from(unsafe { (*set).node_nr }).unwrap_or(0)
    }

    fn to_text(&self) -> String {
        unsafe { take_xml_string(xmlXPathCastToString(self.0)) }.unwrap_or_default()
    }

    fn to_number(&self) -> f64 {
        unsafe { xmlXPathCastToNumber(self.0) }
    }
}

impl Drop for Argument {
    fn drop(&mut self) {
        unsafe { xmlXPathFreeObject(self.0) };
    }
}

/// Check the argument count, raising an XPath error on mismatch
unsafe fn check_arity(ctxt: *mut XmlXPathParserContext, nargs: c_int, expected: c_int) -> bool {
    if nargs != expected {
        unsafe { xmlXPathErr(ctxt, XPATH_INVALID_ARITY) };
        return false;
    }
    true
}

unsafe fn pop(ctxt: *mut XmlXPathParserContext) -> Option<Argument> {
    let value = unsafe { valuePop(ctxt) };
    if value.is_null() {
        unsafe { xmlXPathErr(ctxt, XPATH_STACK_ERROR) };
        return None;
    }
    Some(Argument(value))
}

unsafe fn push_boolean(ctxt: *mut XmlXPathParserContext, value: bool) {
    unsafe { valuePush(ctxt, xmlXPathNewBoolean(c_int::from(value))) };
}

unsafe fn push_number(ctxt: *mut XmlXPathParserContext, value: f64) {
    unsafe { valuePush(ctxt, xmlXPathNewFloat(value)) };
}

unsafe fn push_string(ctxt: *mut XmlXPathParserContext, value: &str) {
    let c_value = CString::new(value).unwrap_or_default();
    unsafe { valuePush(ctxt, xmlXPathNewString(c_value.as_ptr().cast::<c_uchar>())) };
}

/// An atomic argument always counts as one item
fn has_items(argument: &Argument) -> bool {
    !argument.is_node_set() || argument.node_count() > 0
}

unsafe extern "C" fn exists_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 1) {
            return;
        }
        let Some(argument) = pop(ctxt) else {
            return;
        };
        push_boolean(ctxt, has_items(&argument));
    }
}

unsafe extern "C" fn empty_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 1) {
            return;
        }
        let Some(argument) = pop(ctxt) else {
            return;
        };
        push_boolean(ctxt, !has_items(&argument));
    }
}

unsafe extern "C" fn upper_case_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 1) {
            return;
        }
        let Some(argument) = pop(ctxt) else {
            return;
        };
        push_string(ctxt, &argument.to_text().to_uppercase());
    }
}

unsafe extern "C" fn lower_case_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 1) {
            return;
        }
        let Some(argument) = pop(ctxt) else {
            return;
        };
        push_string(ctxt, &argument.to_text().to_lowercase());
    }
}

unsafe extern "C" fn abs_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 1) {
            return;
        }
        let Some(argument) = pop(ctxt) else {
            return;
        };
        push_number(ctxt, argument.to_number().abs());
    }
}

unsafe extern "C" fn ends_with_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 2) {
            return;
        }
        // Arguments come off the stack last first.
        let Some(suffix) = pop(ctxt) else {
            return;
        };
        let Some(text) = pop(ctxt) else {
            return;
        };
        push_boolean(ctxt, text.to_text().ends_with(&suffix.to_text()));
    }
}

unsafe extern "C" fn decimal_function(ctxt: *mut XmlXPathParserContext, nargs: c_int) {
    unsafe {
        if !check_arity(ctxt, nargs, 1) {
            return;
        }
        let Some(argument) = pop(ctxt) else {
            return;
        };
        push_number(ctxt, argument.to_number());
    }
}

//! Two-stage `{{…}}` placeholder expansion.
//!
//! Stage A rewrites the `{{ $name }}` spelling to `{{name}}` and then
//! substitutes placeholders that name a key in the supplied variable map.
//! Stage B evaluates whatever is left against the data-function registry in
//! [`crate::fake`], invoking the function freshly per occurrence.
//!
//! Variables and functions share the surface namespace; because stage A runs
//! first, a variable named `uuid` masks the generator of the same name.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};

use crate::fake;

// `{{ $name }}` → `{{name}}`
static DOLLAR_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\$([a-zA-Z_]\w*)\s*\}\}").expect("dollar regex"));

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z_]\w*)\s*\}\}").expect("placeholder regex"));

/// The `key=value` form used for variant-selector lookups.
pub fn var_key(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Expand placeholders in `input`: variables first, data functions second.
/// Unresolvable placeholders are left as-is.
pub fn substitute(vars: &HashMap<String, String>, input: &[u8]) -> Vec<u8> {
    let rewritten = DOLLAR_VAR.replace_all(input, &b"{{$1}}"[..]);

    let staged = PLACEHOLDER.replace_all(&rewritten, |caps: &Captures| -> Vec<u8> {
        let name = String::from_utf8_lossy(&caps[1]);
        match vars.get(name.as_ref()) {
            Some(value) => value.clone().into_bytes(),
            None => caps[0].to_vec(),
        }
    });

    let expanded = PLACEHOLDER.replace_all(&staged, |caps: &Captures| -> Vec<u8> {
        let name = String::from_utf8_lossy(&caps[1]);
        match fake::invoke(&name) {
            Some(value) => value.into_bytes(),
            None => caps[0].to_vec(),
        }
    });

    expanded.into_owned()
}

/// [`substitute`] for header values and other strings.
pub fn substitute_str(vars: &HashMap<String, String>, input: &str) -> String {
    String::from_utf8_lossy(&substitute(vars, input.as_bytes())).into_owned()
}

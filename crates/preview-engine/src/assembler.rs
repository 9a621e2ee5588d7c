//! Bundle assembly
//!
//! Turns a generated `{html, css, js}` triple into one self-contained
//! document. Generated HTML arrives either as a complete document or as a
//! body fragment; both cases produce a document that can be served as
//! `index.html` or embedded through `srcdoc`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::InjectionPolicy;
use crate::constants::defaults;

static DOCUMENT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<!doctype\s+html|<html[\s>]").expect("valid regex"));
static HTML_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<html(\s[^>]*)?>").expect("valid regex"));
static HEAD_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</head\s*>").expect("valid regex"));
static BODY_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</body\s*>").expect("valid regex"));
static STYLE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<style[\s>]").expect("valid regex"));
static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<script[\s>]").expect("valid regex"));

/// A complete HTML document ready to be served or embedded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FullDocument(String);

impl FullDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

}

impl fmt::Display for FullDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FullDocument {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether `html` is already a complete document rather than a fragment
pub fn is_full_document(html: &str) -> bool {
    DOCUMENT_MARKER.is_match(html)
}

/// Assemble with the default injection policy
pub fn assemble(html: &str, css: &str, js: &str) -> FullDocument {
    assemble_with(html, css, js, InjectionPolicy::default())
}

/// Assemble `html`, `css` and `js` into one document.
///
/// Pure: identical inputs always yield byte-identical output.
pub fn assemble_with(html: &str, css: &str, js: &str, policy: InjectionPolicy) -> FullDocument {
    if is_full_document(html) {
        FullDocument(inject_into_document(html, css, js, policy))
    } else {
        FullDocument(wrap_fragment(html, css, js))
    }
}

fn inject_into_document(html: &str, css: &str, js: &str, policy: InjectionPolicy) -> String {
    let skip_existing = policy == InjectionPolicy::SkipIfPresent;
    let inject_css = !css.is_empty() && !(skip_existing && STYLE_BLOCK.is_match(html));
    let inject_js = !js.is_empty() && !(skip_existing && SCRIPT_BLOCK.is_match(html));

    let mut document = html.to_string();

    if inject_css {
        let style = format!("<style>{}</style>", css);
        document = match last_match_start(&HEAD_CLOSE, &document) {
            Some(pos) => insert_at(&document, pos, &style),
            // No head: open the document with the style, right after <html> when present
            None => match HTML_OPEN.find(&document) {
                Some(m) => insert_at(&document, m.end(), &style),
                None => format!("{}{}", style, document),
            },
        };
    }

    if inject_js {
        let script = format!("<script>{}</script>", js);
        document = match last_match_start(&BODY_CLOSE, &document) {
            Some(pos) => insert_at(&document, pos, &script),
            None => format!("{}{}", document, script),
        };
    }

    document
}

fn wrap_fragment(html: &str, css: &str, js: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{title}</title>\n\
         <style>{css}</style>\n\
         </head>\n\
         <body>\n\
         {html}\n\
         <script>{js}</script>\n\
         </body>\n\
         </html>\n",
        title = defaults::DOCUMENT_TITLE,
        css = css,
        html = html,
        js = js,
    )
}

fn insert_at(document: &str, pos: usize, fragment: &str) -> String {
    let mut out = String::with_capacity(document.len() + fragment.len());
    out.push_str(&document[..pos]);
    out.push_str(fragment);
    out.push_str(&document[pos..]);
    out
}

/// Generated documents sometimes mention `</body>` inside inline scripts;
/// the real closing tag is the last one.
fn last_match_start(re: &Regex, haystack: &str) -> Option<usize> {
    re.find_iter(haystack).last().map(|m| m.start())
}

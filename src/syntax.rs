use regex::Regex;

use crate::error::Result;

pub const DEFAULT_CONTROL_BEGIN: &str = "<!--@";
pub const DEFAULT_CONTROL_END: &str = "-->";
pub const DEFAULT_REPLACE_BEGIN: &str = "{";
pub const DEFAULT_REPLACE_END: &str = "}";

/// Signed decimal literal: `12`, `-3.5`, `.25`, `7.`.
pub(crate) const DECIMAL: &str = r"-?(?:\d*?\.\d+|\d+\.?)";

const CONTROLS: &str = r"LOOP|FOR|IF|ELSE|EMBED|NOBREAK|LITERAL|INCLUDE|\?";

/// Body of a substitution marker, without its delimiters.
///
/// Groups: 1 name, 2 arithmetic, 3 comma width, 4 format options.
fn replace_body() -> String {
    format!(
        r"(#?[A-Za-z_][A-Za-z0-9_]*?)(\s*[+\-*/%]\s*{DECIMAL})?(,\d*)?((?::|/)[A-Za-z0-9_]+)?"
    )
}

/// Marker delimiters and the patterns built from them.
///
/// Delimiters are regex fragments. The `escape` flag on the builder methods
/// turns plain literals into fragments.
#[derive(Clone, Debug)]
pub struct Syntax {
    control_begin: String,
    control_end: String,
    replace_begin: String,
    replace_end: String,
    control: Regex,
    replace: Regex,
    replace_anchored: Regex,
}

impl Syntax {
    pub fn new() -> Result<Self> {
        Self::build(
            regex::escape(DEFAULT_CONTROL_BEGIN),
            regex::escape(DEFAULT_CONTROL_END),
            regex::escape(DEFAULT_REPLACE_BEGIN),
            regex::escape(DEFAULT_REPLACE_END),
        )
    }

    /// Replaces the control marker delimiters (`<!--@` / `-->`).
    pub fn with_control_tag(self, begin: &str, end: &str, escape: bool) -> Result<Self> {
        let (begin, end) = fragments(begin, end, escape);
        Self::build(begin, end, self.replace_begin, self.replace_end)
    }

    /// Replaces the substitution marker delimiters (`{` / `}`).
    pub fn with_replace_tag(self, begin: &str, end: &str, escape: bool) -> Result<Self> {
        let (begin, end) = fragments(begin, end, escape);
        Self::build(self.control_begin, self.control_end, begin, end)
    }

    fn build(
        control_begin: String,
        control_end: String,
        replace_begin: String,
        replace_end: String,
    ) -> Result<Self> {
        // 1 leading, 2 whole marker, 3 END_ prefix, 4 type, 5 param, 6 trailing
        let control = Regex::new(&format!(
            r"(?s)^(.*?)({control_begin}(END_)?({CONTROLS})(?:\((.*?)\))?{control_end})(.*)$"
        ))?;
        let body = replace_body();
        let replace = Regex::new(&format!("{replace_begin}{body}{replace_end}"))?;
        let replace_anchored = Regex::new(&format!("^(?:{replace_begin}{body}{replace_end})"))?;
        Ok(Self {
            control_begin,
            control_end,
            replace_begin,
            replace_end,
            control,
            replace,
            replace_anchored,
        })
    }

    /// Matches a whole buffer around its first control marker.
    pub(crate) fn control(&self) -> &Regex {
        &self.control
    }

    /// Matches substitution markers anywhere.
    pub(crate) fn replace(&self) -> &Regex {
        &self.replace
    }

    /// Matches a substitution marker at the start of the input only.
    pub(crate) fn replace_anchored(&self) -> &Regex {
        &self.replace_anchored
    }
}

impl Default for Syntax {
    fn default() -> Self {
        Self::new().expect("default marker delimiters form valid patterns")
    }
}

fn fragments(begin: &str, end: &str, escape: bool) -> (String, String) {
    if escape {
        (regex::escape(begin), regex::escape(end))
    } else {
        (begin.to_string(), end.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_control_pattern_splits_line() {
        let syntax = Syntax::default();
        let caps = syntax
            .control()
            .captures("a <!--@IF({x} == 1)--> b\n")
            .unwrap();
        assert_eq!(&caps[1], "a ");
        assert_eq!(caps.get(3), None);
        assert_eq!(&caps[4], "IF");
        assert_eq!(&caps[5], "{x} == 1");
        assert_eq!(&caps[6], " b\n");
    }

    #[test]
    fn end_marker_has_prefix_and_no_param() {
        let syntax = Syntax::default();
        let caps = syntax.control().captures("<!--@END_LOOP-->\n").unwrap();
        assert!(caps.get(3).is_some());
        assert_eq!(&caps[4], "LOOP");
        assert!(caps.get(5).is_none());
    }

    #[test]
    fn custom_control_tag_is_escaped() {
        let syntax = Syntax::default().with_control_tag("[%", "%]", true).unwrap();
        let caps = syntax.control().captures("x[%LITERAL%]y").unwrap();
        assert_eq!(&caps[4], "LITERAL");
        assert!(syntax.control().captures("<!--@IF(1)-->").is_none());
    }

    #[test]
    fn unescaped_invalid_fragment_is_an_error() {
        assert!(Syntax::default().with_control_tag("(", "-->", false).is_err());
    }

    #[test]
    fn replace_pattern_groups() {
        let syntax = Syntax::default();
        let caps = syntax.replace().captures("total: {price * 1.5,2:q}").unwrap();
        assert_eq!(&caps[1], "price");
        assert_eq!(caps[2].trim(), "* 1.5");
        assert_eq!(&caps[3], ",2");
        assert_eq!(&caps[4], ":q");
    }

    #[test]
    fn custom_replace_tag() {
        let syntax = Syntax::default().with_replace_tag("${", "}", true).unwrap();
        assert!(syntax.replace().is_match("${name}"));
        assert!(!syntax.replace().is_match("{name}"));
    }
}

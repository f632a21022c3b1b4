//! Minimal `{{ name }}` placeholder renderer.

use std::collections::BTreeMap;

use crate::error::{BootcfgError, Result};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Variables available to a template.
pub type Vars = BTreeMap<String, String>;

/// Replaces every `{{ name }}` in `template` with `vars[name]`.
///
/// Whitespace inside the braces is ignored. A placeholder naming a variable that is
/// not in `vars` is an error, as is a `{{` without a matching `}}`.
pub fn render(template: &str, vars: &Vars) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut consumed = 0usize;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or(BootcfgError::UnterminatedPlaceholder {
                offset: consumed + start,
            })?;
        let name = after_open[..end].trim();
        let value = vars.get(name).ok_or_else(|| BootcfgError::UnknownVariable {
            name: name.to_string(),
            offset: consumed + start,
        })?;
        out.push_str(value);

        let advance = start + OPEN.len() + end + CLOSE.len();
        consumed += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_with_and_without_spaces() {
        let v = vars(&[("host", "quorum-1"), ("domain", "a.lan")]);
        assert_eq!(
            render("{{host}}.int.{{ domain }}", &v).unwrap(),
            "quorum-1.int.a.lan"
        );
    }

    #[test]
    fn text_without_placeholders_is_verbatim() {
        assert_eq!(render("plain: text\n", &Vars::new()).unwrap(), "plain: text\n");
    }

    #[test]
    fn unknown_variable_reports_offset() {
        let err = render("ab{{ missing }}", &Vars::new()).unwrap_err();
        match err {
            BootcfgError::UnknownVariable { name, offset } => {
                assert_eq!(name, "missing");
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unterminated_placeholder() {
        let v = vars(&[("a", "1")]);
        let err = render("{{a}} then {{ b", &v).unwrap_err();
        assert!(matches!(
            err,
            BootcfgError::UnterminatedPlaceholder { offset: 11 }
        ));
    }

    #[test]
    fn empty_value_is_allowed() {
        let v = vars(&[("token", "")]);
        assert_eq!(render("t={{token}};", &v).unwrap(), "t=;");
    }
}

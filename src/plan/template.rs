use std::collections::BTreeMap;

pub type TemplateVars = BTreeMap<String, String>;

/// Replaces every `{{key}}` in `input` with its value from `vars`.
/// Unknown keys and unterminated braces are kept as written.
#[must_use]
pub fn render_command(input: &str, vars: &TemplateVars) -> String {
    let mut rest = input;
    let mut output = String::with_capacity(input.len());

    while let Some(start) = rest.find("{{") {
        let (before, after_start) = rest.split_at(start);
        output.push_str(before);
        let after = after_start.get(2..).unwrap_or_default();

        let Some(end) = after.find("}}") else {
            output.push_str(after_start);
            return output;
        };
        let (key_part, after_end) = after.split_at(end);
        match vars.get(key_part.trim()) {
            Some(value) => output.push_str(value),
            None => {
                output.push_str("{{");
                output.push_str(key_part);
                output.push_str("}}");
            }
        }
        rest = after_end.get(2..).unwrap_or_default();
    }

    output.push_str(rest);
    output
}

use crate::config::Config;

const TEMPLATE: &str = include_str!("../static/index.html");

/// Render the chat page for the configured model and backend.
pub fn render_index(config: &Config) -> String {
    TEMPLATE
        .replace("{{MODEL_JSON}}", &script_string(&config.model))
        .replace("{{GREETING_JSON}}", &script_string(&config.greeting))
        .replace("{{MODEL}}", &escape_html(&config.model))
        .replace("{{BASE_URL}}", &escape_html(&config.base_url))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// A JS string literal that is also safe inside a `<script>` element.
fn script_string(text: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(text)
        .unwrap_or_default()
        .replace('<', "\\u003c")
}

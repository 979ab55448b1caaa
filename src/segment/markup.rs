use pulldown_cmark::{html, Event, Options, Parser};
use std::panic::{self, AssertUnwindSafe};

/// Convert a prose span to HTML. Raw HTML in the source is escaped rather
/// than passed through, and a conversion failure degrades to escaped text.
pub fn prose_to_markup(source: &str) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| markdown_to_html(source))) {
        Ok(markup) => markup,
        Err(_) => {
            tracing::warn!(len = source.len(), "markdown conversion failed, escaping prose");
            escaped_preformatted(source)
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn markdown_to_html(source: &str) -> String {
    let events = Parser::new_ext(source, markdown_options()).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut markup = String::with_capacity(source.len() + source.len() / 2);
    html::push_html(&mut markup, events);
    markup
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn escaped_preformatted(source: &str) -> String {
    format!("<pre class=\"prose-raw\">{}</pre>", escape_html(source))
}

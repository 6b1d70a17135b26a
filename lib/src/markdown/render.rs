use pulldown_cmark::{html, Options, Parser};

#[derive(Debug, Clone, Copy)]
pub struct Markdown {
    options: Options,
}

impl Default for Markdown {
    fn default() -> Self {
        Markdown {
            options: Options::ENABLE_TABLES
                | Options::ENABLE_FOOTNOTES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS,
        }
    }
}

impl Markdown {
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn to_html(&self, input: &str) -> String {
        let mut output = String::with_capacity(input.len() * 3 / 2);
        html::push_html(&mut output, Parser::new_ext(input, self.options));
        output
    }

    /// Like [`Markdown::to_html()`], but a lone paragraph is unwrapped so the
    /// result can sit inside an inline context such as `<li>`.
    pub fn to_inline_html(&self, input: &str) -> String {
        let html = self.to_html(input);
        let trimmed = html.trim_end();
        match trimmed.strip_prefix("<p>").and_then(|s| s.strip_suffix("</p>")) {
            Some(inner) if !inner.contains("<p>") => inner.to_string(),
            _ => html,
        }
    }
}

use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::format::Format;

/// Front matter fenced by `---` lines at the very start of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontMatter<'a> {
    pub matter: &'a str,
    pub body: &'a str,
}

impl<'a> FrontMatter<'a> {
    const FENCE: &'static str = "---";

    /// Splits `input` into front matter and body. Returns `None` if `input`
    /// doesn't open with a fence or the fence is never closed.
    pub fn split(input: &'a str) -> Option<Self> {
        let rest = input.strip_prefix(Self::FENCE)?;
        let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;

        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end() == Self::FENCE {
                let matter = &rest[..offset];
                let body = &rest[offset + line.len()..];
                return Some(FrontMatter { matter, body });
            }

            offset += line.len();
        }

        None
    }

    pub fn parse<F: Format, T: DeserializeOwned>(&self) -> Result<T> {
        Ok(F::from_str(self.matter)?)
    }
}

#[cfg(test)]
mod tests {
    use super::FrontMatter;

    #[test]
    fn splits_fenced_matter() {
        let doc = "---\nname: Pie\nslug: pie\n---\nA *flaky* crust.\n";
        let fm = FrontMatter::split(doc).unwrap();
        assert_eq!(fm.matter, "name: Pie\nslug: pie\n");
        assert_eq!(fm.body, "A *flaky* crust.\n");
    }

    #[test]
    fn handles_crlf_and_empty_body() {
        let fm = FrontMatter::split("---\r\nname: Pie\r\n---\r\n").unwrap();
        assert_eq!(fm.matter, "name: Pie\r\n");
        assert_eq!(fm.body, "");
    }

    #[test]
    fn rejects_unfenced_or_unclosed() {
        assert!(FrontMatter::split("name: Pie\n").is_none());
        assert!(FrontMatter::split("---\nname: Pie\n").is_none());
        assert!(FrontMatter::split("----\nname: Pie\n---\n").is_none());
    }
}
